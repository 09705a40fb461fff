// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Resolved command tree consumed by the plan compiler
//!
//! The SQL parser and semantic resolver are external collaborators; they hand
//! this crate a fully resolved [`Command`] tree. The planner only reads
//! clauses, sub-commands, and projected symbol lists - it never re-resolves
//! names.

use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Catalog identifier for a group (table, view, procedure result set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u32);

/// Catalog identifier for an element (column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId(pub u32);

/// Catalog identifier for a model (data source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId(pub u32);

/// A table/view reference: the name used in the query, the defining full name
/// when the reference is aliased, and the catalog id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupSymbol {
    /// Name as referenced in the query (the alias when one was declared).
    pub name: String,
    /// Full catalog name when `name` is an alias, `None` otherwise.
    pub definition: Option<String>,
    pub metadata_id: GroupId,
}

impl GroupSymbol {
    pub fn new(name: impl Into<String>, metadata_id: GroupId) -> Self {
        Self {
            name: name.into(),
            definition: None,
            metadata_id,
        }
    }

    pub fn aliased(
        alias: impl Into<String>,
        definition: impl Into<String>,
        metadata_id: GroupId,
    ) -> Self {
        Self {
            name: alias.into(),
            definition: Some(definition.into()),
            metadata_id,
        }
    }

    /// Case-insensitive match against the referenced name or the alias target.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self
                .definition
                .as_deref()
                .is_some_and(|d| d.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for GroupSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.definition {
            Some(def) => write!(f, "{} AS {}", def, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A resolved column reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementSymbol {
    /// Column name without the group qualifier.
    pub name: String,
    /// Group the element resolves against, as referenced in the query.
    pub group: String,
    pub metadata_id: ElementId,
    pub ty: DataType,
}

impl ElementSymbol {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        metadata_id: ElementId,
        ty: DataType,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            metadata_id,
            ty,
        }
    }
}

impl fmt::Display for ElementSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Long,
    Double,
    String,
    Boolean,
    Timestamp,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Integer(i64),
    Double(f64),
    String(String),
    Boolean(bool),
    Null,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(v) => write!(f, "{}", v),
            Literal::Double(v) => write!(f, "{}", v),
            Literal::String(v) => write!(f, "'{}'", v),
            Literal::Boolean(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            Literal::Null => write!(f, "NULL"),
        }
    }
}

/// Aggregate functions the planner recognizes when deciding GROUP placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }
}

static AGGREGATE_NAMES: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["COUNT", "SUM", "AVG", "MIN", "MAX"]);

/// Returns true if `name` names an aggregate function (case insensitive).
pub fn is_aggregate_function_name(name: &str) -> bool {
    AGGREGATE_NAMES
        .iter()
        .any(|a| a.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Element(ElementSymbol),
    Literal(Literal),
    Function {
        name: String,
        args: Vec<Expression>,
    },
    Aggregate {
        function: AggregateFunction,
        distinct: bool,
        arg: Option<Box<Expression>>,
    },
    ScalarSubquery(Box<Command>),
}

impl Expression {
    /// True when the expression is or contains an aggregate call.
    pub fn is_aggregate(&self) -> bool {
        match self {
            Expression::Aggregate { .. } => true,
            Expression::Function { args, .. } => args.iter().any(Expression::is_aggregate),
            _ => false,
        }
    }

    /// Collect the group names this expression references.
    pub fn collect_groups(&self, out: &mut Vec<String>) {
        match self {
            Expression::Element(e) => {
                if !out.iter().any(|g| g.eq_ignore_ascii_case(&e.group)) {
                    out.push(e.group.clone());
                }
            }
            Expression::Function { args, .. } => {
                for a in args {
                    a.collect_groups(out);
                }
            }
            Expression::Aggregate { arg, .. } => {
                if let Some(a) = arg {
                    a.collect_groups(out);
                }
            }
            Expression::Literal(_) | Expression::ScalarSubquery(_) => {}
        }
    }

    /// Collect every element symbol referenced by this expression.
    pub fn collect_elements(&self, out: &mut Vec<ElementSymbol>) {
        match self {
            Expression::Element(e) => {
                if !out.contains(e) {
                    out.push(e.clone());
                }
            }
            Expression::Function { args, .. } => {
                for a in args {
                    a.collect_elements(out);
                }
            }
            Expression::Aggregate { arg, .. } => {
                if let Some(a) = arg {
                    a.collect_elements(out);
                }
            }
            Expression::Literal(_) | Expression::ScalarSubquery(_) => {}
        }
    }

    /// Collect nested commands (scalar subqueries) in evaluation order.
    pub fn collect_subqueries<'a>(&'a self, out: &mut Vec<&'a Command>) {
        match self {
            Expression::ScalarSubquery(cmd) => out.push(cmd),
            Expression::Function { args, .. } => {
                for a in args {
                    a.collect_subqueries(out);
                }
            }
            Expression::Aggregate { arg: Some(a), .. } => a.collect_subqueries(out),
            _ => {}
        }
    }

    /// Rewrite element references through a symbol map, replacing any mapped
    /// element with its target expression. Unmapped references are kept.
    pub fn rewrite(&self, map: &[(ElementSymbol, Expression)]) -> Expression {
        match self {
            Expression::Element(e) => {
                for (from, to) in map {
                    if from == e {
                        return to.clone();
                    }
                }
                self.clone()
            }
            Expression::Function { name, args } => Expression::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.rewrite(map)).collect(),
            },
            Expression::Aggregate {
                function,
                distinct,
                arg,
            } => Expression::Aggregate {
                function: *function,
                distinct: *distinct,
                arg: arg.as_ref().map(|a| Box::new(a.rewrite(map))),
            },
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Element(e) => write!(f, "{}", e),
            Expression::Literal(l) => write!(f, "{}", l),
            Expression::Function { name, args } => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Expression::Aggregate {
                function,
                distinct,
                arg,
            } => {
                write!(f, "{}(", function.name())?;
                if *distinct {
                    write!(f, "DISTINCT ")?;
                }
                match arg {
                    Some(a) => write!(f, "{}", a)?,
                    None => write!(f, "*")?,
                }
                write!(f, ")")
            }
            Expression::ScalarSubquery(cmd) => write!(f, "({})", cmd),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Criteria {
    Comparison {
        left: Expression,
        op: ComparisonOp,
        right: Expression,
    },
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    Not(Box<Criteria>),
    IsNull {
        expr: Expression,
        negated: bool,
    },
    In {
        expr: Expression,
        list: Vec<Expression>,
        negated: bool,
    },
    SubqueryIn {
        expr: Expression,
        command: Box<Command>,
        negated: bool,
    },
    Exists {
        command: Box<Command>,
        negated: bool,
    },
}

impl Criteria {
    pub fn compare(left: Expression, op: ComparisonOp, right: Expression) -> Self {
        Criteria::Comparison { left, op, right }
    }

    /// Split a criteria tree into its top-level AND conjuncts.
    pub fn separate_by_and(self) -> Vec<Criteria> {
        match self {
            Criteria::And(parts) => parts
                .into_iter()
                .flat_map(Criteria::separate_by_and)
                .collect(),
            other => vec![other],
        }
    }

    /// Rebuild one criteria from a conjunct list.
    pub fn combine_with_and(mut parts: Vec<Criteria>) -> Option<Criteria> {
        match parts.len() {
            0 => None,
            1 => Some(parts.remove(0)),
            _ => Some(Criteria::And(parts)),
        }
    }

    /// A comparison of a literal against itself carries no information and
    /// can be dropped by CleanCriteria.
    pub fn is_trivially_true(&self) -> bool {
        match self {
            Criteria::Comparison {
                left: Expression::Literal(l),
                op: ComparisonOp::Eq,
                right: Expression::Literal(r),
            } => l == r,
            Criteria::And(parts) => parts.iter().all(Criteria::is_trivially_true),
            _ => false,
        }
    }

    /// True when the criteria is or contains an aggregate call.
    pub fn references_aggregate(&self) -> bool {
        match self {
            Criteria::Comparison { left, right, .. } => {
                left.is_aggregate() || right.is_aggregate()
            }
            Criteria::And(parts) | Criteria::Or(parts) => {
                parts.iter().any(Criteria::references_aggregate)
            }
            Criteria::Not(inner) => inner.references_aggregate(),
            Criteria::IsNull { expr, .. } => expr.is_aggregate(),
            Criteria::In { expr, list, .. } => {
                expr.is_aggregate() || list.iter().any(Expression::is_aggregate)
            }
            Criteria::SubqueryIn { expr, .. } => expr.is_aggregate(),
            Criteria::Exists { .. } => false,
        }
    }

    /// Collect the group names this criteria references (subqueries excluded).
    pub fn collect_groups(&self, out: &mut Vec<String>) {
        match self {
            Criteria::Comparison { left, right, .. } => {
                left.collect_groups(out);
                right.collect_groups(out);
            }
            Criteria::And(parts) | Criteria::Or(parts) => {
                for p in parts {
                    p.collect_groups(out);
                }
            }
            Criteria::Not(inner) => inner.collect_groups(out),
            Criteria::IsNull { expr, .. } => expr.collect_groups(out),
            Criteria::In { expr, list, .. } => {
                expr.collect_groups(out);
                for e in list {
                    e.collect_groups(out);
                }
            }
            Criteria::SubqueryIn { expr, .. } => expr.collect_groups(out),
            Criteria::Exists { .. } => {}
        }
    }

    /// Collect every element symbol referenced by this criteria, subqueries
    /// excluded.
    pub fn collect_elements(&self, out: &mut Vec<ElementSymbol>) {
        match self {
            Criteria::Comparison { left, right, .. } => {
                left.collect_elements(out);
                right.collect_elements(out);
            }
            Criteria::And(parts) | Criteria::Or(parts) => {
                for p in parts {
                    p.collect_elements(out);
                }
            }
            Criteria::Not(inner) => inner.collect_elements(out),
            Criteria::IsNull { expr, .. } => expr.collect_elements(out),
            Criteria::In { expr, list, .. } => {
                expr.collect_elements(out);
                for e in list {
                    e.collect_elements(out);
                }
            }
            Criteria::SubqueryIn { expr, .. } => expr.collect_elements(out),
            Criteria::Exists { .. } => {}
        }
    }

    /// Collect nested commands used as criteria subqueries.
    pub fn collect_subqueries<'a>(&'a self, out: &mut Vec<&'a Command>) {
        match self {
            Criteria::Comparison { left, right, .. } => {
                left.collect_subqueries(out);
                right.collect_subqueries(out);
            }
            Criteria::And(parts) | Criteria::Or(parts) => {
                for p in parts {
                    p.collect_subqueries(out);
                }
            }
            Criteria::Not(inner) => inner.collect_subqueries(out),
            Criteria::IsNull { expr, .. } => expr.collect_subqueries(out),
            Criteria::In { expr, list, .. } => {
                expr.collect_subqueries(out);
                for e in list {
                    e.collect_subqueries(out);
                }
            }
            Criteria::SubqueryIn { expr, command, .. } => {
                expr.collect_subqueries(out);
                out.push(command);
            }
            Criteria::Exists { command, .. } => out.push(command),
        }
    }

    /// Rewrite element references through a symbol map.
    pub fn rewrite(&self, map: &[(ElementSymbol, Expression)]) -> Criteria {
        match self {
            Criteria::Comparison { left, op, right } => Criteria::Comparison {
                left: left.rewrite(map),
                op: *op,
                right: right.rewrite(map),
            },
            Criteria::And(parts) => {
                Criteria::And(parts.iter().map(|p| p.rewrite(map)).collect())
            }
            Criteria::Or(parts) => Criteria::Or(parts.iter().map(|p| p.rewrite(map)).collect()),
            Criteria::Not(inner) => Criteria::Not(Box::new(inner.rewrite(map))),
            Criteria::IsNull { expr, negated } => Criteria::IsNull {
                expr: expr.rewrite(map),
                negated: *negated,
            },
            Criteria::In {
                expr,
                list,
                negated,
            } => Criteria::In {
                expr: expr.rewrite(map),
                list: list.iter().map(|e| e.rewrite(map)).collect(),
                negated: *negated,
            },
            other => other.clone(),
        }
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criteria::Comparison { left, op, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            Criteria::And(parts) => {
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "({})", p)?;
                }
                Ok(())
            }
            Criteria::Or(parts) => {
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " OR ")?;
                    }
                    write!(f, "({})", p)?;
                }
                Ok(())
            }
            Criteria::Not(inner) => write!(f, "NOT ({})", inner),
            Criteria::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Criteria::In {
                expr,
                list,
                negated,
            } => {
                write!(f, "{} {}IN (", expr, if *negated { "NOT " } else { "" })?;
                for (i, e) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, ")")
            }
            Criteria::SubqueryIn {
                expr,
                command,
                negated,
            } => write!(
                f,
                "{} {}IN ({})",
                expr,
                if *negated { "NOT " } else { "" },
                command
            ),
            Criteria::Exists { command, negated } => {
                write!(f, "{}EXISTS ({})", if *negated { "NOT " } else { "" }, command)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByItem {
    pub expression: Expression,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub items: Vec<OrderByItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub row_limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Limit {
    /// TUPLE_LIMIT nodes are only created when one of the two is set.
    pub fn is_empty(&self) -> bool {
        self.row_limit.is_none() && self.offset.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub distinct: bool,
    pub symbols: Vec<Expression>,
}

/// OPTIONAL / MAKE DEP / MAKE NOT DEP flags carried on a from-clause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromHints {
    pub optional: bool,
    pub make_dep: bool,
    pub make_not_dep: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FromClause {
    /// A plain table/view reference.
    Unary {
        group: GroupSymbol,
        hints: FromHints,
    },
    /// An inline view: `(SELECT ...) AS g`.
    Subquery {
        group: GroupSymbol,
        command: Box<Command>,
        hints: FromHints,
    },
    /// A join predicate between two from-clauses.
    Join(Box<JoinPredicate>),
}

impl FromClause {
    pub fn hints(&self) -> FromHints {
        match self {
            FromClause::Unary { hints, .. } | FromClause::Subquery { hints, .. } => *hints,
            FromClause::Join(jp) => jp.hints,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPredicate {
    pub left: FromClause,
    pub right: FromClause,
    pub join_type: JoinType,
    pub criteria: Vec<Criteria>,
    pub hints: FromHints,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Cross,
    LeftOuter,
    RightOuter,
    FullOuter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct From {
    pub clauses: Vec<FromClause>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub select: Select,
    /// SELECT INTO target.
    pub into: Option<GroupSymbol>,
    pub from: Option<From>,
    pub criteria: Option<Criteria>,
    pub group_by: Vec<Expression>,
    pub having: Option<Criteria>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<Limit>,
}

impl Query {
    /// Minimal query over one group projecting the given symbols.
    pub fn simple(group: GroupSymbol, symbols: Vec<Expression>) -> Self {
        Query {
            select: Select {
                distinct: false,
                symbols,
            },
            into: None,
            from: Some(From {
                clauses: vec![FromClause::Unary {
                    group,
                    hints: FromHints::default(),
                }],
            }),
            criteria: None,
            group_by: Vec::new(),
            having: None,
            order_by: None,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOpType {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetQuery {
    pub op: SetOpType,
    pub all: bool,
    pub left: Box<Command>,
    pub right: Box<Command>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<Limit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insert {
    pub group: GroupSymbol,
    pub columns: Vec<ElementSymbol>,
    pub values: Vec<Expression>,
    /// INSERT ... SELECT carries the query as its single sub-command.
    pub query: Option<Box<Command>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub group: GroupSymbol,
    pub changes: Vec<(ElementSymbol, Expression)>,
    pub criteria: Option<Criteria>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delete {
    pub group: GroupSymbol,
    pub criteria: Option<Criteria>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Create {
    pub group: GroupSymbol,
    pub columns: Vec<ElementSymbol>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drop {
    pub group: GroupSymbol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProcedure {
    pub name: String,
    pub group: GroupSymbol,
    pub parameters: Vec<Expression>,
    /// True when the call produces a relational result set.
    pub relational: bool,
    /// True for update procedures (excluded as merge targets).
    pub update_proc: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureBody {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Query(Query),
    SetQuery(SetQuery),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Create(Create),
    Drop(Drop),
    StoredProcedure(StoredProcedure),
    ProcedureBody(ProcedureBody),
}

impl Command {
    /// Nested commands embedded directly in this command (one level deep).
    pub fn sub_commands(&self) -> Vec<&Command> {
        match self {
            Command::Query(q) => {
                let mut out = Vec::new();
                for s in &q.select.symbols {
                    s.collect_subqueries(&mut out);
                }
                if let Some(c) = &q.criteria {
                    c.collect_subqueries(&mut out);
                }
                if let Some(h) = &q.having {
                    h.collect_subqueries(&mut out);
                }
                if let Some(from) = &q.from {
                    for clause in &from.clauses {
                        collect_from_subqueries(clause, &mut out);
                    }
                }
                out
            }
            Command::SetQuery(sq) => vec![&sq.left, &sq.right],
            Command::Insert(i) => i.query.iter().map(|q| q.as_ref()).collect(),
            Command::Update(u) => {
                let mut out = Vec::new();
                if let Some(c) = &u.criteria {
                    c.collect_subqueries(&mut out);
                }
                out
            }
            Command::Delete(d) => {
                let mut out = Vec::new();
                if let Some(c) = &d.criteria {
                    c.collect_subqueries(&mut out);
                }
                out
            }
            Command::ProcedureBody(b) => b.commands.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Commands used by this command as scalar or criteria subqueries. Such
    /// children are executed separately and never merged into the parent plan.
    pub fn subquery_containers(&self) -> Vec<&Command> {
        let mut out = Vec::new();
        match self {
            Command::Query(q) => {
                for s in &q.select.symbols {
                    s.collect_subqueries(&mut out);
                }
                if let Some(c) = &q.criteria {
                    c.collect_subqueries(&mut out);
                }
                if let Some(h) = &q.having {
                    h.collect_subqueries(&mut out);
                }
            }
            Command::Update(u) => {
                if let Some(c) = &u.criteria {
                    c.collect_subqueries(&mut out);
                }
            }
            Command::Delete(d) => {
                if let Some(c) = &d.criteria {
                    c.collect_subqueries(&mut out);
                }
            }
            _ => {}
        }
        out
    }

    /// Projected symbol list of this command, empty for pure updates.
    pub fn projected_symbols(&self) -> Vec<Expression> {
        match self {
            Command::Query(q) => q.select.symbols.clone(),
            Command::SetQuery(sq) => sq.left.projected_symbols(),
            Command::StoredProcedure(_) => Vec::new(),
            _ => Vec::new(),
        }
    }

    pub fn is_update_command(&self) -> bool {
        matches!(
            self,
            Command::Insert(_)
                | Command::Update(_)
                | Command::Delete(_)
                | Command::Create(_)
                | Command::Drop(_)
        )
    }
}

fn collect_from_subqueries<'a>(clause: &'a FromClause, out: &mut Vec<&'a Command>) {
    match clause {
        FromClause::Subquery { command, .. } => out.push(command),
        FromClause::Join(jp) => {
            collect_from_subqueries(&jp.left, out);
            collect_from_subqueries(&jp.right, out);
        }
        FromClause::Unary { .. } => {}
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Query(q) => {
                write!(f, "SELECT ")?;
                if q.select.distinct {
                    write!(f, "DISTINCT ")?;
                }
                for (i, s) in q.select.symbols.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", s)?;
                }
                if let Some(into) = &q.into {
                    write!(f, " INTO {}", into)?;
                }
                if let Some(from) = &q.from {
                    write!(f, " FROM ")?;
                    for (i, c) in from.clauses.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        fmt_from_clause(c, f)?;
                    }
                }
                if let Some(c) = &q.criteria {
                    write!(f, " WHERE {}", c)?;
                }
                if !q.group_by.is_empty() {
                    write!(f, " GROUP BY ")?;
                    for (i, g) in q.group_by.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", g)?;
                    }
                }
                if let Some(h) = &q.having {
                    write!(f, " HAVING {}", h)?;
                }
                if let Some(ob) = &q.order_by {
                    write!(f, " ORDER BY ")?;
                    for (i, item) in ob.items.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(
                            f,
                            "{}{}",
                            item.expression,
                            if item.direction == SortDirection::Descending {
                                " DESC"
                            } else {
                                ""
                            }
                        )?;
                    }
                }
                if let Some(l) = &q.limit {
                    if let Some(n) = l.row_limit {
                        write!(f, " LIMIT {}", n)?;
                    }
                    if let Some(o) = l.offset {
                        write!(f, " OFFSET {}", o)?;
                    }
                }
                Ok(())
            }
            Command::SetQuery(sq) => {
                let op = match sq.op {
                    SetOpType::Union => "UNION",
                    SetOpType::Intersect => "INTERSECT",
                    SetOpType::Except => "EXCEPT",
                };
                write!(
                    f,
                    "({}) {}{} ({})",
                    sq.left,
                    op,
                    if sq.all { " ALL" } else { "" },
                    sq.right
                )
            }
            Command::Insert(i) => write!(f, "INSERT INTO {}", i.group),
            Command::Update(u) => write!(f, "UPDATE {}", u.group),
            Command::Delete(d) => write!(f, "DELETE FROM {}", d.group),
            Command::Create(c) => write!(f, "CREATE TABLE {}", c.group),
            Command::Drop(d) => write!(f, "DROP TABLE {}", d.group),
            Command::StoredProcedure(sp) => write!(f, "EXEC {}", sp.name),
            Command::ProcedureBody(_) => write!(f, "BEGIN ... END"),
        }
    }
}

fn fmt_from_clause(clause: &FromClause, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match clause {
        FromClause::Unary { group, .. } => write!(f, "{}", group),
        FromClause::Subquery { group, command, .. } => {
            write!(f, "({}) AS {}", command, group.name)
        }
        FromClause::Join(jp) => {
            let kw = match jp.join_type {
                JoinType::Inner => "JOIN",
                JoinType::Cross => "CROSS JOIN",
                JoinType::LeftOuter => "LEFT OUTER JOIN",
                JoinType::RightOuter => "RIGHT OUTER JOIN",
                JoinType::FullOuter => "FULL OUTER JOIN",
            };
            fmt_from_clause(&jp.left, f)?;
            write!(f, " {} ", kw)?;
            fmt_from_clause(&jp.right, f)?;
            if !jp.criteria.is_empty() {
                write!(f, " ON ")?;
                for (i, c) in jp.criteria.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{}", c)?;
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(group: &str, name: &str, id: u32) -> ElementSymbol {
        ElementSymbol::new(group, name, ElementId(id), DataType::Integer)
    }

    #[test]
    fn separate_by_and_flattens_nested_conjuncts() {
        let a = Criteria::compare(
            Expression::Element(elem("A", "a1", 1)),
            ComparisonOp::Eq,
            Expression::Literal(Literal::Integer(1)),
        );
        let b = Criteria::compare(
            Expression::Element(elem("A", "a2", 2)),
            ComparisonOp::Gt,
            Expression::Literal(Literal::Integer(2)),
        );
        let c = Criteria::IsNull {
            expr: Expression::Element(elem("B", "b1", 3)),
            negated: false,
        };

        let tree = Criteria::And(vec![a.clone(), Criteria::And(vec![b.clone(), c.clone()])]);
        let parts = tree.separate_by_and();
        assert_eq!(parts, vec![a, b, c]);
    }

    #[test]
    fn combine_with_and_round_trips() {
        let a = Criteria::compare(
            Expression::Element(elem("A", "a1", 1)),
            ComparisonOp::Eq,
            Expression::Literal(Literal::Integer(1)),
        );
        assert_eq!(Criteria::combine_with_and(vec![]), None);
        assert_eq!(
            Criteria::combine_with_and(vec![a.clone()]),
            Some(a.clone())
        );
        let combined = Criteria::combine_with_and(vec![a.clone(), a.clone()]).unwrap();
        assert_eq!(combined.separate_by_and().len(), 2);
    }

    #[test]
    fn aggregate_detection_recurses_into_functions() {
        let agg = Expression::Aggregate {
            function: AggregateFunction::Sum,
            distinct: false,
            arg: Some(Box::new(Expression::Element(elem("A", "a1", 1)))),
        };
        let wrapped = Expression::Function {
            name: "ROUND".to_string(),
            args: vec![agg],
        };
        assert!(wrapped.is_aggregate());
        assert!(!Expression::Element(elem("A", "a1", 1)).is_aggregate());
    }

    #[test]
    fn aggregate_function_names_are_case_insensitive() {
        assert!(is_aggregate_function_name("count"));
        assert!(is_aggregate_function_name("SUM"));
        assert!(!is_aggregate_function_name("ROUND"));
    }

    #[test]
    fn group_symbol_matches_alias_target() {
        let g = GroupSymbol::aliased("x", "pm1.A", GroupId(1));
        assert!(g.matches_name("X"));
        assert!(g.matches_name("PM1.A"));
        assert!(!g.matches_name("pm1.B"));
    }

    #[test]
    fn rewrite_maps_elements_through_symbol_map() {
        let from = elem("V", "c1", 10);
        let to = Expression::Element(elem("A", "a1", 1));
        let map = vec![(from.clone(), to.clone())];

        let expr = Expression::Function {
            name: "ABS".to_string(),
            args: vec![Expression::Element(from)],
        };
        let rewritten = expr.rewrite(&map);
        assert_eq!(
            rewritten,
            Expression::Function {
                name: "ABS".to_string(),
                args: vec![to],
            }
        );
    }

    #[test]
    fn trivially_true_comparison_is_detected() {
        let c = Criteria::compare(
            Expression::Literal(Literal::Integer(1)),
            ComparisonOp::Eq,
            Expression::Literal(Literal::Integer(1)),
        );
        assert!(c.is_trivially_true());
        let c2 = Criteria::compare(
            Expression::Literal(Literal::Integer(1)),
            ComparisonOp::Eq,
            Expression::Literal(Literal::Integer(2)),
        );
        assert!(!c2.is_trivially_true());
    }
}
