// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Canonical plan builder - converts resolved commands into logical plans
//!
//! First phase of compilation: a direct, unoptimized translation of the
//! command into the node IR. Clause attachment follows SQL logical evaluation
//! order (join, filter, group, having, project, distinct, order, limit)
//! regardless of source-text clause order, so each node kind appears at most
//! once per query block and later pattern matching stays simple.

use crate::ast::{
    Command, Criteria, Expression, From, FromClause, Query, SetQuery, StoredProcedure,
};
use crate::plan::ids::IdGenerator;
use crate::plan::operators::logical::{
    GroupPayload, JoinPayload, LimitPayload, NodePayload, NodeId, PlanArena, ProjectPayload,
    SelectPayload, SortPayload, SourcePayload,
};
use crate::plan::{PlanHints, PlanningError};

/// Builder for the initial, unoptimized logical plan of one command.
pub struct CanonicalPlanner<'a> {
    ids: &'a mut IdGenerator,
}

impl<'a> CanonicalPlanner<'a> {
    pub fn new(ids: &'a mut IdGenerator) -> Self {
        Self { ids }
    }

    /// Build the canonical plan, recording the hints the command implies.
    pub fn build(
        &mut self,
        command: &Command,
        hints: &mut PlanHints,
    ) -> Result<PlanArena, PlanningError> {
        let mut arena = PlanArena::new();
        let root = self.build_command(&mut arena, command, hints)?;
        arena.root = Some(root);
        arena.recompute_groups();
        Ok(arena)
    }

    fn build_command(
        &mut self,
        arena: &mut PlanArena,
        command: &Command,
        hints: &mut PlanHints,
    ) -> Result<NodeId, PlanningError> {
        match command {
            Command::Query(q) => self.build_query(arena, q, hints),
            Command::SetQuery(sq) => self.build_set_query(arena, sq, hints),
            Command::Insert(_)
            | Command::Update(_)
            | Command::Delete(_)
            | Command::Create(_)
            | Command::Drop(_) => {
                hints.is_update = true;
                Ok(self.build_atomic(arena, command))
            }
            Command::StoredProcedure(sp) => Ok(self.build_procedure(arena, command, sp, hints)),
            Command::ProcedureBody(_) => {
                hints.is_update = true;
                Ok(self.build_atomic(arena, command))
            }
        }
    }

    /// Updates and DDL become PROJECT over a SOURCE carrying the whole
    /// command as an atomic pushed unit.
    fn build_atomic(&mut self, arena: &mut PlanArena, command: &Command) -> NodeId {
        let group = match command {
            Command::Insert(i) => i.group.clone(),
            Command::Update(u) => u.group.clone(),
            Command::Delete(d) => d.group.clone(),
            Command::Create(c) => c.group.clone(),
            Command::Drop(d) => d.group.clone(),
            _ => crate::ast::GroupSymbol::new("<anonymous>", crate::ast::GroupId(u32::MAX)),
        };
        let mut payload = SourcePayload::new(group);
        payload.command = Some(command.clone());
        let subs = command.sub_commands();
        if let [only] = subs.as_slice() {
            payload.nested_command = Some(Box::new((*only).clone()));
        }
        let source = arena.add(NodePayload::Source(payload), self.ids.next_id());
        let project = arena.add(
            NodePayload::Project(ProjectPayload::default()),
            self.ids.next_id(),
        );
        arena.attach_child(project, source);
        project
    }

    fn build_procedure(
        &mut self,
        arena: &mut PlanArena,
        command: &Command,
        sp: &StoredProcedure,
        hints: &mut PlanHints,
    ) -> NodeId {
        if sp.relational {
            hints.has_relational_proc = true;
        }
        let mut payload = SourcePayload::new(sp.group.clone());
        payload.command = Some(command.clone());
        let source = arena.add(NodePayload::Source(payload), self.ids.next_id());
        let project = arena.add(
            NodePayload::Project(ProjectPayload::default()),
            self.ids.next_id(),
        );
        arena.attach_child(project, source);
        project
    }

    fn build_set_query(
        &mut self,
        arena: &mut PlanArena,
        sq: &SetQuery,
        hints: &mut PlanHints,
    ) -> Result<NodeId, PlanningError> {
        hints.has_set_query = true;

        let left = self.build_command(arena, &sq.left, hints)?;
        let right = self.build_command(arena, &sq.right, hints)?;
        let set_op = arena.add(
            NodePayload::SetOp(crate::plan::operators::logical::SetOpPayload {
                op: sq.op,
                use_all: sq.all,
            }),
            self.ids.next_id(),
        );
        arena.attach_child(set_op, left);
        arena.attach_child(set_op, right);

        let mut top = set_op;
        if let Some(ob) = &sq.order_by {
            hints.has_sort = true;
            let sort = arena.add(
                NodePayload::Sort(SortPayload {
                    keys: ob.items.clone(),
                    is_dup_removal: false,
                    has_unrelated: false,
                }),
                self.ids.next_id(),
            );
            arena.attach_child(sort, top);
            top = sort;
        }
        if let Some(limit) = &sq.limit {
            if !limit.is_empty() {
                hints.has_limit = true;
                let l = arena.add(
                    NodePayload::TupleLimit(LimitPayload {
                        row_limit: limit.row_limit,
                        offset: limit.offset,
                    }),
                    self.ids.next_id(),
                );
                arena.attach_child(l, top);
                top = l;
            }
        }
        Ok(top)
    }

    fn build_query(
        &mut self,
        arena: &mut PlanArena,
        query: &Query,
        hints: &mut PlanHints,
    ) -> Result<NodeId, PlanningError> {
        // FROM, or a NULL leaf for from-less queries
        let mut top = match &query.from {
            Some(from) => self.build_from(arena, from, hints)?,
            None => arena.add(NodePayload::Null, self.ids.next_id()),
        };

        // WHERE: one SELECT per top-level AND conjunct
        if let Some(criteria) = &query.criteria {
            hints.has_criteria = true;
            for conjunct in criteria.clone().separate_by_and() {
                let select = arena.add(
                    NodePayload::Select(SelectPayload {
                        criteria: conjunct,
                        is_having: false,
                        correlated: Vec::new(),
                    }),
                    self.ids.next_id(),
                );
                arena.attach_child(select, top);
                top = select;
            }
        }

        // GROUP when grouped, filtered on groups, or implicitly aggregated
        let select_has_aggregates = query.select.symbols.iter().any(Expression::is_aggregate);
        let needs_group =
            !query.group_by.is_empty() || query.having.is_some() || select_has_aggregates;
        if needs_group {
            hints.has_aggregates = true;
            let mut aggregates = Vec::new();
            for s in &query.select.symbols {
                collect_aggregates(s, &mut aggregates);
            }
            if let Some(h) = &query.having {
                collect_criteria_aggregates(h, &mut aggregates);
            }
            let group = arena.add(
                NodePayload::Group(GroupPayload {
                    cols: query.group_by.clone(),
                    aggregates,
                }),
                self.ids.next_id(),
            );
            arena.attach_child(group, top);
            top = group;
        }

        // HAVING: conjunct-split SELECTs above the GROUP
        if let Some(having) = &query.having {
            hints.has_criteria = true;
            for conjunct in having.clone().separate_by_and() {
                let is_having = conjunct.references_aggregate();
                let select = arena.add(
                    NodePayload::Select(SelectPayload {
                        criteria: conjunct,
                        is_having,
                        correlated: Vec::new(),
                    }),
                    self.ids.next_id(),
                );
                arena.attach_child(select, top);
                top = select;
            }
        }

        // PROJECT
        let project = arena.add(
            NodePayload::Project(ProjectPayload {
                cols: query.select.symbols.clone(),
                into_group: None,
                correlated: Vec::new(),
            }),
            self.ids.next_id(),
        );
        arena.attach_child(project, top);
        top = project;

        // DISTINCT
        if query.select.distinct {
            let dup = arena.add(NodePayload::DupRemove, self.ids.next_id());
            arena.attach_child(dup, top);
            top = dup;
        }

        // ORDER BY
        if let Some(ob) = &query.order_by {
            hints.has_sort = true;
            let has_unrelated = ob
                .items
                .iter()
                .any(|item| !query.select.symbols.contains(&item.expression));
            let sort = arena.add(
                NodePayload::Sort(SortPayload {
                    keys: ob.items.clone(),
                    is_dup_removal: false,
                    has_unrelated,
                }),
                self.ids.next_id(),
            );
            arena.attach_child(sort, top);
            top = sort;
        }

        // LIMIT/OFFSET: omitted when neither is set
        if let Some(limit) = &query.limit {
            if !limit.is_empty() {
                hints.has_limit = true;
                let l = arena.add(
                    NodePayload::TupleLimit(LimitPayload {
                        row_limit: limit.row_limit,
                        offset: limit.offset,
                    }),
                    self.ids.next_id(),
                );
                arena.attach_child(l, top);
                top = l;
            }
        }

        // SELECT INTO re-wraps the whole plan under a new SOURCE + PROJECT
        if let Some(into) = &query.into {
            hints.is_update = true;
            let source = arena.add(
                NodePayload::Source(SourcePayload::new(into.clone())),
                self.ids.next_id(),
            );
            arena.attach_child(source, top);
            let project = arena.add(
                NodePayload::Project(ProjectPayload {
                    cols: query.select.symbols.clone(),
                    into_group: Some(into.clone()),
                    correlated: Vec::new(),
                }),
                self.ids.next_id(),
            );
            arena.attach_child(project, source);
            top = project;
        }

        Ok(top)
    }

    /// Left-fold the from list into CROSS joins until one predicate tree
    /// remains, then convert it recursively. Deterministic, never cost-based.
    fn build_from(
        &mut self,
        arena: &mut PlanArena,
        from: &From,
        hints: &mut PlanHints,
    ) -> Result<NodeId, PlanningError> {
        if from.clauses.is_empty() {
            return Err(PlanningError::Planner("empty FROM clause".to_string()));
        }
        let mut clauses = from.clauses.clone();
        while clauses.len() > 1 {
            let right = clauses.remove(1);
            let left = clauses.remove(0);
            clauses.insert(
                0,
                FromClause::Join(Box::new(crate::ast::JoinPredicate {
                    left,
                    right,
                    join_type: crate::ast::JoinType::Cross,
                    criteria: Vec::new(),
                    hints: crate::ast::FromHints::default(),
                })),
            );
        }
        self.convert_clause(arena, &clauses[0], hints)
    }

    fn convert_clause(
        &mut self,
        arena: &mut PlanArena,
        clause: &FromClause,
        hints: &mut PlanHints,
    ) -> Result<NodeId, PlanningError> {
        match clause {
            FromClause::Unary { group, hints: fh } => {
                let mut payload = SourcePayload::new(group.clone());
                payload.make_dep = fh.make_dep;
                payload.make_not_dep = fh.make_not_dep;
                payload.optional = fh.optional;
                if fh.optional {
                    hints.has_optional_join = true;
                }
                Ok(arena.add(NodePayload::Source(payload), self.ids.next_id()))
            }
            FromClause::Subquery {
                group,
                command,
                hints: fh,
            } => {
                let mut payload = SourcePayload::new(group.clone());
                payload.command = Some((**command).clone());
                payload.make_dep = fh.make_dep;
                payload.make_not_dep = fh.make_not_dep;
                payload.optional = fh.optional;
                if fh.optional {
                    hints.has_optional_join = true;
                }
                Ok(arena.add(NodePayload::Source(payload), self.ids.next_id()))
            }
            FromClause::Join(jp) => {
                hints.has_join = true;
                let left = self.convert_clause(arena, &jp.left, hints)?;
                let right = self.convert_clause(arena, &jp.right, hints)?;

                let mut payload = JoinPayload::new(jp.join_type);
                payload.criteria = jp.criteria.clone();
                payload.optional = jp.hints.optional;
                if jp.hints.optional || jp.join_type == crate::ast::JoinType::LeftOuter {
                    hints.has_optional_join = true;
                }
                if !jp.criteria.is_empty() {
                    hints.has_criteria = true;
                }

                let join = arena.add(NodePayload::Join(payload), self.ids.next_id());
                arena.attach_child(join, left);
                arena.attach_child(join, right);
                Ok(join)
            }
        }
    }
}

fn collect_aggregates(expr: &Expression, out: &mut Vec<Expression>) {
    match expr {
        Expression::Aggregate { .. } => {
            if !out.contains(expr) {
                out.push(expr.clone());
            }
        }
        Expression::Function { args, .. } => {
            for a in args {
                collect_aggregates(a, out);
            }
        }
        _ => {}
    }
}

fn collect_criteria_aggregates(criteria: &Criteria, out: &mut Vec<Expression>) {
    match criteria {
        Criteria::Comparison { left, right, .. } => {
            collect_aggregates(left, out);
            collect_aggregates(right, out);
        }
        Criteria::And(parts) | Criteria::Or(parts) => {
            for p in parts {
                collect_criteria_aggregates(p, out);
            }
        }
        Criteria::Not(inner) => collect_criteria_aggregates(inner, out),
        Criteria::IsNull { expr, .. } => collect_aggregates(expr, out),
        Criteria::In { expr, list, .. } => {
            collect_aggregates(expr, out);
            for e in list {
                collect_aggregates(e, out);
            }
        }
        Criteria::SubqueryIn { expr, .. } => collect_aggregates(expr, out),
        Criteria::Exists { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        AggregateFunction, ComparisonOp, DataType, Delete, ElementId, ElementSymbol, FromHints,
        GroupId, GroupSymbol, Insert, Limit, Literal, OrderBy, OrderByItem, Select, SortDirection,
    };
    use crate::plan::operators::logical::NodeKind;

    fn group(name: &str, id: u32) -> GroupSymbol {
        GroupSymbol::new(name, GroupId(id))
    }

    fn elem(g: &str, name: &str, id: u32) -> Expression {
        Expression::Element(ElementSymbol::new(g, name, ElementId(id), DataType::Integer))
    }

    fn build(command: &Command) -> (PlanArena, PlanHints) {
        let mut ids = IdGenerator::new();
        let mut hints = PlanHints::new();
        let arena = CanonicalPlanner::new(&mut ids)
            .build(command, &mut hints)
            .unwrap();
        (arena, hints)
    }

    /// Chain of node kinds from the root down, following first children.
    fn kind_chain(arena: &PlanArena) -> Vec<NodeKind> {
        let mut out = Vec::new();
        let mut cur = arena.root;
        while let Some(id) = cur {
            out.push(arena.node(id).kind);
            cur = arena.node(id).children.first().copied();
        }
        out
    }

    #[test]
    fn delete_builds_project_over_atomic_source() {
        let cmd = Command::Delete(Delete {
            group: group("pm1.A", 0),
            criteria: None,
        });
        let (arena, hints) = build(&cmd);

        assert!(hints.is_update);
        assert_eq!(kind_chain(&arena), vec![NodeKind::Project, NodeKind::Source]);
        let source = arena.find_first(NodeKind::Source).unwrap();
        let payload = arena.node(source).source().unwrap();
        assert_eq!(payload.command, Some(cmd));
        assert!(payload.nested_command.is_none());
    }

    #[test]
    fn insert_with_query_attaches_its_single_nested_command() {
        let cols =
            vec![ElementSymbol::new("pm1.A", "a1", ElementId(1), DataType::Integer)];
        let query = Command::Query(Query::simple(group("pm1.B", 1), vec![elem("pm1.B", "b1", 2)]));
        let with_query = Command::Insert(Insert {
            group: group("pm1.A", 0),
            columns: cols.clone(),
            values: vec![],
            query: Some(Box::new(query.clone())),
        });
        let (arena, hints) = build(&with_query);

        assert!(hints.is_update);
        let source = arena.find_first(NodeKind::Source).unwrap();
        let payload = arena.node(source).source().unwrap();
        assert_eq!(payload.command, Some(with_query));
        assert_eq!(payload.nested_command.as_deref(), Some(&query));

        let plain = Command::Insert(Insert {
            group: group("pm1.A", 0),
            columns: cols,
            values: vec![Expression::Literal(Literal::Integer(1))],
            query: None,
        });
        let (arena, _) = build(&plain);
        let source = arena.find_first(NodeKind::Source).unwrap();
        assert!(arena.node(source).source().unwrap().nested_command.is_none());
    }

    #[test]
    fn relational_procedure_sets_hint() {
        let cmd = Command::StoredProcedure(StoredProcedure {
            name: "getA".to_string(),
            group: group("pm1.getA", 0),
            parameters: vec![],
            relational: true,
            update_proc: false,
        });
        let (_, hints) = build(&cmd);
        assert!(hints.has_relational_proc);
    }

    #[test]
    fn full_query_attaches_in_fixed_order() {
        // WHERE + GROUP BY + HAVING + ORDER BY + LIMIT, all present
        let a1 = elem("A", "a1", 1);
        let query = Query {
            select: Select {
                distinct: false,
                symbols: vec![
                    a1.clone(),
                    Expression::Aggregate {
                        function: AggregateFunction::Count,
                        distinct: false,
                        arg: None,
                    },
                ],
            },
            into: None,
            from: Some(From {
                clauses: vec![FromClause::Unary {
                    group: group("A", 0),
                    hints: FromHints::default(),
                }],
            }),
            criteria: Some(Criteria::compare(
                a1.clone(),
                ComparisonOp::Gt,
                Expression::Literal(Literal::Integer(0)),
            )),
            group_by: vec![a1.clone()],
            having: Some(Criteria::compare(
                Expression::Aggregate {
                    function: AggregateFunction::Count,
                    distinct: false,
                    arg: None,
                },
                ComparisonOp::Gt,
                Expression::Literal(Literal::Integer(1)),
            )),
            order_by: Some(OrderBy {
                items: vec![OrderByItem {
                    expression: a1,
                    direction: SortDirection::Ascending,
                }],
            }),
            limit: Some(Limit {
                row_limit: Some(5),
                offset: None,
            }),
        };
        let (arena, hints) = build(&Command::Query(query));

        assert_eq!(
            kind_chain(&arena),
            vec![
                NodeKind::TupleLimit,
                NodeKind::Sort,
                NodeKind::Project,
                NodeKind::Select, // HAVING
                NodeKind::Group,
                NodeKind::Select, // WHERE
                NodeKind::Source,
            ]
        );
        assert!(hints.has_criteria && hints.has_aggregates && hints.has_sort && hints.has_limit);

        // the HAVING select references an aggregate and is flagged
        let selects = arena.find_all(NodeKind::Select);
        assert!(arena.node(selects[0]).select().unwrap().is_having);
        assert!(!arena.node(selects[1]).select().unwrap().is_having);
    }

    #[test]
    fn empty_limit_is_omitted() {
        let query = Query {
            limit: Some(Limit {
                row_limit: None,
                offset: None,
            }),
            ..Query::simple(group("A", 0), vec![elem("A", "a1", 1)])
        };
        let (arena, hints) = build(&Command::Query(query));
        assert!(arena.find_first(NodeKind::TupleLimit).is_none());
        assert!(!hints.has_limit);
    }

    #[test]
    fn from_list_folds_left_associated_cross_joins() {
        let query = Query {
            select: Select {
                distinct: false,
                symbols: vec![elem("A", "a1", 1)],
            },
            into: None,
            from: Some(From {
                clauses: vec![
                    FromClause::Unary {
                        group: group("A", 0),
                        hints: FromHints::default(),
                    },
                    FromClause::Unary {
                        group: group("B", 1),
                        hints: FromHints::default(),
                    },
                    FromClause::Unary {
                        group: group("C", 2),
                        hints: FromHints::default(),
                    },
                ],
            }),
            criteria: None,
            group_by: vec![],
            having: None,
            order_by: None,
            limit: None,
        };
        let (arena, _) = build(&Command::Query(query));

        // outer join: (A x B) x C - left child is itself a join, right is C
        let outer = arena.find_first(NodeKind::Join).unwrap();
        let outer_children = arena.node(outer).children.clone();
        assert_eq!(arena.node(outer_children[0]).kind, NodeKind::Join);
        assert_eq!(
            arena.node(outer_children[1]).source().unwrap().group.name,
            "C"
        );
        let inner_children = arena.node(outer_children[0]).children.clone();
        assert_eq!(
            arena.node(inner_children[0]).source().unwrap().group.name,
            "A"
        );
        assert_eq!(
            arena.node(inner_children[1]).source().unwrap().group.name,
            "B"
        );
    }

    #[test]
    fn select_into_rewraps_under_source_and_project() {
        let query = Query {
            into: Some(group("T", 9)),
            ..Query::simple(group("A", 0), vec![elem("A", "a1", 1)])
        };
        let (arena, hints) = build(&Command::Query(query));

        assert!(hints.is_update);
        let chain = kind_chain(&arena);
        assert_eq!(chain[0], NodeKind::Project);
        assert_eq!(chain[1], NodeKind::Source);
        assert_eq!(chain[2], NodeKind::Project);
        let root = arena.root.unwrap();
        assert_eq!(
            arena.node(root).project().unwrap().into_group,
            Some(group("T", 9))
        );
    }

    #[test]
    fn set_query_builds_set_op_with_sort_and_limit() {
        let left = Command::Query(Query::simple(group("A", 0), vec![elem("A", "a1", 1)]));
        let right = Command::Query(Query::simple(group("B", 1), vec![elem("B", "b1", 2)]));
        let cmd = Command::SetQuery(SetQuery {
            op: crate::ast::SetOpType::Union,
            all: false,
            left: Box::new(left),
            right: Box::new(right),
            order_by: None,
            limit: Some(Limit {
                row_limit: Some(3),
                offset: None,
            }),
        });
        let (arena, hints) = build(&cmd);

        assert!(hints.has_set_query && hints.has_limit);
        let chain = kind_chain(&arena);
        assert_eq!(chain[0], NodeKind::TupleLimit);
        assert_eq!(chain[1], NodeKind::SetOp);
        let set_op = arena.find_first(NodeKind::SetOp).unwrap();
        assert_eq!(arena.node(set_op).children.len(), 2);
    }

    #[test]
    fn left_outer_join_sets_optional_hint() {
        let query = Query {
            select: Select {
                distinct: false,
                symbols: vec![elem("A", "a1", 1)],
            },
            into: None,
            from: Some(From {
                clauses: vec![FromClause::Join(Box::new(crate::ast::JoinPredicate {
                    left: FromClause::Unary {
                        group: group("A", 0),
                        hints: FromHints::default(),
                    },
                    right: FromClause::Unary {
                        group: group("B", 1),
                        hints: FromHints::default(),
                    },
                    join_type: crate::ast::JoinType::LeftOuter,
                    criteria: vec![],
                    hints: FromHints::default(),
                }))],
            }),
            criteria: None,
            group_by: vec![],
            having: None,
            order_by: None,
            limit: None,
        };
        let (_, hints) = build(&Command::Query(query));
        assert!(hints.has_join);
        assert!(hints.has_optional_join);
    }
}
