// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Logical plan node IR shared by all compilation stages
//!
//! Nodes live in an arena and address each other by index. Parent links are
//! stored as indices too, which keeps upward traversal (hint distribution,
//! correlated-reference scoping) cheap without ownership cycles. The merger
//! and the optimizer rewire this structure freely; detached nodes simply
//! become unreachable.
//!
//! Invariants maintained by the arena operations: the reachable graph is a
//! tree (acyclic, single parent), child lists are ordered, and only SOURCE
//! nodes carry a nested command.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::ast::{
    Command, Criteria, ElementSymbol, Expression, GroupSymbol, JoinType, OrderByItem, SetOpType,
};
use crate::plan::operators::physical::ProcessorPlan;

/// Index of a node inside a [`PlanArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Project,
    Join,
    Access,
    Select,
    Sort,
    DupRemove,
    Group,
    Source,
    SetOp,
    TupleLimit,
    Null,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Project => "Project",
            NodeKind::Join => "Join",
            NodeKind::Access => "Access",
            NodeKind::Select => "Select",
            NodeKind::Sort => "Sort",
            NodeKind::DupRemove => "DupRemove",
            NodeKind::Group => "Group",
            NodeKind::Source => "Source",
            NodeKind::SetOp => "SetOp",
            NodeKind::TupleLimit => "TupleLimit",
            NodeKind::Null => "Null",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinStrategy {
    NestedLoop,
    Merge,
    PartitionedSort,
}

/// Opaque cost annotations. The formulas that produce them are not part of
/// this core; the numbers ride along for the execution engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub cardinality: Option<f64>,
    pub distinct_size: Option<f64>,
    pub dep_access_cardinality: Option<f64>,
    pub dep_join_cost: Option<f64>,
    pub join_cost: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectPayload {
    pub cols: Vec<Expression>,
    /// SELECT INTO target.
    pub into_group: Option<GroupSymbol>,
    pub correlated: Vec<GroupSymbol>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPayload {
    pub join_type: JoinType,
    pub strategy: JoinStrategy,
    pub criteria: Vec<Criteria>,
    /// Equi-join expressions for merge strategies, one per side, in order.
    pub left_exprs: Vec<Expression>,
    pub right_exprs: Vec<Expression>,
    pub optional: bool,
    /// Id the dependent side reads its IN-list values from.
    pub dependent_value_source: Option<String>,
    pub correlated: Vec<GroupSymbol>,
}

impl JoinPayload {
    pub fn new(join_type: JoinType) -> Self {
        Self {
            join_type,
            strategy: JoinStrategy::NestedLoop,
            criteria: Vec::new(),
            left_exprs: Vec::new(),
            right_exprs: Vec::new(),
            optional: false,
            dependent_value_source: None,
            correlated: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessPayload {
    pub groups: Vec<GroupSymbol>,
    /// Routing model name, pinned by PlaceAccess.
    pub model_name: Option<String>,
    /// Command pushed to the source, built by CollapseSource or carried in
    /// from an atomic update/procedure source.
    pub command: Option<Command>,
    pub is_dependent_set: bool,
    pub max_in_size: Option<usize>,
    /// Compiled sub-plan for procedure sources.
    pub sub_plan: Option<Box<ProcessorPlan>>,
    pub correlated_refs: Vec<ElementSymbol>,
    /// Dependent-join hints carried over from the originating source.
    pub make_dep: bool,
    pub make_not_dep: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectPayload {
    pub criteria: Criteria,
    pub is_having: bool,
    pub correlated: Vec<GroupSymbol>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SortPayload {
    pub keys: Vec<OrderByItem>,
    /// Combined sort + duplicate removal.
    pub is_dup_removal: bool,
    /// Sort keys reference expressions absent from the projection.
    pub has_unrelated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupPayload {
    pub cols: Vec<Expression>,
    pub aggregates: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePayload {
    pub group: GroupSymbol,
    /// Only SOURCE nodes may carry a nested command.
    pub command: Option<Command>,
    /// Column map recorded when a view plan is grafted beneath this node:
    /// the view's declared outputs, 1:1 and in order, to the sub-plan's
    /// projected symbols.
    pub symbol_map: Option<Vec<(ElementSymbol, Expression)>>,
    pub make_dep: bool,
    pub make_not_dep: bool,
    /// OPTIONAL from-clause hint, consumed by RemoveOptionalJoins.
    pub optional: bool,
    pub correlated: Vec<GroupSymbol>,
    /// Pre-compiled sub-plan wired in from the planning context before
    /// access placement.
    pub sub_plan: Option<Box<ProcessorPlan>>,
    /// Set only when the atomic command embeds exactly one sub-command
    /// (INSERT ... SELECT); a command with zero or several stays unattached.
    pub nested_command: Option<Box<Command>>,
}

impl SourcePayload {
    pub fn new(group: GroupSymbol) -> Self {
        Self {
            group,
            command: None,
            symbol_map: None,
            make_dep: false,
            make_not_dep: false,
            optional: false,
            correlated: Vec::new(),
            sub_plan: None,
            nested_command: None,
        }
    }

    /// Update procedures are excluded as merge targets.
    pub fn is_update_proc(&self) -> bool {
        match &self.command {
            Some(Command::StoredProcedure(sp)) => sp.update_proc,
            Some(cmd) => cmd.is_update_command(),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetOpPayload {
    pub op: SetOpType,
    pub use_all: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitPayload {
    pub row_limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Per-kind payload. The closed key set of each node kind lives in its own
/// struct rather than a dynamic property map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodePayload {
    Project(ProjectPayload),
    Join(JoinPayload),
    Access(AccessPayload),
    Select(SelectPayload),
    Sort(SortPayload),
    DupRemove,
    Group(GroupPayload),
    Source(SourcePayload),
    SetOp(SetOpPayload),
    TupleLimit(LimitPayload),
    Null,
}

impl NodePayload {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodePayload::Project(_) => NodeKind::Project,
            NodePayload::Join(_) => NodeKind::Join,
            NodePayload::Access(_) => NodeKind::Access,
            NodePayload::Select(_) => NodeKind::Select,
            NodePayload::Sort(_) => NodeKind::Sort,
            NodePayload::DupRemove => NodeKind::DupRemove,
            NodePayload::Group(_) => NodeKind::Group,
            NodePayload::Source(_) => NodeKind::Source,
            NodePayload::SetOp(_) => NodeKind::SetOp,
            NodePayload::TupleLimit(_) => NodeKind::TupleLimit,
            NodePayload::Null => NodeKind::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Compilation-unique id from the caller's [`IdGenerator`]; distinct from
    /// the arena index.
    pub plan_id: u32,
    pub kind: NodeKind,
    pub payload: NodePayload,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    /// Groups visible beneath this node (children's union plus own).
    pub groups: Vec<GroupSymbol>,
    pub output_cols: Option<Vec<Expression>>,
    pub stats: NodeStats,
}

impl PlanNode {
    pub fn source(&self) -> Option<&SourcePayload> {
        match &self.payload {
            NodePayload::Source(p) => Some(p),
            _ => None,
        }
    }

    pub fn source_mut(&mut self) -> Option<&mut SourcePayload> {
        match &mut self.payload {
            NodePayload::Source(p) => Some(p),
            _ => None,
        }
    }

    pub fn access(&self) -> Option<&AccessPayload> {
        match &self.payload {
            NodePayload::Access(p) => Some(p),
            _ => None,
        }
    }

    pub fn access_mut(&mut self) -> Option<&mut AccessPayload> {
        match &mut self.payload {
            NodePayload::Access(p) => Some(p),
            _ => None,
        }
    }

    pub fn join(&self) -> Option<&JoinPayload> {
        match &self.payload {
            NodePayload::Join(p) => Some(p),
            _ => None,
        }
    }

    pub fn join_mut(&mut self) -> Option<&mut JoinPayload> {
        match &mut self.payload {
            NodePayload::Join(p) => Some(p),
            _ => None,
        }
    }

    pub fn select(&self) -> Option<&SelectPayload> {
        match &self.payload {
            NodePayload::Select(p) => Some(p),
            _ => None,
        }
    }

    pub fn select_mut(&mut self) -> Option<&mut SelectPayload> {
        match &mut self.payload {
            NodePayload::Select(p) => Some(p),
            _ => None,
        }
    }

    pub fn project(&self) -> Option<&ProjectPayload> {
        match &self.payload {
            NodePayload::Project(p) => Some(p),
            _ => None,
        }
    }

    /// True when one of this node's groups matches `name`.
    pub fn has_group_named(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.matches_name(name))
    }
}

/// Arena of logical plan nodes. One arena per compilation unit; the merger
/// absorbs child arenas wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanArena {
    nodes: Vec<PlanNode>,
    pub root: Option<NodeId>,
}

impl PlanArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add(&mut self, payload: NodePayload, plan_id: u32) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(PlanNode {
            plan_id,
            kind: payload.kind(),
            payload,
            children: Vec::new(),
            parent: None,
            groups: Vec::new(),
            output_cols: None,
            stats: NodeStats::default(),
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut PlanNode {
        &mut self.nodes[id.0 as usize]
    }

    /// Append `child` to `parent`'s ordered child list.
    pub fn attach_child(&mut self, parent: NodeId, child: NodeId) {
        debug_assert!(self.node(child).parent.is_none(), "child already owned");
        self.node_mut(parent).children.push(child);
        self.node_mut(child).parent = Some(parent);
    }

    /// Remove `child` from its parent; returns the old parent.
    pub fn detach(&mut self, child: NodeId) -> Option<NodeId> {
        let parent = self.node(child).parent?;
        self.node_mut(parent).children.retain(|c| *c != child);
        self.node_mut(child).parent = None;
        Some(parent)
    }

    /// Swap `old` for `new` in `parent`'s child list, preserving position.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        let pos = self
            .node(parent)
            .children
            .iter()
            .position(|c| *c == old)
            .expect("old is not a child of parent");
        self.node_mut(parent).children[pos] = new;
        self.node_mut(old).parent = None;
        self.node_mut(new).parent = Some(parent);
    }

    /// Insert `new` into `target`'s slot, making `target` its sole child.
    pub fn insert_above(&mut self, target: NodeId, new: NodeId) {
        match self.node(target).parent {
            Some(p) => {
                self.replace_child(p, target, new);
            }
            None => {
                if self.root == Some(target) {
                    self.root = Some(new);
                }
            }
        }
        self.node_mut(new).children.push(target);
        self.node_mut(target).parent = Some(new);
    }

    /// Remove a single-child node, splicing its child into its slot.
    pub fn splice_out(&mut self, id: NodeId) {
        debug_assert_eq!(self.node(id).children.len(), 1, "splice requires one child");
        let child = self.node(id).children[0];
        self.node_mut(id).children.clear();
        self.node_mut(child).parent = None;
        match self.node(id).parent {
            Some(p) => self.replace_child(p, id, child),
            None => {
                if self.root == Some(id) {
                    self.root = Some(child);
                }
            }
        }
    }

    /// Graft every node of `other` into this arena, remapping indices.
    /// Returns `other`'s remapped root.
    pub fn absorb(&mut self, other: PlanArena) -> Option<NodeId> {
        let offset = self.nodes.len() as u32;
        let remap = |id: NodeId| NodeId(id.0 + offset);
        let other_root = other.root;
        for mut node in other.nodes {
            node.children = node.children.into_iter().map(remap).collect();
            node.parent = node.parent.map(remap);
            self.nodes.push(node);
        }
        other_root.map(remap)
    }

    /// Pre-order walk (node before children, children left to right).
    pub fn preorder(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            out.push(id);
            for &c in self.node(id).children.iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// Post-order walk (children before node).
    pub fn postorder(&self, from: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![(from, false)];
        while let Some((id, visited)) = stack.pop() {
            if visited {
                out.push(id);
            } else {
                stack.push((id, true));
                for &c in self.node(id).children.iter().rev() {
                    stack.push((c, false));
                }
            }
        }
        out
    }

    /// First node of the given kind in pre-order from the root.
    pub fn find_first(&self, kind: NodeKind) -> Option<NodeId> {
        let root = self.root?;
        self.preorder(root)
            .into_iter()
            .find(|id| self.node(*id).kind == kind)
    }

    /// All nodes of the given kind in pre-order from the root.
    pub fn find_all(&self, kind: NodeKind) -> Vec<NodeId> {
        match self.root {
            Some(root) => self
                .preorder(root)
                .into_iter()
                .filter(|id| self.node(*id).kind == kind)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.node(id).parent;
        while let Some(p) = cur {
            out.push(p);
            cur = self.node(p).parent;
        }
        out
    }

    /// Recompute every node's group set bottom-up: the union of its
    /// children's groups plus any group the node itself introduces.
    pub fn recompute_groups(&mut self) {
        let Some(root) = self.root else { return };
        for id in self.postorder(root) {
            let mut groups: Vec<GroupSymbol> = Vec::new();
            for &c in &self.node(id).children.clone() {
                for g in &self.node(c).groups {
                    if !groups.contains(g) {
                        groups.push(g.clone());
                    }
                }
            }
            match &self.node(id).payload {
                NodePayload::Source(p) => {
                    if !groups.contains(&p.group) {
                        groups.push(p.group.clone());
                    }
                }
                NodePayload::Access(p) => {
                    for g in &p.groups {
                        if !groups.contains(g) {
                            groups.push(g.clone());
                        }
                    }
                }
                NodePayload::Project(p) => {
                    if let Some(into) = &p.into_group {
                        if !groups.contains(into) {
                            groups.push(into.clone());
                        }
                    }
                }
                _ => {}
            }
            self.node_mut(id).groups = groups;
        }
    }

    /// Indented plan text, used by the trace sink and error messages.
    pub fn text(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.write_node(root, 0, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        for _ in 0..depth {
            out.push_str("  ");
        }
        let _ = write!(out, "{}", node.kind.name());
        match &node.payload {
            NodePayload::Project(p) => {
                let cols: Vec<String> = p.cols.iter().map(|c| c.to_string()).collect();
                let _ = write!(out, "({})", cols.join(", "));
                if let Some(into) = &p.into_group {
                    let _ = write!(out, " INTO {}", into);
                }
            }
            NodePayload::Join(p) => {
                let crit: Vec<String> = p.criteria.iter().map(|c| c.to_string()).collect();
                let _ = write!(out, "[{:?}/{:?}]({})", p.join_type, p.strategy, crit.join(" AND "));
            }
            NodePayload::Access(p) => {
                let groups: Vec<String> = p.groups.iter().map(|g| g.to_string()).collect();
                let _ = write!(out, "({})", groups.join(", "));
                if let Some(m) = &p.model_name {
                    let _ = write!(out, "@{}", m);
                }
                if p.is_dependent_set {
                    let _ = write!(out, " [dependent]");
                }
            }
            NodePayload::Select(p) => {
                let _ = write!(out, "({})", p.criteria);
                if p.is_having {
                    let _ = write!(out, " [having]");
                }
            }
            NodePayload::Sort(p) => {
                let keys: Vec<String> = p.keys.iter().map(|k| k.expression.to_string()).collect();
                let _ = write!(out, "({})", keys.join(", "));
            }
            NodePayload::Group(p) => {
                let cols: Vec<String> = p.cols.iter().map(|c| c.to_string()).collect();
                let _ = write!(out, "({})", cols.join(", "));
            }
            NodePayload::Source(p) => {
                let _ = write!(out, "({})", p.group);
                if p.symbol_map.is_some() {
                    let _ = write!(out, " [mapped]");
                }
            }
            NodePayload::SetOp(p) => {
                let _ = write!(out, "({:?}{})", p.op, if p.use_all { " ALL" } else { "" });
            }
            NodePayload::TupleLimit(p) => {
                let _ = write!(out, "({:?}, {:?})", p.row_limit, p.offset);
            }
            NodePayload::DupRemove | NodePayload::Null => {}
        }
        out.push('\n');
        for &c in &node.children {
            self.write_node(c, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::GroupId;

    fn group(name: &str, id: u32) -> GroupSymbol {
        GroupSymbol::new(name, GroupId(id))
    }

    fn source_arena() -> (PlanArena, NodeId, NodeId, NodeId) {
        // Project -> Join -> {Source(A), Source(B)}
        let mut arena = PlanArena::new();
        let a = arena.add(NodePayload::Source(SourcePayload::new(group("A", 0))), 0);
        let b = arena.add(NodePayload::Source(SourcePayload::new(group("B", 1))), 1);
        let join = arena.add(NodePayload::Join(JoinPayload::new(JoinType::Inner)), 2);
        let project = arena.add(NodePayload::Project(ProjectPayload::default()), 3);
        arena.attach_child(join, a);
        arena.attach_child(join, b);
        arena.attach_child(project, join);
        arena.root = Some(project);
        arena.recompute_groups();
        (arena, project, join, a)
    }

    #[test]
    fn preorder_visits_node_before_children_left_to_right() {
        let (arena, project, join, a) = source_arena();
        let order = arena.preorder(project);
        assert_eq!(order[0], project);
        assert_eq!(order[1], join);
        assert_eq!(order[2], a);
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn postorder_visits_children_first() {
        let (arena, project, join, _) = source_arena();
        let order = arena.postorder(project);
        assert_eq!(*order.last().unwrap(), project);
        assert!(order.iter().position(|&n| n == join).unwrap() < order.len() - 1);
    }

    #[test]
    fn groups_union_bottom_up() {
        let (arena, project, join, a) = source_arena();
        assert_eq!(arena.node(a).groups.len(), 1);
        assert_eq!(arena.node(join).groups.len(), 2);
        assert_eq!(arena.node(project).groups.len(), 2);
    }

    #[test]
    fn splice_out_reconnects_single_child() {
        let mut arena = PlanArena::new();
        let src = arena.add(NodePayload::Source(SourcePayload::new(group("A", 0))), 0);
        let select = arena.add(
            NodePayload::Select(SelectPayload {
                criteria: crate::ast::Criteria::IsNull {
                    expr: Expression::Literal(crate::ast::Literal::Null),
                    negated: false,
                },
                is_having: false,
                correlated: Vec::new(),
            }),
            1,
        );
        let project = arena.add(NodePayload::Project(ProjectPayload::default()), 2);
        arena.attach_child(select, src);
        arena.attach_child(project, select);
        arena.root = Some(project);

        arena.splice_out(select);
        assert_eq!(arena.node(project).children, vec![src]);
        assert_eq!(arena.node(src).parent, Some(project));
    }

    #[test]
    fn splice_out_at_root_promotes_child() {
        let mut arena = PlanArena::new();
        let src = arena.add(NodePayload::Source(SourcePayload::new(group("A", 0))), 0);
        let limit = arena.add(NodePayload::TupleLimit(LimitPayload::default()), 1);
        arena.attach_child(limit, src);
        arena.root = Some(limit);

        arena.splice_out(limit);
        assert_eq!(arena.root, Some(src));
        assert_eq!(arena.node(src).parent, None);
    }

    #[test]
    fn insert_above_takes_over_the_slot() {
        let (mut arena, _project, join, a) = source_arena();
        let select = arena.add(
            NodePayload::Select(SelectPayload {
                criteria: crate::ast::Criteria::IsNull {
                    expr: Expression::Literal(crate::ast::Literal::Null),
                    negated: false,
                },
                is_having: false,
                correlated: Vec::new(),
            }),
            9,
        );
        arena.insert_above(a, select);
        assert_eq!(arena.node(join).children[0], select);
        assert_eq!(arena.node(select).children, vec![a]);
        assert_eq!(arena.node(a).parent, Some(select));
    }

    #[test]
    fn absorb_remaps_indices() {
        let (mut parent, _, _, _) = source_arena();
        let before = parent.len();

        let mut child = PlanArena::new();
        let c_src = child.add(NodePayload::Source(SourcePayload::new(group("C", 2))), 0);
        let c_project = child.add(NodePayload::Project(ProjectPayload::default()), 1);
        child.attach_child(c_project, c_src);
        child.root = Some(c_project);

        let new_root = parent.absorb(child).unwrap();
        assert_eq!(parent.len(), before + 2);
        assert_eq!(parent.node(new_root).kind, NodeKind::Project);
        let child_of_root = parent.node(new_root).children[0];
        assert_eq!(parent.node(child_of_root).kind, NodeKind::Source);
        assert_eq!(parent.node(child_of_root).parent, Some(new_root));
    }

    #[test]
    fn find_first_is_preorder_positional() {
        let (arena, _, _, a) = source_arena();
        // Source(A) is the left leaf, so it is found before Source(B)
        assert_eq!(arena.find_first(NodeKind::Source), Some(a));
    }
}
