// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Lowering of an optimized logical plan to physical operators
//!
//! Runs after the rule stack has drained, so the arena arriving here is fully
//! annotated: every SOURCE is either an ACCESS leaf, a mapped view wrapper, or
//! an error; output columns and stats are assigned. Lowering is a single
//! bottom-up translation with no further restructuring, except for the set
//! operations (which only exist physically as unions and semi-joins) and the
//! projection restored over temporary-table accesses.

use crate::ast::{
    Command, ComparisonOp, Criteria, ElementSymbol, Expression, FromClause, Query,
};
use crate::capabilities::CapabilitiesFinder;
use crate::catalog::QueryMetadata;
use crate::plan::operators::logical::{
    JoinStrategy, NodeId, NodePayload, PlanArena, PlanNode,
};
use crate::plan::operators::physical::{
    JoinKind, PhysicalJoinStrategy, PhysicalNode, ProcessorPlan, SortMode, SortRequirement,
};
use crate::plan::PlanningError;

/// Translates the optimized arena into a [`ProcessorPlan`].
pub struct PhysicalPlanner<'a> {
    metadata: &'a dyn QueryMetadata,
    capabilities: &'a dyn CapabilitiesFinder,
}

impl<'a> PhysicalPlanner<'a> {
    pub fn new(
        metadata: &'a dyn QueryMetadata,
        capabilities: &'a dyn CapabilitiesFinder,
    ) -> Self {
        Self {
            metadata,
            capabilities,
        }
    }

    pub fn build(&self, plan: &PlanArena) -> Result<ProcessorPlan, PlanningError> {
        let root = plan
            .root
            .ok_or_else(|| PlanningError::Planner("plan has no root".into()))?;
        let node = self.convert(plan, root)?;
        let output_cols = node.output_cols().to_vec();
        Ok(ProcessorPlan {
            root: node,
            output_cols,
        })
    }

    fn convert(&self, plan: &PlanArena, id: NodeId) -> Result<PhysicalNode, PlanningError> {
        let node = plan.node(id);
        match &node.payload {
            NodePayload::Project(p) => {
                // empty projection wrappers pass their input through
                if p.cols.is_empty() && p.into_group.is_none() {
                    return self.convert(plan, only_child(node)?);
                }
                let input = Box::new(self.convert(plan, only_child(node)?)?);
                match &p.into_group {
                    Some(target) => {
                        let temp = self.metadata.is_temporary_table(target.metadata_id)?;
                        let (model_name, batch, bulk) = if temp {
                            (None, false, false)
                        } else {
                            let model = self
                                .metadata
                                .model_name(self.metadata.get_model_id(target.metadata_id)?)?;
                            let caps = self.capabilities.find_capabilities(&model)?;
                            (
                                Some(model),
                                caps.supports_batched_updates,
                                caps.supports_bulk_update,
                            )
                        };
                        Ok(PhysicalNode::ProjectInto {
                            target: target.clone(),
                            cols: p.cols.clone(),
                            model_name,
                            batch,
                            bulk,
                            output_cols: outputs(node),
                            input,
                        })
                    }
                    None => Ok(PhysicalNode::Project {
                        cols: p.cols.clone(),
                        output_cols: outputs(node),
                        stats: node.stats.clone(),
                        input,
                    }),
                }
            }
            NodePayload::Join(p) => {
                let (lid, rid) = both_children(node)?;
                let left_distinct = distinct_input(plan, lid);
                let right_distinct = distinct_input(plan, rid);
                let left = Box::new(self.convert(plan, lid)?);
                let right = Box::new(self.convert(plan, rid)?);
                let strategy = match p.strategy {
                    JoinStrategy::NestedLoop => PhysicalJoinStrategy::NestedLoop {
                        predicate: p.criteria.clone(),
                    },
                    JoinStrategy::Merge => PhysicalJoinStrategy::Merge {
                        left_sort: SortRequirement::Sort,
                        right_sort: SortRequirement::Sort,
                        residual: residual_criteria(p.criteria.clone(), &p.left_exprs, &p.right_exprs),
                    },
                    JoinStrategy::PartitionedSort => PhysicalJoinStrategy::PartitionedSort {
                        left_sort: SortRequirement::Sort,
                        right_sort: SortRequirement::Sort,
                        residual: residual_criteria(p.criteria.clone(), &p.left_exprs, &p.right_exprs),
                    },
                };
                Ok(PhysicalNode::Join {
                    kind: JoinKind::from(p.join_type),
                    strategy,
                    left_exprs: p.left_exprs.clone(),
                    right_exprs: p.right_exprs.clone(),
                    left_distinct,
                    right_distinct,
                    dependent_value_source: p.dependent_value_source.clone(),
                    output_cols: outputs(node),
                    stats: node.stats.clone(),
                    left,
                    right,
                })
            }
            NodePayload::Access(p) => {
                if let Some(sub) = &p.sub_plan {
                    if !p.correlated_refs.is_empty() {
                        return Ok(PhysicalNode::DependentProcExecution {
                            plan: sub.clone(),
                            correlated_refs: p.correlated_refs.clone(),
                            output_cols: outputs(node),
                        });
                    }
                    return Ok(PhysicalNode::PlanExecution {
                        plan: sub.clone(),
                        output_cols: outputs(node),
                    });
                }
                let mut command = p.command.clone().ok_or_else(|| {
                    PlanningError::Planner(format!(
                        "access node {} has no pushed command",
                        node.plan_id
                    ))
                })?;
                // Pushed projection width as the source will return it.
                let pushed = match &command {
                    Command::Query(q) => Some(q.select.symbols.clone()),
                    _ => None,
                };
                if let Some(model) = &p.model_name {
                    let caps = self.capabilities.find_capabilities(model)?;
                    if !caps.supports_group_aliases {
                        if let Command::Query(q) = &mut command {
                            strip_group_aliases(q);
                        }
                    }
                }
                let node_outputs = outputs(node);
                // A pushed projection wider than the requested one happens for
                // temporary tables, which always fetch the full column set.
                // Restore the requested projection above the access.
                let widened = pushed
                    .as_ref()
                    .is_some_and(|cols| cols.len() != node_outputs.len());
                let access = PhysicalNode::Access {
                    model_name: p.model_name.clone(),
                    command,
                    is_dependent_set: p.is_dependent_set,
                    max_in_size: p.max_in_size,
                    output_cols: if widened {
                        pushed.unwrap_or_default()
                    } else {
                        node_outputs.clone()
                    },
                    stats: node.stats.clone(),
                };
                if widened {
                    Ok(PhysicalNode::Project {
                        cols: node_outputs.clone(),
                        output_cols: node_outputs,
                        stats: node.stats.clone(),
                        input: Box::new(access),
                    })
                } else {
                    Ok(access)
                }
            }
            NodePayload::Select(p) => Ok(PhysicalNode::Select {
                criteria: p.criteria.clone(),
                output_cols: outputs(node),
                input: Box::new(self.convert(plan, only_child(node)?)?),
            }),
            NodePayload::Sort(p) => Ok(PhysicalNode::Sort {
                keys: p.keys.clone(),
                mode: if p.is_dup_removal {
                    SortMode::SortDupRemove
                } else {
                    SortMode::Sort
                },
                output_cols: outputs(node),
                input: Box::new(self.convert(plan, only_child(node)?)?),
            }),
            NodePayload::DupRemove => Ok(PhysicalNode::Sort {
                keys: Vec::new(),
                mode: SortMode::DupRemove,
                output_cols: outputs(node),
                input: Box::new(self.convert(plan, only_child(node)?)?),
            }),
            NodePayload::Group(p) => Ok(PhysicalNode::Grouping {
                cols: p.cols.clone(),
                aggregates: p.aggregates.clone(),
                remove_duplicates: false,
                output_cols: outputs(node),
                input: Box::new(self.convert(plan, only_child(node)?)?),
            }),
            NodePayload::Source(p) => {
                let child = *node.children.first().ok_or_else(|| {
                    PlanningError::Planner(format!(
                        "source for group {} was never placed as an access",
                        p.group
                    ))
                })?;
                let mut converted = self.convert(plan, child)?;
                if p.symbol_map.is_some() {
                    // The mapped wrapper vanishes; its child answers for the
                    // view's declared columns.
                    converted.set_output_cols(outputs(node));
                }
                Ok(converted)
            }
            NodePayload::SetOp(p) => self.convert_set_op(plan, node, p.op, p.use_all),
            NodePayload::TupleLimit(p) => Ok(PhysicalNode::Limit {
                row_limit: p.row_limit,
                offset: p.offset,
                output_cols: outputs(node),
                input: Box::new(self.convert(plan, only_child(node)?)?),
            }),
            NodePayload::Null => Ok(PhysicalNode::NullOp {
                output_cols: outputs(node),
            }),
        }
    }

    fn convert_set_op(
        &self,
        plan: &PlanArena,
        node: &PlanNode,
        op: crate::ast::SetOpType,
        use_all: bool,
    ) -> Result<PhysicalNode, PlanningError> {
        use crate::ast::SetOpType;

        let mut inputs = Vec::with_capacity(node.children.len());
        for &c in &node.children {
            inputs.push(self.convert(plan, c)?);
        }
        let output_cols = outputs(node);
        match op {
            SetOpType::Union => {
                let union = PhysicalNode::UnionAll {
                    output_cols: output_cols.clone(),
                    inputs,
                };
                if use_all {
                    Ok(union)
                } else {
                    Ok(PhysicalNode::Sort {
                        keys: Vec::new(),
                        mode: SortMode::DupRemove,
                        output_cols,
                        input: Box::new(union),
                    })
                }
            }
            SetOpType::Intersect | SetOpType::Except => {
                if inputs.len() != 2 {
                    return Err(PlanningError::Planner(format!(
                        "{:?} requires exactly two branches, found {}",
                        op,
                        inputs.len()
                    )));
                }
                let right = inputs.pop().unwrap_or(PhysicalNode::NullOp {
                    output_cols: Vec::new(),
                });
                let left = inputs.pop().unwrap_or(PhysicalNode::NullOp {
                    output_cols: Vec::new(),
                });
                let left_exprs = left.output_cols().to_vec();
                let right_exprs = right.output_cols().to_vec();
                Ok(PhysicalNode::Join {
                    kind: if op == SetOpType::Intersect {
                        JoinKind::Semi
                    } else {
                        JoinKind::AntiSemi
                    },
                    strategy: PhysicalJoinStrategy::Merge {
                        left_sort: SortRequirement::SortDistinct,
                        right_sort: SortRequirement::SortDistinct,
                        residual: Vec::new(),
                    },
                    left_exprs,
                    right_exprs,
                    left_distinct: false,
                    right_distinct: false,
                    dependent_value_source: None,
                    output_cols,
                    stats: node.stats.clone(),
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
        }
    }
}

fn outputs(node: &PlanNode) -> Vec<Expression> {
    node.output_cols.clone().unwrap_or_default()
}

fn only_child(node: &PlanNode) -> Result<NodeId, PlanningError> {
    match node.children.as_slice() {
        [c] => Ok(*c),
        other => Err(PlanningError::Planner(format!(
            "{} node expects one input, found {}",
            node.kind.name(),
            other.len()
        ))),
    }
}

fn both_children(node: &PlanNode) -> Result<(NodeId, NodeId), PlanningError> {
    match node.children.as_slice() {
        [l, r] => Ok((*l, *r)),
        other => Err(PlanningError::Planner(format!(
            "join node expects two inputs, found {}",
            other.len()
        ))),
    }
}

/// Inputs that already remove duplicates let the merge variants skip their
/// own dedupe pass.
fn distinct_input(plan: &PlanArena, id: NodeId) -> bool {
    match &plan.node(id).payload {
        NodePayload::DupRemove => true,
        NodePayload::Sort(p) => p.is_dup_removal,
        _ => false,
    }
}

/// Criteria left over after the equi-join pairs are peeled off.
fn residual_criteria(
    criteria: Vec<Criteria>,
    left_exprs: &[Expression],
    right_exprs: &[Expression],
) -> Vec<Criteria> {
    criteria
        .into_iter()
        .filter(|c| {
            let Criteria::Comparison {
                left,
                op: ComparisonOp::Eq,
                right,
            } = c
            else {
                return true;
            };
            !left_exprs
                .iter()
                .zip(right_exprs.iter())
                .any(|(l, r)| (left == l && right == r) || (left == r && right == l))
        })
        .collect()
}

/// Rewrite a pushed query so no aliased group names remain: the from-clause
/// references revert to the defining names and every element re-qualifies
/// against them.
fn strip_group_aliases(query: &mut Query) {
    let mut aliases: Vec<(String, String)> = Vec::new();
    if let Some(from) = &mut query.from {
        for clause in &mut from.clauses {
            if let FromClause::Unary { group, .. } = clause {
                if let Some(def) = group.definition.take() {
                    aliases.push((group.name.clone(), def.clone()));
                    group.name = def;
                }
            }
        }
    }
    if aliases.is_empty() {
        return;
    }

    let mut referenced = Vec::new();
    for sym in &query.select.symbols {
        sym.collect_elements(&mut referenced);
    }
    if let Some(c) = &query.criteria {
        c.collect_elements(&mut referenced);
    }
    if let Some(ob) = &query.order_by {
        for item in &ob.items {
            item.expression.collect_elements(&mut referenced);
        }
    }
    let mut map: Vec<(ElementSymbol, Expression)> = Vec::new();
    for e in referenced {
        let Some((_, def)) = aliases
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(&e.group))
        else {
            continue;
        };
        if map.iter().any(|(old, _)| *old == e) {
            continue;
        }
        let renamed = ElementSymbol::new(def.clone(), e.name.clone(), e.metadata_id, e.ty);
        map.push((e, Expression::Element(renamed)));
    }
    if map.is_empty() {
        return;
    }

    for sym in &mut query.select.symbols {
        *sym = sym.rewrite(&map);
    }
    if let Some(c) = &mut query.criteria {
        *c = c.rewrite(&map);
    }
    if let Some(ob) = &mut query.order_by {
        for item in &mut ob.items {
            item.expression = item.expression.rewrite(&map);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        Criteria, DataType, ElementId, GroupId, GroupSymbol, JoinType, Literal, SetOpType,
    };
    use crate::capabilities::{FakeCapabilitiesFinder, SourceCapabilities};
    use crate::catalog::FakeMetadata;
    use crate::plan::operators::logical::{
        AccessPayload, JoinPayload, LimitPayload, ProjectPayload, SetOpPayload, SourcePayload,
    };

    fn elem(group: &str, name: &str, id: u32) -> Expression {
        Expression::Element(ElementSymbol::new(group, name, ElementId(id), DataType::Integer))
    }

    fn access_node(
        arena: &mut PlanArena,
        group: GroupSymbol,
        model: &str,
        select: Vec<Expression>,
        outputs: Vec<Expression>,
    ) -> NodeId {
        let payload = AccessPayload {
            groups: vec![group.clone()],
            model_name: Some(model.to_string()),
            command: Some(Command::Query(Query::simple(group, select))),
            ..AccessPayload::default()
        };
        let id = arena.add(NodePayload::Access(payload), arena.len() as u32);
        arena.node_mut(id).output_cols = Some(outputs);
        id
    }

    #[test]
    fn access_with_matching_projection_lowers_flat() {
        let md = FakeMetadata::new();
        let caps = FakeCapabilitiesFinder::new();
        let mut arena = PlanArena::new();
        let g = GroupSymbol::new("pm1.A", GroupId(0));
        let a = access_node(
            &mut arena,
            g,
            "pm1",
            vec![elem("pm1.A", "a1", 1)],
            vec![elem("pm1.A", "a1", 1)],
        );
        arena.root = Some(a);

        let plan = PhysicalPlanner::new(&md, &caps).build(&arena).unwrap();
        assert_eq!(plan.root.name(), "Access");
        assert_eq!(plan.output_cols.len(), 1);
    }

    #[test]
    fn widened_temp_access_gets_a_restoring_project() {
        let md = FakeMetadata::new();
        let caps = FakeCapabilitiesFinder::new();
        let mut arena = PlanArena::new();
        let g = GroupSymbol::new("tmp.T", GroupId(0));
        // The pushed command fetches all three columns; only one is requested.
        let a = access_node(
            &mut arena,
            g,
            "tmp",
            vec![
                elem("tmp.T", "c1", 1),
                elem("tmp.T", "c2", 2),
                elem("tmp.T", "c3", 3),
            ],
            vec![elem("tmp.T", "c2", 2)],
        );
        arena.root = Some(a);

        let plan = PhysicalPlanner::new(&md, &caps).build(&arena).unwrap();
        assert_eq!(plan.root.name(), "Project");
        assert_eq!(plan.output_cols, vec![elem("tmp.T", "c2", 2)]);
        let access = plan.root.input().unwrap();
        assert_eq!(access.name(), "Access");
        assert_eq!(access.output_cols().len(), 3);
    }

    #[test]
    fn aliases_are_stripped_when_the_source_lacks_support() {
        let md = FakeMetadata::new();
        let mut caps = FakeCapabilitiesFinder::new();
        caps.set(
            "pm1",
            SourceCapabilities {
                supports_group_aliases: false,
                ..SourceCapabilities::default()
            },
        );
        let mut arena = PlanArena::new();
        let g = GroupSymbol::aliased("g_0", "pm1.A", GroupId(0));
        let a = access_node(
            &mut arena,
            g,
            "pm1",
            vec![elem("g_0", "a1", 1)],
            vec![elem("g_0", "a1", 1)],
        );
        if let Some(access) = arena.node_mut(a).access_mut() {
            if let Some(Command::Query(q)) = access.command.as_mut() {
                q.criteria = Some(Criteria::compare(
                    elem("g_0", "a1", 1),
                    ComparisonOp::Eq,
                    Expression::Literal(Literal::Integer(7)),
                ));
            }
        }
        arena.root = Some(a);

        let plan = PhysicalPlanner::new(&md, &caps).build(&arena).unwrap();
        let PhysicalNode::Access { command, .. } = &plan.root else {
            panic!("expected an access root");
        };
        let Command::Query(q) = command else {
            panic!("expected a pushed query");
        };
        let Some(from) = &q.from else {
            panic!("pushed query lost its from clause");
        };
        let FromClause::Unary { group, .. } = &from.clauses[0] else {
            panic!("expected a unary from clause");
        };
        assert_eq!(group.name, "pm1.A");
        assert_eq!(group.definition, None);
        assert_eq!(q.select.symbols, vec![elem("pm1.A", "a1", 1)]);
        // criteria elements re-qualify against the defining name too
        assert_eq!(
            q.criteria,
            Some(Criteria::compare(
                elem("pm1.A", "a1", 1),
                ComparisonOp::Eq,
                Expression::Literal(Literal::Integer(7)),
            ))
        );
    }

    #[test]
    fn distinct_union_dedupes_above_union_all() {
        let md = FakeMetadata::new();
        let caps = FakeCapabilitiesFinder::new();
        let mut arena = PlanArena::new();
        let ga = GroupSymbol::new("pm1.A", GroupId(0));
        let gb = GroupSymbol::new("pm1.B", GroupId(1));
        let a = access_node(
            &mut arena,
            ga,
            "pm1",
            vec![elem("pm1.A", "a1", 1)],
            vec![elem("pm1.A", "a1", 1)],
        );
        let b = access_node(
            &mut arena,
            gb,
            "pm1",
            vec![elem("pm1.B", "b1", 2)],
            vec![elem("pm1.B", "b1", 2)],
        );
        let setop = arena.add(
            NodePayload::SetOp(SetOpPayload {
                op: SetOpType::Union,
                use_all: false,
            }),
            9,
        );
        arena.attach_child(setop, a);
        arena.attach_child(setop, b);
        arena.node_mut(setop).output_cols = Some(vec![elem("pm1.A", "a1", 1)]);
        arena.root = Some(setop);

        let plan = PhysicalPlanner::new(&md, &caps).build(&arena).unwrap();
        let PhysicalNode::Sort { mode, input, .. } = &plan.root else {
            panic!("expected a dedupe sort root");
        };
        assert_eq!(*mode, SortMode::DupRemove);
        assert_eq!(input.name(), "UnionAll");
    }

    #[test]
    fn except_lowers_to_anti_semi_merge_join() {
        let md = FakeMetadata::new();
        let caps = FakeCapabilitiesFinder::new();
        let mut arena = PlanArena::new();
        let ga = GroupSymbol::new("pm1.A", GroupId(0));
        let gb = GroupSymbol::new("pm1.B", GroupId(1));
        let a = access_node(
            &mut arena,
            ga,
            "pm1",
            vec![elem("pm1.A", "a1", 1)],
            vec![elem("pm1.A", "a1", 1)],
        );
        let b = access_node(
            &mut arena,
            gb,
            "pm1",
            vec![elem("pm1.B", "b1", 2)],
            vec![elem("pm1.B", "b1", 2)],
        );
        let setop = arena.add(
            NodePayload::SetOp(SetOpPayload {
                op: SetOpType::Except,
                use_all: false,
            }),
            9,
        );
        arena.attach_child(setop, a);
        arena.attach_child(setop, b);
        arena.node_mut(setop).output_cols = Some(vec![elem("pm1.A", "a1", 1)]);
        arena.root = Some(setop);

        let plan = PhysicalPlanner::new(&md, &caps).build(&arena).unwrap();
        let PhysicalNode::Join {
            kind,
            strategy,
            left_exprs,
            right_exprs,
            ..
        } = &plan.root
        else {
            panic!("expected a join root");
        };
        assert_eq!(*kind, JoinKind::AntiSemi);
        let PhysicalJoinStrategy::Merge {
            left_sort,
            right_sort,
            residual,
        } = strategy
        else {
            panic!("expected a merge strategy");
        };
        assert_eq!(*left_sort, SortRequirement::SortDistinct);
        assert_eq!(*right_sort, SortRequirement::SortDistinct);
        assert!(residual.is_empty());
        // Both equi-lists cover the full branch output.
        assert_eq!(left_exprs, &vec![elem("pm1.A", "a1", 1)]);
        assert_eq!(right_exprs, &vec![elem("pm1.B", "b1", 2)]);
    }

    #[test]
    fn merge_join_keeps_only_non_equi_residual() {
        let md = FakeMetadata::new();
        let caps = FakeCapabilitiesFinder::new();
        let mut arena = PlanArena::new();
        let ga = GroupSymbol::new("pm1.A", GroupId(0));
        let gb = GroupSymbol::new("pm1.B", GroupId(1));
        let a = access_node(
            &mut arena,
            ga,
            "pm1",
            vec![elem("pm1.A", "a1", 1)],
            vec![elem("pm1.A", "a1", 1)],
        );
        let b = access_node(
            &mut arena,
            gb,
            "pm1",
            vec![elem("pm1.B", "b1", 2)],
            vec![elem("pm1.B", "b1", 2)],
        );
        let mut payload = JoinPayload::new(JoinType::Inner);
        payload.strategy = JoinStrategy::Merge;
        payload.criteria = vec![
            Criteria::Comparison {
                left: elem("pm1.A", "a1", 1),
                op: ComparisonOp::Eq,
                right: elem("pm1.B", "b1", 2),
            },
            Criteria::Comparison {
                left: elem("pm1.A", "a1", 1),
                op: ComparisonOp::Gt,
                right: Expression::Literal(Literal::Integer(5)),
            },
        ];
        payload.left_exprs = vec![elem("pm1.A", "a1", 1)];
        payload.right_exprs = vec![elem("pm1.B", "b1", 2)];
        let join = arena.add(NodePayload::Join(payload), 9);
        arena.attach_child(join, a);
        arena.attach_child(join, b);
        arena.node_mut(join).output_cols =
            Some(vec![elem("pm1.A", "a1", 1), elem("pm1.B", "b1", 2)]);
        arena.root = Some(join);

        let plan = PhysicalPlanner::new(&md, &caps).build(&arena).unwrap();
        let PhysicalNode::Join { strategy, .. } = &plan.root else {
            panic!("expected a join root");
        };
        let PhysicalJoinStrategy::Merge { residual, .. } = strategy else {
            panic!("expected a merge strategy");
        };
        assert_eq!(residual.len(), 1);
        assert!(matches!(
            &residual[0],
            Criteria::Comparison {
                op: ComparisonOp::Gt,
                ..
            }
        ));
    }

    #[test]
    fn mapped_source_relabels_its_child_outputs() {
        let md = FakeMetadata::new();
        let caps = FakeCapabilitiesFinder::new();
        let mut arena = PlanArena::new();
        let ga = GroupSymbol::new("pm1.A", GroupId(0));
        let a = access_node(
            &mut arena,
            ga,
            "pm1",
            vec![elem("pm1.A", "a1", 1)],
            vec![elem("pm1.A", "a1", 1)],
        );
        let view = GroupSymbol::new("vm.V", GroupId(1));
        let mut source = SourcePayload::new(view);
        source.symbol_map = Some(vec![(
            ElementSymbol::new("vm.V", "v1", ElementId(9), DataType::Integer),
            elem("pm1.A", "a1", 1),
        )]);
        let src = arena.add(NodePayload::Source(source), 9);
        arena.attach_child(src, a);
        arena.node_mut(src).output_cols = Some(vec![elem("vm.V", "v1", 9)]);
        arena.root = Some(src);

        let plan = PhysicalPlanner::new(&md, &caps).build(&arena).unwrap();
        assert_eq!(plan.root.name(), "Access");
        assert_eq!(plan.output_cols, vec![elem("vm.V", "v1", 9)]);
    }

    #[test]
    fn unplaced_source_is_a_planning_error() {
        let md = FakeMetadata::new();
        let caps = FakeCapabilitiesFinder::new();
        let mut arena = PlanArena::new();
        let src = arena.add(
            NodePayload::Source(SourcePayload::new(GroupSymbol::new("pm1.A", GroupId(0)))),
            0,
        );
        let project = arena.add(NodePayload::Project(ProjectPayload::default()), 1);
        arena.attach_child(project, src);
        arena.root = Some(project);

        let err = PhysicalPlanner::new(&md, &caps).build(&arena).unwrap_err();
        assert!(err.to_string().contains("never placed"));
    }

    #[test]
    fn select_into_temp_target_disables_batching() {
        let mut md = FakeMetadata::new();
        let pm1 = md.add_model("pm1");
        let (t, _) = md.add_temp_table(pm1, "tmp.T", &[("c1", DataType::Integer)]);
        let caps = FakeCapabilitiesFinder::new();

        let mut arena = PlanArena::new();
        let ga = GroupSymbol::new("pm1.A", GroupId(100));
        let a = access_node(
            &mut arena,
            ga,
            "pm1",
            vec![elem("pm1.A", "a1", 1)],
            vec![elem("pm1.A", "a1", 1)],
        );
        let project = arena.add(
            NodePayload::Project(ProjectPayload {
                cols: vec![elem("pm1.A", "a1", 1)],
                into_group: Some(GroupSymbol::new("tmp.T", t)),
                correlated: Vec::new(),
            }),
            9,
        );
        arena.attach_child(project, a);
        arena.node_mut(project).output_cols = Some(vec![elem("pm1.A", "a1", 1)]);
        arena.root = Some(project);

        let plan = PhysicalPlanner::new(&md, &caps).build(&arena).unwrap();
        let PhysicalNode::ProjectInto {
            model_name,
            batch,
            bulk,
            ..
        } = &plan.root
        else {
            panic!("expected a project-into root");
        };
        assert_eq!(*model_name, None);
        assert!(!*batch);
        assert!(!*bulk);
    }

    #[test]
    fn limit_and_sort_lower_in_place() {
        let md = FakeMetadata::new();
        let caps = FakeCapabilitiesFinder::new();
        let mut arena = PlanArena::new();
        let ga = GroupSymbol::new("pm1.A", GroupId(0));
        let a = access_node(
            &mut arena,
            ga,
            "pm1",
            vec![elem("pm1.A", "a1", 1)],
            vec![elem("pm1.A", "a1", 1)],
        );
        let limit = arena.add(
            NodePayload::TupleLimit(LimitPayload {
                row_limit: Some(10),
                offset: Some(5),
            }),
            9,
        );
        arena.attach_child(limit, a);
        arena.node_mut(limit).output_cols = Some(vec![elem("pm1.A", "a1", 1)]);
        arena.root = Some(limit);

        let plan = PhysicalPlanner::new(&md, &caps).build(&arena).unwrap();
        let PhysicalNode::Limit {
            row_limit, offset, ..
        } = &plan.root
        else {
            panic!("expected a limit root");
        };
        assert_eq!(*row_limit, Some(10));
        assert_eq!(*offset, Some(5));
    }
}
