// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Join planning rules
//!
//! PlanJoins normalizes join subtrees before strategy selection: a SELECT
//! spanning both sides of a CROSS join folds into it as join criteria, and
//! join types are reconciled with their criteria. ChooseJoinStrategy picks
//! the physical algorithm per equi-join availability and input shape.
//! RemoveOptionalJoins drops OPTIONAL-flagged sides nothing references.

use crate::ast::{ComparisonOp, Criteria, Expression, JoinType};
use crate::plan::operators::logical::{
    JoinStrategy, NodeId, NodeKind, NodePayload, PlanArena,
};
use crate::plan::optimizers::rules::{groups_cover, payload_elements, OptimizerContext};
use crate::plan::PlanningError;

/// Fold implicit join predicates into CROSS joins and reconcile join types.
pub fn plan_joins(
    plan: &mut PlanArena,
    _ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;

    // Conjuncts of a SELECT above a CROSS join that genuinely need both
    // sides become the join's predicate; single-side conjuncts stay put.
    loop {
        let fold = plan.find_all(NodeKind::Select).into_iter().find_map(|id| {
            let node = plan.node(id);
            let select = node.select()?;
            if select.is_having || !select.correlated.is_empty() || node.children.len() != 1 {
                return None;
            }
            let join_id = node.children[0];
            let join = plan.node(join_id).join()?;
            if join.join_type != JoinType::Cross || plan.node(join_id).children.len() != 2 {
                return None;
            }
            let (left, right) = (
                plan.node(join_id).children[0],
                plan.node(join_id).children[1],
            );
            let mut folded = Vec::new();
            let mut kept = Vec::new();
            for conjunct in select.criteria.clone().separate_by_and() {
                let mut referenced = Vec::new();
                conjunct.collect_groups(&mut referenced);
                let on_left = groups_cover(&plan.node(left).groups, &referenced);
                let on_right = groups_cover(&plan.node(right).groups, &referenced);
                let on_both = groups_cover(&plan.node(join_id).groups, &referenced);
                if on_both && !on_left && !on_right {
                    folded.push(conjunct);
                } else {
                    kept.push(conjunct);
                }
            }
            if folded.is_empty() {
                None
            } else {
                Some((id, join_id, folded, kept))
            }
        });
        let Some((select_id, join_id, folded, kept)) = fold else { break };

        if let Some(join) = plan.node_mut(join_id).join_mut() {
            join.criteria.extend(folded);
        }
        match Criteria::combine_with_and(kept) {
            Some(rest) => {
                if let Some(p) = plan.node_mut(select_id).select_mut() {
                    p.criteria = rest;
                }
            }
            None => plan.splice_out(select_id),
        }
        changed = true;
    }

    for id in plan.find_all(NodeKind::Join) {
        let Some(join) = plan.node_mut(id).join_mut() else {
            continue;
        };
        if join.join_type == JoinType::Cross && !join.criteria.is_empty() {
            join.join_type = JoinType::Inner;
            changed = true;
        } else if join.join_type == JoinType::Inner && join.criteria.is_empty() {
            join.join_type = JoinType::Cross;
            changed = true;
        }
    }
    Ok(changed)
}

/// Pick the join algorithm and fill the equi-join expression lists.
///
/// Equi-join pairs admit a merge strategy; when either input is already
/// distinct (a DupRemove or dedupe sort feeds it) the partitioned variant is
/// preferred. Everything else stays nested-loop.
pub fn choose_join_strategy(
    plan: &mut PlanArena,
    _ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    for id in plan.find_all(NodeKind::Join) {
        if plan.node(id).children.len() != 2 {
            continue;
        }
        let (left, right) = (plan.node(id).children[0], plan.node(id).children[1]);
        let Some(join) = plan.node(id).join() else { continue };

        let (left_exprs, right_exprs) =
            split_equi_join(plan, &join.criteria, left, right);
        let strategy = if left_exprs.is_empty() {
            JoinStrategy::NestedLoop
        } else if distinct_input(plan, left) || distinct_input(plan, right) {
            JoinStrategy::PartitionedSort
        } else {
            JoinStrategy::Merge
        };

        let Some(join) = plan.node_mut(id).join_mut() else {
            continue;
        };
        if join.strategy != strategy
            || join.left_exprs != left_exprs
            || join.right_exprs != right_exprs
        {
            join.strategy = strategy;
            join.left_exprs = left_exprs;
            join.right_exprs = right_exprs;
            changed = true;
        }
    }
    Ok(changed)
}

/// Extract oriented equi-join expression pairs: comparisons `l = r` where
/// each side resolves wholly against one join input.
fn split_equi_join(
    plan: &PlanArena,
    criteria: &[Criteria],
    left: NodeId,
    right: NodeId,
) -> (Vec<Expression>, Vec<Expression>) {
    let mut left_exprs = Vec::new();
    let mut right_exprs = Vec::new();
    for c in criteria {
        let Criteria::Comparison {
            left: l,
            op: ComparisonOp::Eq,
            right: r,
        } = c
        else {
            continue;
        };
        let mut l_groups = Vec::new();
        let mut r_groups = Vec::new();
        l.collect_groups(&mut l_groups);
        r.collect_groups(&mut r_groups);

        let l_on_left = groups_cover(&plan.node(left).groups, &l_groups);
        let r_on_right = groups_cover(&plan.node(right).groups, &r_groups);
        let l_on_right = groups_cover(&plan.node(right).groups, &l_groups);
        let r_on_left = groups_cover(&plan.node(left).groups, &r_groups);

        if l_on_left && r_on_right {
            left_exprs.push(l.clone());
            right_exprs.push(r.clone());
        } else if l_on_right && r_on_left {
            left_exprs.push(r.clone());
            right_exprs.push(l.clone());
        }
    }
    (left_exprs, right_exprs)
}

fn distinct_input(plan: &PlanArena, side: NodeId) -> bool {
    match &plan.node(side).payload {
        NodePayload::DupRemove => true,
        NodePayload::Sort(p) => p.is_dup_removal,
        _ => false,
    }
}

/// Drop OPTIONAL-flagged join sides that nothing outside the side
/// references; the join collapses onto the kept side.
pub fn remove_optional_joins(
    plan: &mut PlanArena,
    _ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    loop {
        let removal = plan.find_all(NodeKind::Join).into_iter().find_map(|id| {
            if plan.node(id).children.len() != 2 {
                return None;
            }
            for side in plan.node(id).children.clone() {
                if !optional_flagged(plan, side) {
                    continue;
                }
                if side_referenced_outside(plan, id, side) {
                    continue;
                }
                return Some((id, side));
            }
            None
        });
        let Some((join_id, side)) = removal else { break };

        plan.detach(side);
        plan.splice_out(join_id);
        plan.recompute_groups();
        changed = true;
    }
    Ok(changed)
}

/// A side is removable when its subtree root carries the OPTIONAL hint.
fn optional_flagged(plan: &PlanArena, side: NodeId) -> bool {
    let node = plan.node(side);
    match node.source() {
        Some(s) => s.optional,
        None => node.join().map(|j| j.optional).unwrap_or(false),
    }
}

/// Does any node outside the candidate subtree (the owning join's own
/// predicate excluded) reference a group the side contributes?
fn side_referenced_outside(plan: &PlanArena, join: NodeId, side: NodeId) -> bool {
    let side_groups = plan.node(side).groups.clone();
    let inside: Vec<NodeId> = plan.preorder(side);
    let Some(root) = plan.root else { return false };

    for id in plan.preorder(root) {
        if id == join || inside.contains(&id) {
            continue;
        }
        let mut elements = Vec::new();
        payload_elements(&plan.node(id).payload, &mut elements);
        for e in &elements {
            if side_groups.iter().any(|g| g.matches_name(&e.group)) {
                return true;
            }
        }
    }
    false
}
