// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Criteria placement rules
//!
//! PushSelectCriteria moves filters toward the data. It never crosses a
//! Group node, never enters the null-introducing side of an outer join, and
//! crosses a join only toward a side already chosen as a dependent set -
//! everything else stays where join cardinality put it. Merged view layers
//! are transparent: criteria rewrite through the symbol map and continue
//! inside the grafted plan.

use crate::ast::Criteria;
use crate::plan::operators::logical::{JoinPayload, NodeId, NodeKind, PlanArena};
use crate::plan::optimizers::rules::{groups_cover, OptimizerContext};
use crate::plan::PlanningError;

pub fn push_select_criteria(
    plan: &mut PlanArena,
    _ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    loop {
        let mut moved = false;
        for id in plan.find_all(NodeKind::Select) {
            let node = plan.node(id);
            let Some(select) = node.select() else { continue };
            if select.is_having || !select.correlated.is_empty() {
                continue;
            }
            if node.children.len() != 1 {
                continue;
            }
            let child = node.children[0];

            match plan.node(child).kind {
                NodeKind::Source => {
                    if push_through_view(plan, id, child) {
                        moved = true;
                        changed = true;
                        break;
                    }
                }
                NodeKind::Join => {
                    if push_into_dependent_side(plan, id, child) {
                        moved = true;
                        changed = true;
                        break;
                    }
                }
                _ => {}
            }
        }
        if !moved {
            break;
        }
    }
    if changed {
        plan.recompute_groups();
    }
    Ok(changed)
}

/// Rewrite the criteria through the view's symbol map and relocate the
/// select inside the grafted plan, below its root projection.
fn push_through_view(plan: &mut PlanArena, select: NodeId, source: NodeId) -> bool {
    let map = match plan.node(source).source().and_then(|s| s.symbol_map.clone()) {
        Some(m) => m,
        None => return false,
    };
    if plan.node(source).children.len() != 1 {
        return false;
    }
    let graft = plan.node(source).children[0];
    let target = if plan.node(graft).kind == NodeKind::Project
        && plan.node(graft).children.len() == 1
    {
        plan.node(graft).children[0]
    } else {
        graft
    };

    if let Some(p) = plan.node_mut(select).select_mut() {
        p.criteria = p.criteria.rewrite(&map);
    }
    plan.splice_out(select);
    plan.insert_above(target, select);
    true
}

/// Criteria covered by a dependent join side move onto that side, narrowing
/// the per-batch access.
fn push_into_dependent_side(plan: &mut PlanArena, select: NodeId, join: NodeId) -> bool {
    if plan.node(join).children.len() != 2 {
        return false;
    }
    let Some(payload) = plan.node(join).join().cloned() else {
        return false;
    };
    let mut referenced = Vec::new();
    if let Some(p) = plan.node(select).select() {
        p.criteria.collect_groups(&mut referenced);
    }

    for (idx, side) in plan.node(join).children.clone().into_iter().enumerate() {
        if null_introducing(&payload, idx) {
            continue;
        }
        if !side_is_dependent(plan, side) {
            continue;
        }
        if !groups_cover(&plan.node(side).groups, &referenced) {
            continue;
        }
        plan.splice_out(select);
        plan.insert_above(side, select);
        return true;
    }
    false
}

fn null_introducing(join: &JoinPayload, side_index: usize) -> bool {
    use crate::ast::JoinType;
    match join.join_type {
        JoinType::LeftOuter => side_index == 1,
        JoinType::RightOuter => side_index == 0,
        JoinType::FullOuter => true,
        JoinType::Inner | JoinType::Cross => false,
    }
}

fn side_is_dependent(plan: &PlanArena, side: NodeId) -> bool {
    plan.preorder(side)
        .into_iter()
        .any(|id| matches!(plan.node(id).access(), Some(a) if a.is_dependent_set))
}

/// Merge adjacent uncorrelated SELECT chains into a single conjunct list.
pub fn merge_criteria(
    plan: &mut PlanArena,
    _ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    loop {
        let pair = plan.find_all(NodeKind::Select).into_iter().find_map(|id| {
            let node = plan.node(id);
            let upper = node.select()?;
            if node.children.len() != 1 {
                return None;
            }
            let child = node.children[0];
            let lower = plan.node(child).select()?;
            if upper.is_having != lower.is_having
                || !upper.correlated.is_empty()
                || !lower.correlated.is_empty()
            {
                return None;
            }
            Some((id, child))
        });
        let Some((upper, lower)) = pair else { break };

        let lower_criteria = match plan.node(lower).select() {
            Some(p) => p.criteria.clone(),
            None => break,
        };
        if let Some(p) = plan.node_mut(upper).select_mut() {
            let mut conjuncts = p.criteria.clone().separate_by_and();
            conjuncts.extend(lower_criteria.separate_by_and());
            if let Some(combined) = Criteria::combine_with_and(conjuncts) {
                p.criteria = combined;
            }
        }
        plan.splice_out(lower);
        changed = true;
    }
    Ok(changed)
}

/// Drop trivially-true SELECT nodes.
pub fn clean_criteria(
    plan: &mut PlanArena,
    _ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    loop {
        let trivial = plan.find_all(NodeKind::Select).into_iter().find(|id| {
            matches!(plan.node(*id).select(), Some(p) if p.criteria.is_trivially_true())
                && plan.node(*id).children.len() == 1
        });
        let Some(id) = trivial else { break };
        plan.splice_out(id);
        changed = true;
    }
    Ok(changed)
}
