// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Dependent join selection
//!
//! A dependent join resolves one side first and feeds its values as a
//! bounded IN-list into the other side's access. Selection is hint-driven:
//! a MAKE DEPENDENT tag on an access makes it the fed side, MAKE NOT
//! DEPENDENT vetoes it. The IN-list bound comes from the source's
//! capabilities. After converting a side the rule re-queues criteria
//! pushdown so covered filters migrate into the dependent access.

use crate::plan::operators::logical::{NodeId, NodeKind, PlanArena};
use crate::plan::optimizers::rules::OptimizerContext;
use crate::plan::optimizers::stack::{RuleId, RuleStack};
use crate::plan::PlanningError;

pub fn choose_dependent(
    plan: &mut PlanArena,
    ctx: &mut OptimizerContext<'_>,
    stack: &mut RuleStack,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    for join_id in plan.find_all(NodeKind::Join) {
        if plan.node(join_id).children.len() != 2 {
            continue;
        }
        let Some(join) = plan.node(join_id).join() else {
            continue;
        };
        // an IN-list needs join criteria to feed
        if join.criteria.is_empty() || join.dependent_value_source.is_some() {
            continue;
        }

        let candidate = plan
            .node(join_id)
            .children
            .clone()
            .into_iter()
            .find_map(|side| eligible_access(plan, side));
        let Some(access_id) = candidate else { continue };

        let model_name = plan
            .node(access_id)
            .access()
            .and_then(|a| a.model_name.clone());
        let max_in_size = match model_name {
            Some(name) => ctx.capabilities.find_capabilities(&name)?.max_in_criteria_size,
            None => None,
        };

        let value_source = format!("$dsc/id{}", ctx.ids.next_id());
        if let Some(access) = plan.node_mut(access_id).access_mut() {
            access.is_dependent_set = true;
            access.max_in_size = max_in_size;
        }
        if let Some(join) = plan.node_mut(join_id).join_mut() {
            join.dependent_value_source = Some(value_source);
        }

        if !stack.contains(RuleId::PushSelectCriteria) {
            stack.push_front(RuleId::PushSelectCriteria);
        }
        log::debug!("join node {} marked dependent", plan.node(join_id).plan_id);
        changed = true;
    }
    Ok(changed)
}

/// The side's sole access node, when tagged MAKE DEPENDENT and not vetoed.
fn eligible_access(plan: &PlanArena, side: NodeId) -> Option<NodeId> {
    let accesses: Vec<NodeId> = plan
        .preorder(side)
        .into_iter()
        .filter(|id| plan.node(*id).kind == NodeKind::Access)
        .collect();
    if accesses.len() != 1 {
        return None;
    }
    let access = plan.node(accesses[0]).access()?;
    if access.make_dep && !access.make_not_dep && !access.is_dependent_set {
        Some(accesses[0])
    } else {
        None
    }
}
