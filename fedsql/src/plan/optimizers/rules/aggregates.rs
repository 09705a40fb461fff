// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Aggregate pushdown
//!
//! A GROUP directly above an inner or cross join moves below it when its
//! grouping columns and aggregate arguments all resolve against a single
//! join side. Outer joins are left alone: pushing grouping past a
//! null-introducing side changes the produced groups.

use crate::ast::JoinType;
use crate::plan::operators::logical::{NodeKind, PlanArena};
use crate::plan::optimizers::rules::{groups_cover, OptimizerContext};
use crate::plan::PlanningError;

pub fn push_aggregates(
    plan: &mut PlanArena,
    _ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    loop {
        let push = plan.find_all(NodeKind::Group).into_iter().find_map(|id| {
            let node = plan.node(id);
            if node.children.len() != 1 {
                return None;
            }
            let join_id = node.children[0];
            let join = plan.node(join_id).join()?;
            if !matches!(join.join_type, JoinType::Inner | JoinType::Cross)
                || plan.node(join_id).children.len() != 2
            {
                return None;
            }

            let referenced = crate::plan::optimizers::rules::payload_groups(&node.payload);
            plan.node(join_id)
                .children
                .iter()
                .find(|side| groups_cover(&plan.node(**side).groups, &referenced))
                .map(|side| (id, *side))
        });
        let Some((group_id, side)) = push else { break };

        plan.splice_out(group_id);
        plan.insert_above(side, group_id);
        plan.recompute_groups();
        changed = true;
    }
    Ok(changed)
}
