// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Set-operation normalization
//!
//! Nested UNION ALL chains of the same operation flatten into one n-ary
//! SetOp node so lowering produces a single union-all operator instead of a
//! cascade. Distinct set operations keep their two-child shape: their
//! lowering (dedupe sort, semi joins) is inherently binary.

use crate::plan::operators::logical::{NodeKind, PlanArena};
use crate::plan::optimizers::rules::OptimizerContext;
use crate::plan::PlanningError;

pub fn plan_unions(
    plan: &mut PlanArena,
    _ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    loop {
        let lift = plan.find_all(NodeKind::SetOp).into_iter().find_map(|id| {
            let op = plan.node(id).payload.clone();
            let crate::plan::operators::logical::NodePayload::SetOp(outer) = op else {
                return None;
            };
            if !outer.use_all {
                return None;
            }
            plan.node(id).children.iter().copied().find(|child| {
                matches!(
                    &plan.node(*child).payload,
                    crate::plan::operators::logical::NodePayload::SetOp(inner)
                        if inner.op == outer.op && inner.use_all
                )
            })
            .map(|child| (id, child))
        });
        let Some((parent, child)) = lift else { break };

        let grandchildren = plan.node(child).children.clone();
        let pos = match plan.node(parent).children.iter().position(|c| *c == child) {
            Some(p) => p,
            None => break,
        };
        plan.node_mut(child).children.clear();
        plan.node_mut(parent).children.remove(pos);
        for (offset, gc) in grandchildren.into_iter().enumerate() {
            plan.node_mut(gc).parent = Some(parent);
            plan.node_mut(parent).children.insert(pos + offset, gc);
        }
        changed = true;
    }
    Ok(changed)
}
