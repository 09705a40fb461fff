// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Limit pushdown
//!
//! A TUPLE_LIMIT may copy below a UNION ALL (each branch needs no more than
//! limit + offset rows) and may fold into an Access command. Pushing below
//! a SORT is illegal: the limit must see the final order. The original node
//! stays in place; pushed copies carry the row bound only.

use crate::ast::{Command, Limit};
use crate::plan::operators::logical::{
    LimitPayload, NodeKind, NodePayload, PlanArena,
};
use crate::plan::optimizers::rules::OptimizerContext;
use crate::plan::PlanningError;

pub fn push_limit(
    plan: &mut PlanArena,
    ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    for id in plan.find_all(NodeKind::TupleLimit) {
        let payload = match &plan.node(id).payload {
            NodePayload::TupleLimit(p) => *p,
            _ => continue,
        };
        let Some(row_limit) = payload.row_limit else {
            continue;
        };
        if plan.node(id).children.len() != 1 {
            continue;
        }
        let child = plan.node(id).children[0];
        // each branch may still need offset rows that the top limit skips
        let pushed = row_limit.saturating_add(payload.offset.unwrap_or(0));

        match plan.node(child).kind {
            NodeKind::SetOp => {
                let use_all = matches!(
                    &plan.node(child).payload,
                    NodePayload::SetOp(p) if p.use_all
                );
                if !use_all {
                    continue;
                }
                for branch in plan.node(child).children.clone() {
                    if plan.node(branch).kind == NodeKind::TupleLimit {
                        continue;
                    }
                    let copy = plan.add(
                        NodePayload::TupleLimit(LimitPayload {
                            row_limit: Some(pushed),
                            offset: None,
                        }),
                        ctx.ids.next_id(),
                    );
                    plan.insert_above(branch, copy);
                    changed = true;
                }
            }
            NodeKind::Access => {
                let Some(access) = plan.node_mut(child).access_mut() else {
                    continue;
                };
                if let Some(Command::Query(q)) = access.command.as_mut() {
                    if q.limit.is_none() {
                        q.limit = Some(Limit {
                            row_limit: Some(pushed),
                            offset: None,
                        });
                        changed = true;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(changed)
}
