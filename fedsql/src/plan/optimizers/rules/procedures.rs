// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Procedure routing
//!
//! An Access whose command is a stored-procedure call executes a compiled
//! sub-plan when the planning context supplies one; the dependent variant
//! (correlated parameters fed per outer row) is selected at lowering from
//! the correlated-reference list attached here.

use crate::ast::Command;
use crate::plan::operators::logical::{NodeKind, PlanArena};
use crate::plan::optimizers::rules::OptimizerContext;
use crate::plan::PlanningError;

pub fn plan_procedures(
    plan: &mut PlanArena,
    ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    for id in plan.find_all(NodeKind::Access) {
        let node = plan.node(id);
        let Some(access) = node.access() else { continue };
        let Some(Command::StoredProcedure(sp)) = &access.command else {
            continue;
        };
        if access.sub_plan.is_some() {
            continue;
        }
        let Some(compiled) = ctx.prepared.prepared_plan(&sp.name) else {
            log::debug!("no compiled plan for procedure {}, pushing the call", sp.name);
            continue;
        };
        let compiled = compiled.clone();
        if let Some(access) = plan.node_mut(id).access_mut() {
            access.sub_plan = Some(Box::new(compiled));
            changed = true;
        }
    }
    Ok(changed)
}
