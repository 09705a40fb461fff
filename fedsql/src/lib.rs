// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! fedsql - query-plan compiler for a federated relational engine
//!
//! The crate takes a resolved relational [`ast::Command`] plus catalog
//! metadata and source capabilities, and compiles it into a
//! [`ProcessorPlan`]: a tree of physical operator descriptors an external
//! execution engine pulls rows through. Compilation runs in four stages:
//!
//! 1. **Canonical planning** - [`plan::builders::CanonicalPlanner`] turns
//!    every command into an unoptimized logical plan with a fixed node order.
//! 2. **Merging** - [`plan::merge::merge_plans`] grafts the plans of
//!    referenced views beneath their SOURCE leaves.
//! 3. **Optimization** - [`plan::optimizers::RelationalPlanner`] drains a
//!    hint-gated rule stack over the merged plan.
//! 4. **Lowering** - [`plan::builders::PhysicalPlanner`] translates the
//!    optimized plan into physical operators.
//!
//! [`compile`] wires the stages together; each stage is also usable on its
//! own, which is how the test suites exercise them.

pub mod ast;
pub mod capabilities;
pub mod catalog;
pub mod plan;

pub use capabilities::{CapabilitiesFinder, SourceCapabilities};
pub use catalog::{MetadataError, QueryMetadata};
pub use plan::builders::{CanonicalPlanner, PhysicalPlanner};
pub use plan::merge::{merge_plans, PlanUnit};
pub use plan::operators::physical::{
    JoinKind, PhysicalJoinStrategy, PhysicalNode, ProcessorPlan, SortMode, SortRequirement,
};
pub use plan::optimizers::RelationalPlanner;
pub use plan::{IdGenerator, JsonTraceSink, PlanHints, PlanningContext, PlanningError, TraceSink};

use ast::Command;
use plan::operators::logical::NodeKind;

/// Compile one command end to end.
///
/// View plans are pulled from the catalog and compiled as child units in the
/// pre-order their SOURCE references appear, which is also the order the
/// merger fills them in. Subqueries stay separately planned units and do not
/// surface in the returned plan.
pub fn compile(
    command: &Command,
    metadata: &dyn QueryMetadata,
    capabilities: &dyn CapabilitiesFinder,
    ids: &mut IdGenerator,
    context: &PlanningContext,
    trace: Option<&mut dyn TraceSink>,
) -> Result<ProcessorPlan, PlanningError> {
    let mut unit = build_unit(command, ids, metadata)?;
    merge_plans(&mut unit, metadata)?;

    let mut hints = unit.hints.clone();
    let optimized = RelationalPlanner::new().optimize(
        unit.plan,
        &mut hints,
        metadata,
        capabilities,
        ids,
        context,
        trace,
    )?;
    PhysicalPlanner::new(metadata, capabilities).build(&optimized)
}

/// Canonical plan for `command` plus child units for every virtual group its
/// SOURCE leaves reference, recursively.
fn build_unit(
    command: &Command,
    ids: &mut IdGenerator,
    metadata: &dyn QueryMetadata,
) -> Result<PlanUnit, PlanningError> {
    let mut hints = PlanHints::new();
    let plan = CanonicalPlanner::new(ids).build(command, &mut hints)?;
    let mut unit = PlanUnit::new(command.clone(), plan, hints);

    let mut virtual_groups = Vec::new();
    for id in unit.plan.find_all(NodeKind::Source) {
        let node = unit.plan.node(id);
        if !node.children.is_empty() {
            continue;
        }
        let Some(source) = node.source() else { continue };
        if source.is_update_proc() {
            continue;
        }
        // command-carrying sources (procedure calls, inline views) need no
        // catalog entry of their own
        let virtual_group = match metadata.is_virtual_group(source.group.metadata_id) {
            Ok(v) => v,
            Err(_) if source.command.is_some() => false,
            Err(e) => return Err(e.into()),
        };
        if virtual_group {
            virtual_groups.push(source.group.metadata_id);
        }
    }
    for group in virtual_groups {
        let Some(view_command) = metadata.virtual_plan(group)? else {
            continue;
        };
        let view_command = view_command.clone();
        unit.children.push(build_unit(&view_command, ids, metadata)?);
    }
    Ok(unit)
}
