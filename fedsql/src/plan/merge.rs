// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Sub-plan merger - grafts view plans into their referencing plans
//!
//! Each relational command carries its own canonical plan; views referenced
//! from SOURCE leaves arrive as child units. Merging walks the unit tree in
//! post-order and grafts each eligible child plan beneath the first open
//! virtual SOURCE leaf of its parent plan, recording the column map that
//! later lets the optimizer and the lowering phase see through the view.
//!
//! Scalar and criteria subqueries are deliberately not merged: they remain
//! separately planned units and execute on their own.

use std::collections::HashMap;

use crate::ast::{Command, DataType, ElementSymbol, Expression, GroupSymbol};
use crate::catalog::QueryMetadata;
use crate::plan::operators::logical::{NodeId, NodeKind, PlanArena};
use crate::plan::{PlanHints, PlanningError};

/// Columns of a planner-created temporary table, keyed by group name in the
/// unit's `temp_metadata` map.
#[derive(Debug, Clone, PartialEq)]
pub struct TempMetadataEntry {
    pub group: GroupSymbol,
    pub elements: Vec<ElementSymbol>,
}

/// One relational command with its canonical plan and nested view units.
#[derive(Debug)]
pub struct PlanUnit {
    pub command: Command,
    pub plan: PlanArena,
    pub hints: PlanHints,
    pub temp_metadata: HashMap<String, TempMetadataEntry>,
    pub children: Vec<PlanUnit>,
}

impl PlanUnit {
    pub fn new(command: Command, plan: PlanArena, hints: PlanHints) -> Self {
        Self {
            command,
            plan,
            hints,
            temp_metadata: HashMap::new(),
            children: Vec::new(),
        }
    }
}

/// Merge every eligible child plan of the unit tree into its parent plan.
///
/// Post-order: children are fully merged before the parent considers them.
/// Children used as scalar/criteria subqueries of their parent are kept as
/// separate units. Each grafted child fills exactly one SOURCE leaf; when the
/// same virtual group is referenced more than once, references fill in
/// pre-order positional order.
pub fn merge_plans(
    unit: &mut PlanUnit,
    metadata: &dyn QueryMetadata,
) -> Result<(), PlanningError> {
    let children = std::mem::take(&mut unit.children);
    for mut child in children {
        merge_plans(&mut child, metadata)?;

        if is_subquery_of(&unit.command, &child.command) {
            unit.children.push(child);
            continue;
        }

        // The child's unmerged units (its own subqueries) move up with it.
        let grandchildren = std::mem::take(&mut child.children);
        merge_child(unit, child, metadata)?;
        unit.children.extend(grandchildren);
    }
    Ok(())
}

/// Structural match against the parent command's subquery containers. Owned
/// clones rule out pointer identity, so equality stands in for it.
fn is_subquery_of(parent: &Command, child: &Command) -> bool {
    parent.subquery_containers().iter().any(|c| *c == child)
}

fn merge_child(
    unit: &mut PlanUnit,
    child: PlanUnit,
    metadata: &dyn QueryMetadata,
) -> Result<(), PlanningError> {
    let leaf = find_open_virtual_leaf(&unit.plan, metadata)?.ok_or_else(|| {
        PlanningError::Planner("no open virtual source for sub-plan".to_string())
    })?;

    let symbol_map = build_symbol_map(&unit.plan, leaf, &child.command, metadata)?;

    let PlanUnit {
        plan: child_plan,
        hints: child_hints,
        temp_metadata: child_temp,
        ..
    } = child;

    let grafted = unit.plan.absorb(child_plan).ok_or_else(|| {
        PlanningError::Planner("grafted sub-plan has no root".to_string())
    })?;
    unit.plan.attach_child(leaf, grafted);
    if let Some(source) = unit.plan.node_mut(leaf).source_mut() {
        source.symbol_map = Some(symbol_map);
    }
    unit.plan.recompute_groups();

    unit.hints.combine(&child_hints);
    // Additive union; on a key collision the child's entry wins.
    unit.temp_metadata.extend(child_temp);
    Ok(())
}

/// First pre-order SOURCE leaf whose group the catalog resolves as virtual,
/// that has no children yet, and whose nested command is not an update
/// procedure.
fn find_open_virtual_leaf(
    plan: &PlanArena,
    metadata: &dyn QueryMetadata,
) -> Result<Option<NodeId>, PlanningError> {
    let root = match plan.root {
        Some(r) => r,
        None => return Ok(None),
    };
    for id in plan.preorder(root) {
        let node = plan.node(id);
        if node.kind != NodeKind::Source || !node.children.is_empty() {
            continue;
        }
        let source = match node.source() {
            Some(s) => s,
            None => continue,
        };
        if source.is_update_proc() {
            continue;
        }
        let virtual_group = match metadata.is_virtual_group(source.group.metadata_id) {
            Ok(v) => v,
            // command-carrying sources need no catalog entry
            Err(_) if source.command.is_some() => false,
            Err(e) => return Err(e.into()),
        };
        if virtual_group {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// 1:1, in-order pairing of the view's declared output columns with the
/// sub-plan's projected symbols.
fn build_symbol_map(
    plan: &PlanArena,
    leaf: NodeId,
    child_command: &Command,
    metadata: &dyn QueryMetadata,
) -> Result<Vec<(ElementSymbol, Expression)>, PlanningError> {
    let source = plan
        .node(leaf)
        .source()
        .ok_or_else(|| PlanningError::Planner("merge target is not a source".to_string()))?;
    let group = &source.group;

    let mut declared = Vec::new();
    for element in metadata.get_elements_in_group(group.metadata_id)? {
        declared.push(ElementSymbol::new(
            group.name.clone(),
            metadata.element_name(element)?,
            element,
            metadata.element_type(element).unwrap_or(DataType::String),
        ));
    }

    let projected = child_command.projected_symbols();
    if declared.len() != projected.len() {
        return Err(PlanningError::Planner(format!(
            "view {} declares {} columns but its plan projects {}",
            group.name,
            declared.len(),
            projected.len()
        )));
    }
    Ok(declared.into_iter().zip(projected).collect())
}
