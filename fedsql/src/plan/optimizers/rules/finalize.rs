// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Finalization rules
//!
//! AssignOutputElements resolves every node's output-column list from the
//! elements the plan actually references; leaves emit their referenced
//! columns in catalog declaration order. CalculateCost annotates the tree
//! with row-count estimates. The formulas are deliberately simple - the
//! numbers ride along for the execution engine and nothing in planning
//! depends on their accuracy.

use crate::ast::{Command, ElementSymbol, Expression};
use crate::catalog::group_elements;
use crate::plan::operators::logical::{NodeId, NodePayload, PlanArena};
use crate::plan::optimizers::rules::{payload_elements, OptimizerContext};
use crate::plan::PlanningError;

pub fn assign_output_elements(
    plan: &mut PlanArena,
    ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let Some(root) = plan.root else { return Ok(false) };

    // elements referenced anywhere in the plan
    let mut referenced: Vec<ElementSymbol> = Vec::new();
    for id in plan.preorder(root) {
        payload_elements(&plan.node(id).payload, &mut referenced);
    }

    let mut changed = false;
    for id in plan.postorder(root) {
        let cols = node_outputs(plan, id, &referenced, ctx)?;
        let node = plan.node_mut(id);
        if node.output_cols.as_ref() != Some(&cols) {
            node.output_cols = Some(cols);
            changed = true;
        }
    }
    Ok(changed)
}

fn node_outputs(
    plan: &PlanArena,
    id: NodeId,
    referenced: &[ElementSymbol],
    ctx: &mut OptimizerContext<'_>,
) -> Result<Vec<Expression>, PlanningError> {
    let node = plan.node(id);
    let child_outputs = |n: usize| -> Vec<Expression> {
        node.children
            .get(n)
            .and_then(|c| plan.node(*c).output_cols.clone())
            .unwrap_or_default()
    };

    let cols = match &node.payload {
        // an empty projection list (procedure and atomic-update wrappers)
        // passes its input through
        NodePayload::Project(p) if p.cols.is_empty() && p.into_group.is_none() => {
            child_outputs(0)
        }
        NodePayload::Project(p) => p.cols.clone(),
        NodePayload::Group(p) => {
            let mut cols = p.cols.clone();
            cols.extend(p.aggregates.iter().cloned());
            cols
        }
        NodePayload::Join(_) => {
            let mut cols = child_outputs(0);
            cols.extend(child_outputs(1));
            cols
        }
        NodePayload::SetOp(_) => child_outputs(0),
        NodePayload::Access(p) => {
            if let Some(sub) = &p.sub_plan {
                sub.output_cols.clone()
            } else if matches!(&p.command, Some(c) if !matches!(c, Command::Query(_))) {
                // atomic updates and unplanned procedure pushes produce no
                // resolvable column set
                Vec::new()
            } else {
                let mut cols = Vec::new();
                for group in &p.groups {
                    cols.extend(leaf_outputs(ctx, group, referenced)?);
                }
                cols
            }
        }
        NodePayload::Source(p) => {
            if let Some(map) = &p.symbol_map {
                let mapped: Vec<Expression> = map
                    .iter()
                    .filter(|(declared, _)| {
                        referenced.iter().any(|r| {
                            r.metadata_id == declared.metadata_id
                                && p.group.matches_name(&r.group)
                        })
                    })
                    .map(|(declared, _)| Expression::Element(declared.clone()))
                    .collect();
                if mapped.is_empty() {
                    map.iter()
                        .map(|(declared, _)| Expression::Element(declared.clone()))
                        .collect()
                } else {
                    mapped
                }
            } else if !node.children.is_empty() {
                child_outputs(0)
            } else {
                leaf_outputs(ctx, &p.group, referenced)?
            }
        }
        NodePayload::Null => Vec::new(),
        // unary passthrough operators
        _ => child_outputs(0),
    };
    Ok(cols)
}

/// Referenced columns of a leaf group in catalog declaration order; an
/// unreferenced leaf still produces its first column so it emits rows.
fn leaf_outputs(
    ctx: &mut OptimizerContext<'_>,
    group: &crate::ast::GroupSymbol,
    referenced: &[ElementSymbol],
) -> Result<Vec<Expression>, PlanningError> {
    let catalog = group_elements(ctx.metadata, group)?;
    let mut out: Vec<Expression> = catalog
        .iter()
        .filter(|c| {
            referenced
                .iter()
                .any(|r| r.metadata_id == c.metadata_id && group.matches_name(&r.group))
        })
        .cloned()
        .map(Expression::Element)
        .collect();
    if out.is_empty() {
        if let Some(first) = catalog.into_iter().next() {
            out.push(Expression::Element(first));
        }
    }
    Ok(out)
}

pub fn calculate_cost(
    plan: &mut PlanArena,
    _ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let Some(root) = plan.root else { return Ok(false) };

    const LEAF_CARDINALITY: f64 = 1000.0;
    const SELECT_FACTOR: f64 = 0.33;
    const JOIN_CRITERIA_FACTOR: f64 = 0.1;
    const GROUP_FACTOR: f64 = 0.25;
    const DISTINCT_FACTOR: f64 = 0.5;

    for id in plan.postorder(root) {
        let node = plan.node(id);
        let child_card = |n: usize| -> f64 {
            node.children
                .get(n)
                .and_then(|c| plan.node(*c).stats.cardinality)
                .unwrap_or(LEAF_CARDINALITY)
        };

        let mut stats = node.stats.clone();
        match &node.payload {
            NodePayload::Access(p) => {
                stats.cardinality = Some(LEAF_CARDINALITY);
                if p.is_dependent_set {
                    stats.dep_access_cardinality = Some(LEAF_CARDINALITY * SELECT_FACTOR);
                }
            }
            NodePayload::Null => {
                stats.cardinality = Some(1.0);
            }
            NodePayload::Source(_) => {
                stats.cardinality = Some(if node.children.is_empty() {
                    LEAF_CARDINALITY
                } else {
                    child_card(0)
                });
            }
            NodePayload::Select(_) => {
                stats.cardinality = Some(child_card(0) * SELECT_FACTOR);
            }
            NodePayload::Join(p) => {
                let (l, r) = (child_card(0), child_card(1));
                let mut out = l * r;
                if !p.criteria.is_empty() {
                    out *= JOIN_CRITERIA_FACTOR;
                }
                stats.cardinality = Some(out);
                stats.join_cost = Some(l + r + out);
                if p.dependent_value_source.is_some() {
                    stats.dep_join_cost = Some(l + out);
                }
            }
            NodePayload::Group(_) => {
                let out = child_card(0) * GROUP_FACTOR;
                stats.cardinality = Some(out);
                stats.distinct_size = Some(out);
            }
            NodePayload::DupRemove => {
                let out = child_card(0) * DISTINCT_FACTOR;
                stats.cardinality = Some(out);
                stats.distinct_size = Some(out);
            }
            NodePayload::Sort(p) => {
                let out = if p.is_dup_removal {
                    child_card(0) * DISTINCT_FACTOR
                } else {
                    child_card(0)
                };
                stats.cardinality = Some(out);
            }
            NodePayload::TupleLimit(p) => {
                let bound = p.row_limit.map(|l| l as f64).unwrap_or(f64::MAX);
                stats.cardinality = Some(child_card(0).min(bound));
            }
            NodePayload::SetOp(_) => {
                let total: f64 = (0..node.children.len()).map(child_card).sum();
                stats.cardinality = Some(total);
            }
            NodePayload::Project(_) => {
                stats.cardinality = Some(child_card(0));
            }
        }
        plan.node_mut(id).stats = stats;
    }
    // cost annotation always rewrites in place but never restructures
    Ok(false)
}
