// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Optimizer rules
//!
//! Every rule is a pure plan rewrite: safe to skip when its precondition is
//! absent, mandatory when present. Rules report whether they changed the
//! plan so the planner can trace before/after text.

use crate::ast::{Criteria, ElementSymbol, Expression, GroupSymbol};
use crate::capabilities::CapabilitiesFinder;
use crate::catalog::QueryMetadata;
use crate::plan::operators::logical::{NodePayload, PlanArena};
use crate::plan::optimizers::stack::{RuleId, RuleStack};
use crate::plan::{IdGenerator, PlanningContext, PlanningError};

pub mod aggregates;
pub mod criteria;
pub mod dependent;
pub mod finalize;
pub mod joins;
pub mod limits;
pub mod procedures;
pub mod sources;
pub mod unions;

/// Shared state handed to every rule invocation.
pub struct OptimizerContext<'a> {
    pub metadata: &'a dyn QueryMetadata,
    pub capabilities: &'a dyn CapabilitiesFinder,
    pub ids: &'a mut IdGenerator,
    pub prepared: &'a PlanningContext,
}

/// Single dispatch point for the closed rule set.
pub fn apply(
    rule: RuleId,
    plan: &mut PlanArena,
    ctx: &mut OptimizerContext<'_>,
    stack: &mut RuleStack,
) -> Result<bool, PlanningError> {
    match rule {
        RuleId::PlaceAccess => sources::place_access(plan, ctx),
        RuleId::PlanProcedures => procedures::plan_procedures(plan, ctx),
        RuleId::MergeVirtual => sources::merge_virtual(plan, ctx),
        RuleId::RemoveOptionalJoins => joins::remove_optional_joins(plan, ctx),
        RuleId::PlanUnions => unions::plan_unions(plan, ctx),
        RuleId::PushSelectCriteria => criteria::push_select_criteria(plan, ctx),
        RuleId::MergeCriteria => criteria::merge_criteria(plan, ctx),
        RuleId::CleanCriteria => criteria::clean_criteria(plan, ctx),
        RuleId::PushAggregates => aggregates::push_aggregates(plan, ctx),
        RuleId::PlanJoins => joins::plan_joins(plan, ctx),
        RuleId::ChooseJoinStrategy => joins::choose_join_strategy(plan, ctx),
        RuleId::ChooseDependent => dependent::choose_dependent(plan, ctx, stack),
        RuleId::RaiseAccess => sources::raise_access(plan, ctx),
        RuleId::PushLimit => limits::push_limit(plan, ctx),
        RuleId::AssignOutputElements => finalize::assign_output_elements(plan, ctx),
        RuleId::CollapseSource => sources::collapse_source(plan, ctx),
        RuleId::CalculateCost => finalize::calculate_cost(plan, ctx),
    }
}

/// True when every referenced group name resolves against `groups`.
pub(crate) fn groups_cover(groups: &[GroupSymbol], referenced: &[String]) -> bool {
    referenced
        .iter()
        .all(|name| groups.iter().any(|g| g.matches_name(name)))
}

/// Element references of a criteria tree, subqueries excluded.
pub(crate) fn criteria_elements(criteria: &Criteria, out: &mut Vec<ElementSymbol>) {
    criteria.collect_elements(out);
}

/// Element references made by a node's own payload expressions. Nested
/// commands on Source/Access nodes are self-contained and excluded; symbol
/// map targets count because the grafted sub-plan must keep producing them.
pub(crate) fn payload_elements(payload: &NodePayload, out: &mut Vec<ElementSymbol>) {
    match payload {
        NodePayload::Project(p) => {
            for c in &p.cols {
                c.collect_elements(out);
            }
        }
        NodePayload::Join(p) => {
            for c in &p.criteria {
                criteria_elements(c, out);
            }
            for e in p.left_exprs.iter().chain(&p.right_exprs) {
                e.collect_elements(out);
            }
        }
        NodePayload::Select(p) => criteria_elements(&p.criteria, out),
        NodePayload::Sort(p) => {
            for k in &p.keys {
                k.expression.collect_elements(out);
            }
        }
        NodePayload::Group(p) => {
            for e in p.cols.iter().chain(&p.aggregates) {
                e.collect_elements(out);
            }
        }
        NodePayload::Source(p) => {
            if let Some(map) = &p.symbol_map {
                for (_, target) in map {
                    target.collect_elements(out);
                }
            }
        }
        _ => {}
    }
}

/// Group names referenced by a node's own payload expressions.
pub(crate) fn payload_groups(payload: &NodePayload) -> Vec<String> {
    let mut elements = Vec::new();
    payload_elements(payload, &mut elements);
    let mut out: Vec<String> = Vec::new();
    for e in elements {
        if !out.iter().any(|g| g.eq_ignore_ascii_case(&e.group)) {
            out.push(e.group);
        }
    }
    out
}

/// Rewrite a payload's expressions through a symbol map in place.
pub(crate) fn rewrite_payload(payload: &mut NodePayload, map: &[(ElementSymbol, Expression)]) {
    match payload {
        NodePayload::Project(p) => {
            for c in &mut p.cols {
                *c = c.rewrite(map);
            }
        }
        NodePayload::Join(p) => {
            for c in &mut p.criteria {
                *c = c.rewrite(map);
            }
            for e in p.left_exprs.iter_mut().chain(&mut p.right_exprs) {
                *e = e.rewrite(map);
            }
        }
        NodePayload::Select(p) => p.criteria = p.criteria.rewrite(map),
        NodePayload::Sort(p) => {
            for k in &mut p.keys {
                k.expression = k.expression.rewrite(map);
            }
        }
        NodePayload::Group(p) => {
            for e in p.cols.iter_mut().chain(&mut p.aggregates) {
                *e = e.rewrite(map);
            }
        }
        _ => {}
    }
}
