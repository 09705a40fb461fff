// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! The relational planner: preparation, scheduling, rule execution
//!
//! Preparation wires compiled sub-plans, scans for virtual groups,
//! distributes dependent hints, and attaches correlated-reference lists.
//! Scheduling builds the rule stack from a fixed template, each entry
//! conditionally included per the plan's hints - a gated rule is a pure
//! rewrite whose precondition is genuinely absent, so skipping it can only
//! skip an optimization, never change semantics.

use crate::ast::Command;
use crate::capabilities::CapabilitiesFinder;
use crate::catalog::QueryMetadata;
use crate::plan::operators::logical::{NodeKind, NodePayload, PlanArena};
use crate::plan::optimizers::rules::{self, OptimizerContext};
use crate::plan::optimizers::stack::{RuleId, RuleStack};
use crate::plan::{IdGenerator, PlanHints, PlanningContext, PlanningError, TraceSink};

pub struct RelationalPlanner;

impl RelationalPlanner {
    pub fn new() -> Self {
        Self
    }

    pub fn optimize(
        &self,
        mut plan: PlanArena,
        hints: &mut PlanHints,
        metadata: &dyn QueryMetadata,
        capabilities: &dyn CapabilitiesFinder,
        ids: &mut IdGenerator,
        context: &PlanningContext,
        mut trace: Option<&mut dyn TraceSink>,
    ) -> Result<PlanArena, PlanningError> {
        self.prepare(&mut plan, hints, metadata, context)?;

        let mut stack = build_stack(hints);
        let mut ctx = OptimizerContext {
            metadata,
            capabilities,
            ids,
            prepared: context,
        };
        while let Some(rule) = stack.pop_front() {
            let before = plan.text();
            let changed = rules::apply(rule, &mut plan, &mut ctx, &mut stack)?;
            if changed {
                log::debug!("rule {} rewrote the plan", rule.name());
                if let Some(sink) = trace.as_mut() {
                    sink.record(rule.name(), &before, &plan.text());
                }
            }
        }
        Ok(plan)
    }

    fn prepare(
        &self,
        plan: &mut PlanArena,
        hints: &mut PlanHints,
        metadata: &dyn QueryMetadata,
        context: &PlanningContext,
    ) -> Result<(), PlanningError> {
        self.wire_prepared_plans(plan, context);
        self.scan_virtual_groups(plan, hints, metadata)?;
        self.distribute_dependent_hints(plan, hints, metadata)?;
        self.attach_correlated_references(plan);
        Ok(())
    }

    fn wire_prepared_plans(&self, plan: &mut PlanArena, context: &PlanningContext) {
        for id in plan.find_all(NodeKind::Source) {
            let Some(source) = plan.node(id).source() else { continue };
            let Some(Command::StoredProcedure(sp)) = &source.command else {
                continue;
            };
            if source.sub_plan.is_some() {
                continue;
            }
            let Some(compiled) = context.prepared_plan(&sp.name) else {
                continue;
            };
            let compiled = compiled.clone();
            if let Some(source) = plan.node_mut(id).source_mut() {
                source.sub_plan = Some(Box::new(compiled));
            }
        }
    }

    fn scan_virtual_groups(
        &self,
        plan: &PlanArena,
        hints: &mut PlanHints,
        metadata: &dyn QueryMetadata,
    ) -> Result<(), PlanningError> {
        for id in plan.find_all(NodeKind::Source) {
            let Some(source) = plan.node(id).source() else { continue };
            match metadata.is_virtual_group(source.group.metadata_id) {
                Ok(true) => {
                    hints.has_virtual_groups = true;
                    return Ok(());
                }
                Ok(false) => {}
                // command-carrying sources need no catalog entry
                Err(_) if source.command.is_some() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Tag each named source MAKE (NOT) DEPENDENT. Exact name/alias matches
    /// win; otherwise a unique catalog partial-name candidate is used.
    /// Unmatched names are logged and ignored.
    fn distribute_dependent_hints(
        &self,
        plan: &mut PlanArena,
        hints: &PlanHints,
        metadata: &dyn QueryMetadata,
    ) -> Result<(), PlanningError> {
        for name in &hints.make_dep_groups {
            if !tag_sources(plan, metadata, name, true)? {
                log::warn!("MAKE DEPENDENT hint matches no group: {}", name);
            }
        }
        for name in &hints.make_not_dep_groups {
            if !tag_sources(plan, metadata, name, false)? {
                log::warn!("MAKE NOT DEPENDENT hint matches no group: {}", name);
            }
        }
        Ok(())
    }

    /// A node whose payload embeds a subquery records the groups visible
    /// beneath it; the subquery's outer references resolve against those.
    fn attach_correlated_references(&self, plan: &mut PlanArena) {
        let Some(root) = plan.root else { return };
        let all_groups = plan.node(root).groups.clone();

        for id in plan.preorder(root) {
            let groups = plan.node(id).groups.clone();
            match &mut plan.node_mut(id).payload {
                NodePayload::Select(p) => {
                    let mut subs = Vec::new();
                    p.criteria.collect_subqueries(&mut subs);
                    if !subs.is_empty() {
                        p.correlated = groups;
                    }
                }
                NodePayload::Project(p) => {
                    let mut subs = Vec::new();
                    for c in &p.cols {
                        c.collect_subqueries(&mut subs);
                    }
                    if !subs.is_empty() {
                        p.correlated = groups;
                    }
                }
                NodePayload::Join(p) => {
                    let mut subs = Vec::new();
                    for c in &p.criteria {
                        c.collect_subqueries(&mut subs);
                    }
                    if !subs.is_empty() {
                        p.correlated = groups;
                    }
                }
                NodePayload::Source(p) => {
                    if let Some(Command::StoredProcedure(sp)) = &p.command {
                        let own = p.group.clone();
                        let refers_out = sp.parameters.iter().any(|param| {
                            let mut names = Vec::new();
                            param.collect_groups(&mut names);
                            names.iter().any(|n| !own.matches_name(n))
                        });
                        if refers_out {
                            p.correlated = all_groups
                                .iter()
                                .filter(|g| **g != own)
                                .cloned()
                                .collect();
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

impl Default for RelationalPlanner {
    fn default() -> Self {
        Self::new()
    }
}

fn tag_sources(
    plan: &mut PlanArena,
    metadata: &dyn QueryMetadata,
    name: &str,
    dep: bool,
) -> Result<bool, PlanningError> {
    let mut matched = false;
    for id in plan.find_all(NodeKind::Source) {
        let is_match = plan
            .node(id)
            .source()
            .map(|s| s.group.matches_name(name))
            .unwrap_or(false);
        if is_match {
            if let Some(source) = plan.node_mut(id).source_mut() {
                if dep {
                    source.make_dep = true;
                } else {
                    source.make_not_dep = true;
                }
            }
            matched = true;
        }
    }
    if matched {
        return Ok(true);
    }

    // fall back to the catalog's partial-name lookup, but only when it is
    // unambiguous
    let candidates = metadata.get_groups_for_partial_name(name)?;
    if candidates.len() != 1 {
        return Ok(false);
    }
    let full = &candidates[0];
    for id in plan.find_all(NodeKind::Source) {
        let is_match = plan
            .node(id)
            .source()
            .map(|s| s.group.matches_name(full))
            .unwrap_or(false);
        if is_match {
            if let Some(source) = plan.node_mut(id).source_mut() {
                if dep {
                    source.make_dep = true;
                } else {
                    source.make_not_dep = true;
                }
            }
            matched = true;
        }
    }
    Ok(matched)
}

/// Fixed scheduling template, each entry gated by the hint that proves its
/// precondition exists in the plan.
fn build_stack(hints: &PlanHints) -> RuleStack {
    let mut stack = RuleStack::new();
    if hints.has_optional_join {
        stack.push_back(RuleId::RemoveOptionalJoins);
    }
    stack.push_back(RuleId::PlaceAccess);
    if hints.has_relational_proc {
        stack.push_back(RuleId::PlanProcedures);
    }
    if hints.has_virtual_groups {
        stack.push_back(RuleId::MergeVirtual);
    }
    if hints.has_set_query {
        stack.push_back(RuleId::PlanUnions);
    }
    if hints.has_criteria {
        stack.push_back(RuleId::PushSelectCriteria);
        stack.push_back(RuleId::MergeCriteria);
        stack.push_back(RuleId::CleanCriteria);
    }
    if hints.has_aggregates {
        stack.push_back(RuleId::PushAggregates);
    }
    if hints.has_join {
        stack.push_back(RuleId::PlanJoins);
        stack.push_back(RuleId::ChooseJoinStrategy);
        stack.push_back(RuleId::ChooseDependent);
    }
    // folding into the pushed command is not join-specific work, so it runs
    // in every plan
    stack.push_back(RuleId::RaiseAccess);
    if hints.has_limit {
        stack.push_back(RuleId::PushLimit);
    }
    stack.push_back(RuleId::AssignOutputElements);
    stack.push_back(RuleId::CollapseSource);
    stack.push_back(RuleId::CalculateCost);
    stack
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::GroupSymbol;
    use crate::catalog::FakeMetadata;
    use crate::plan::operators::logical::SourcePayload;

    #[test]
    fn dependent_hints_match_names_case_insensitively() {
        let mut md = FakeMetadata::new();
        let pm1 = md.add_model("pm1");
        let (a, _) = md.add_table(pm1, "pm1.A", &[("a1", crate::ast::DataType::Integer)]);
        md.add_table(pm1, "pm1.B", &[("b1", crate::ast::DataType::Integer)]);

        let mut plan = PlanArena::new();
        let src = plan.add(
            NodePayload::Source(SourcePayload::new(GroupSymbol::aliased(
                "x",
                "pm1.A",
                a,
            ))),
            0,
        );
        plan.root = Some(src);

        // exact matches ignore case and see through aliases
        assert!(tag_sources(&mut plan, &md, "PM1.a", true).unwrap());
        assert!(plan.node(src).source().unwrap().make_dep);

        // an unresolvable name reports unmatched instead of erroring
        assert!(!tag_sources(&mut plan, &md, "pm1.C", false).unwrap());
        assert!(!plan.node(src).source().unwrap().make_not_dep);
    }

    #[test]
    fn ambiguous_partial_names_stay_unmatched() {
        let mut md = FakeMetadata::new();
        let pm1 = md.add_model("pm1");
        let (a, _) = md.add_table(pm1, "pm1.T", &[("a1", crate::ast::DataType::Integer)]);
        md.add_table(pm1, "pm2.T", &[("b1", crate::ast::DataType::Integer)]);

        let mut plan = PlanArena::new();
        let src = plan.add(
            NodePayload::Source(SourcePayload::new(GroupSymbol::new("pm1.T", a))),
            0,
        );
        plan.root = Some(src);

        // "T" resolves to two catalog groups; the hint is dropped
        assert!(!tag_sources(&mut plan, &md, "T", true).unwrap());
        assert!(!plan.node(src).source().unwrap().make_dep);
    }

    #[test]
    fn template_gates_rules_per_hints() {
        // PlaceAccess + RaiseAccess + the three finalizers always run
        let empty = build_stack(&PlanHints::new());
        assert_eq!(empty.len(), 5);

        let mut hints = PlanHints::new();
        hints.has_join = true;
        hints.has_criteria = true;
        let joined = build_stack(&hints);
        assert_eq!(joined.len(), 5 + 3 + 3);
    }

    #[test]
    fn raise_access_is_scheduled_without_joins() {
        let mut stack = build_stack(&PlanHints::new());
        let mut order = Vec::new();
        while let Some(rule) = stack.pop_front() {
            order.push(rule);
        }
        let raise = order.iter().position(|r| *r == RuleId::RaiseAccess).unwrap();
        let collapse = order
            .iter()
            .position(|r| *r == RuleId::CollapseSource)
            .unwrap();
        assert!(raise < collapse);
    }

    #[test]
    fn join_rules_run_after_criteria_rules() {
        let mut hints = PlanHints::new();
        hints.has_join = true;
        hints.has_criteria = true;
        let mut stack = build_stack(&hints);

        let mut order = Vec::new();
        while let Some(rule) = stack.pop_front() {
            order.push(rule);
        }
        let push = order
            .iter()
            .position(|r| *r == RuleId::PushSelectCriteria)
            .unwrap();
        let strategy = order
            .iter()
            .position(|r| *r == RuleId::ChooseJoinStrategy)
            .unwrap();
        let collapse = order
            .iter()
            .position(|r| *r == RuleId::CollapseSource)
            .unwrap();
        assert!(push < strategy);
        assert!(strategy < collapse);
        assert_eq!(*order.last().unwrap(), RuleId::CalculateCost);
    }
}
