// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Rule identifiers and the optimizer's micro-scheduler stack
//!
//! The stack is rule-driven, not externally drained: the executing rule
//! receives the remaining stack by mutable reference and may push further
//! identifiers to the front (ChooseDependent re-queues criteria pushdown
//! after converting a join side).

use std::collections::VecDeque;

/// Closed set of optimizer rules, dispatched through a single `apply` match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleId {
    PlaceAccess,
    PlanProcedures,
    MergeVirtual,
    RemoveOptionalJoins,
    PlanUnions,
    PushSelectCriteria,
    MergeCriteria,
    CleanCriteria,
    PushAggregates,
    PlanJoins,
    ChooseJoinStrategy,
    ChooseDependent,
    RaiseAccess,
    PushLimit,
    AssignOutputElements,
    CollapseSource,
    CalculateCost,
}

impl RuleId {
    pub fn name(&self) -> &'static str {
        match self {
            RuleId::PlaceAccess => "PlaceAccess",
            RuleId::PlanProcedures => "PlanProcedures",
            RuleId::MergeVirtual => "MergeVirtual",
            RuleId::RemoveOptionalJoins => "RemoveOptionalJoins",
            RuleId::PlanUnions => "PlanUnions",
            RuleId::PushSelectCriteria => "PushSelectCriteria",
            RuleId::MergeCriteria => "MergeCriteria",
            RuleId::CleanCriteria => "CleanCriteria",
            RuleId::PushAggregates => "PushAggregates",
            RuleId::PlanJoins => "PlanJoins",
            RuleId::ChooseJoinStrategy => "ChooseJoinStrategy",
            RuleId::ChooseDependent => "ChooseDependent",
            RuleId::RaiseAccess => "RaiseAccess",
            RuleId::PushLimit => "PushLimit",
            RuleId::AssignOutputElements => "AssignOutputElements",
            RuleId::CollapseSource => "CollapseSource",
            RuleId::CalculateCost => "CalculateCost",
        }
    }
}

/// Front-push / front-pop deque of pending rules.
#[derive(Debug, Default)]
pub struct RuleStack {
    rules: VecDeque<RuleId>,
}

impl RuleStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a rule to run next.
    pub fn push_front(&mut self, rule: RuleId) {
        self.rules.push_front(rule);
    }

    /// Append a rule to the end of the pending sequence; used when building
    /// the initial template.
    pub fn push_back(&mut self, rule: RuleId) {
        self.rules.push_back(rule);
    }

    pub fn pop_front(&mut self) -> Option<RuleId> {
        self.rules.pop_front()
    }

    pub fn contains(&self, rule: RuleId) -> bool {
        self.rules.contains(&rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_push_runs_before_remaining_template() {
        let mut stack = RuleStack::new();
        stack.push_back(RuleId::PlaceAccess);
        stack.push_back(RuleId::CalculateCost);
        assert_eq!(stack.pop_front(), Some(RuleId::PlaceAccess));

        stack.push_front(RuleId::PushSelectCriteria);
        assert_eq!(stack.pop_front(), Some(RuleId::PushSelectCriteria));
        assert_eq!(stack.pop_front(), Some(RuleId::CalculateCost));
        assert_eq!(stack.pop_front(), None);
    }
}
