// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Plan hints - feature flags gathered while building plans
//!
//! Hints are a pure aggregator: boolean OR and list union only. The optimizer
//! reads them to decide which rules to schedule. Disabling a hint may only
//! skip an optimization, never change result semantics - every gated rule is
//! a pure rewrite that is safe to omit when its precondition is absent.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanHints {
    pub has_join: bool,
    pub has_criteria: bool,
    pub has_aggregates: bool,
    pub has_sort: bool,
    pub has_set_query: bool,
    pub has_limit: bool,
    pub has_virtual_groups: bool,
    pub has_optional_join: bool,
    pub has_relational_proc: bool,
    pub is_update: bool,
    /// Group names from MAKE DEPENDENT hints.
    pub make_dep_groups: Vec<String>,
    /// Group names from MAKE NOT DEPENDENT hints.
    pub make_not_dep_groups: Vec<String>,
}

impl PlanHints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Boolean-OR the flags and union the lists of `other` into `self`.
    pub fn combine(&mut self, other: &PlanHints) {
        self.has_join |= other.has_join;
        self.has_criteria |= other.has_criteria;
        self.has_aggregates |= other.has_aggregates;
        self.has_sort |= other.has_sort;
        self.has_set_query |= other.has_set_query;
        self.has_limit |= other.has_limit;
        self.has_virtual_groups |= other.has_virtual_groups;
        self.has_optional_join |= other.has_optional_join;
        self.has_relational_proc |= other.has_relational_proc;
        self.is_update |= other.is_update;

        for g in &other.make_dep_groups {
            if !self.make_dep_groups.iter().any(|x| x.eq_ignore_ascii_case(g)) {
                self.make_dep_groups.push(g.clone());
            }
        }
        for g in &other.make_not_dep_groups {
            if !self
                .make_not_dep_groups
                .iter()
                .any(|x| x.eq_ignore_ascii_case(g))
            {
                self.make_not_dep_groups.push(g.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_is_or_and_union() {
        let mut a = PlanHints::new();
        a.has_join = true;
        a.make_dep_groups.push("g1".to_string());

        let mut b = PlanHints::new();
        b.has_limit = true;
        b.make_dep_groups.push("G1".to_string());
        b.make_dep_groups.push("g2".to_string());

        a.combine(&b);
        assert!(a.has_join);
        assert!(a.has_limit);
        assert!(!a.has_sort);
        // case-insensitive dedup keeps the first spelling
        assert_eq!(a.make_dep_groups, vec!["g1".to_string(), "g2".to_string()]);
    }

    #[test]
    fn combine_never_clears_flags() {
        let mut a = PlanHints::new();
        a.has_aggregates = true;
        a.combine(&PlanHints::new());
        assert!(a.has_aggregates);
    }
}
