// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Source capability discovery
//!
//! Each data source (model) declares the operational features it supports.
//! The planner consults these when choosing dependent-join bounds, bulk/batch
//! insert modes, and alias handling for pushed commands. Discovery itself is
//! an external concern; the planner only performs synchronous lookups.

use serde::{Deserialize, Serialize};

use crate::catalog::MetadataError;

/// Declared push-down/operational features of one data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCapabilities {
    pub supports_batched_updates: bool,
    pub supports_bulk_update: bool,
    /// Upper bound on IN-list size for dependent accesses, `None` = unbounded.
    pub max_in_criteria_size: Option<usize>,
    pub supports_group_aliases: bool,
}

impl Default for SourceCapabilities {
    fn default() -> Self {
        Self {
            supports_batched_updates: false,
            supports_bulk_update: false,
            max_in_criteria_size: None,
            supports_group_aliases: true,
        }
    }
}

/// Capability lookup by model name.
pub trait CapabilitiesFinder {
    fn find_capabilities(&self, model_name: &str) -> Result<SourceCapabilities, MetadataError>;
}

/// In-memory finder for tests: per-model overrides over a default record.
#[derive(Debug, Default)]
pub struct FakeCapabilitiesFinder {
    overrides: std::collections::HashMap<String, SourceCapabilities>,
    default: SourceCapabilities,
}

impl FakeCapabilitiesFinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(default: SourceCapabilities) -> Self {
        Self {
            overrides: std::collections::HashMap::new(),
            default,
        }
    }

    pub fn set(&mut self, model_name: impl Into<String>, caps: SourceCapabilities) {
        self.overrides.insert(model_name.into(), caps);
    }
}

impl CapabilitiesFinder for FakeCapabilitiesFinder {
    fn find_capabilities(&self, model_name: &str) -> Result<SourceCapabilities, MetadataError> {
        Ok(self
            .overrides
            .get(model_name)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finder_falls_back_to_default() {
        let mut finder = FakeCapabilitiesFinder::new();
        finder.set(
            "pm1",
            SourceCapabilities {
                supports_batched_updates: true,
                supports_bulk_update: false,
                max_in_criteria_size: Some(100),
                supports_group_aliases: false,
            },
        );

        let pm1 = finder.find_capabilities("pm1").unwrap();
        assert!(pm1.supports_batched_updates);
        assert_eq!(pm1.max_in_criteria_size, Some(100));

        let other = finder.find_capabilities("pm2").unwrap();
        assert_eq!(other, SourceCapabilities::default());
    }
}
