// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query plan compilation
//!
//! This module turns a resolved command into an executable physical operator
//! tree in four stages: canonical (unoptimized) logical plan construction,
//! sub-plan merging for views, rule-based logical optimization, and lowering
//! to physical operators.

use std::collections::HashMap;

use thiserror::Error;

use crate::catalog::MetadataError;

pub mod builders;
pub mod hints;
pub mod ids;
pub mod merge;
pub mod operators;
pub mod optimizers;
pub mod trace;

pub use hints::PlanHints;
pub use ids::IdGenerator;
pub use trace::{JsonTraceSink, TraceSink};

use operators::physical::ProcessorPlan;

/// Caller-supplied compilation context: pre-compiled sub-plans for procedure
/// sources, keyed case-insensitively by procedure name.
#[derive(Debug, Default)]
pub struct PlanningContext {
    prepared_plans: HashMap<String, ProcessorPlan>,
}

impl PlanningContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_prepared_plan(&mut self, name: impl Into<String>, plan: ProcessorPlan) {
        self.prepared_plans
            .insert(name.into().to_ascii_lowercase(), plan);
    }

    pub fn prepared_plan(&self, name: &str) -> Option<&ProcessorPlan> {
        self.prepared_plans.get(&name.to_ascii_lowercase())
    }
}

/// Planning errors. Everything here is fatal for the current compilation;
/// unmatched dependent hints are the one non-fatal condition and are logged
/// instead of raised.
#[derive(Error, Debug)]
pub enum PlanningError {
    /// The plan cannot be realized (unrecognized node kind reaching lowering,
    /// an unreachable column reference, malformed input structure).
    #[error("Invalid plan: {0}")]
    Planner(String),

    /// A catalog or capability lookup failed or was inconsistent.
    #[error("Metadata failure during planning: {0}")]
    Metadata(#[from] MetadataError),
}
