// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Rule-based logical plan optimization

pub mod relational;
pub mod rules;
pub mod stack;

pub use relational::RelationalPlanner;
pub use stack::{RuleId, RuleStack};
