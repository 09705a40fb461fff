// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Plan builders (Command→Logical, Logical→Physical)

pub mod canonical;
pub mod physical;

pub use canonical::CanonicalPlanner;
pub use physical::PhysicalPlanner;
