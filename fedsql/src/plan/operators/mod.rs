// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Operator definitions for logical and physical query plans

pub mod logical;
pub mod physical;
