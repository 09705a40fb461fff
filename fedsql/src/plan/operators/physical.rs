// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Physical operator descriptors
//!
//! Output IR of the compiler: concrete operator descriptors the external
//! execution engine pulls rows through. Immutable after construction except
//! child wiring during lowering.

use serde::{Deserialize, Serialize};

use crate::ast::{
    Command, Criteria, ElementSymbol, Expression, GroupSymbol, JoinType, OrderByItem,
};
use crate::plan::operators::logical::NodeStats;

/// Join kind at the physical level. Extends the logical join types with the
/// semi variants used to realize INTERSECT and EXCEPT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Cross,
    LeftOuter,
    RightOuter,
    FullOuter,
    Semi,
    AntiSemi,
}

impl From<JoinType> for JoinKind {
    fn from(jt: JoinType) -> Self {
        match jt {
            JoinType::Inner => JoinKind::Inner,
            JoinType::Cross => JoinKind::Cross,
            JoinType::LeftOuter => JoinKind::LeftOuter,
            JoinType::RightOuter => JoinKind::RightOuter,
            JoinType::FullOuter => JoinKind::FullOuter,
        }
    }
}

/// Per-side input requirement of a merge-style join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortRequirement {
    AlreadySorted,
    Sort,
    /// Sort and remove duplicates; used by the set-operation joins.
    SortDistinct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicalJoinStrategy {
    /// Full predicate evaluated per row pair.
    NestedLoop { predicate: Vec<Criteria> },
    /// Equi-join over sorted inputs with an optional residual predicate.
    Merge {
        left_sort: SortRequirement,
        right_sort: SortRequirement,
        residual: Vec<Criteria>,
    },
    /// Merge variant that partitions the smaller side first.
    PartitionedSort {
        left_sort: SortRequirement,
        right_sort: SortRequirement,
        residual: Vec<Criteria>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortMode {
    Sort,
    /// Dedupe-only; ordering is incidental.
    DupRemove,
    /// Combined sort + dedupe.
    SortDupRemove,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicalNode {
    Project {
        cols: Vec<Expression>,
        output_cols: Vec<Expression>,
        stats: NodeStats,
        input: Box<PhysicalNode>,
    },
    ProjectInto {
        target: GroupSymbol,
        cols: Vec<Expression>,
        model_name: Option<String>,
        batch: bool,
        bulk: bool,
        output_cols: Vec<Expression>,
        input: Box<PhysicalNode>,
    },
    Join {
        kind: JoinKind,
        strategy: PhysicalJoinStrategy,
        /// Equi-join expressions, one list per side, in order.
        left_exprs: Vec<Expression>,
        right_exprs: Vec<Expression>,
        left_distinct: bool,
        right_distinct: bool,
        dependent_value_source: Option<String>,
        output_cols: Vec<Expression>,
        stats: NodeStats,
        left: Box<PhysicalNode>,
        right: Box<PhysicalNode>,
    },
    /// Remote access with a pushed command.
    Access {
        model_name: Option<String>,
        command: Command,
        is_dependent_set: bool,
        max_in_size: Option<usize>,
        output_cols: Vec<Expression>,
        stats: NodeStats,
    },
    /// Execution of an already-compiled sub-plan.
    PlanExecution {
        plan: Box<ProcessorPlan>,
        output_cols: Vec<Expression>,
    },
    /// Sub-plan execution fed by correlated inputs from the enclosing plan.
    DependentProcExecution {
        plan: Box<ProcessorPlan>,
        correlated_refs: Vec<ElementSymbol>,
        output_cols: Vec<Expression>,
    },
    Select {
        criteria: Criteria,
        output_cols: Vec<Expression>,
        input: Box<PhysicalNode>,
    },
    Sort {
        keys: Vec<OrderByItem>,
        mode: SortMode,
        output_cols: Vec<Expression>,
        input: Box<PhysicalNode>,
    },
    Grouping {
        cols: Vec<Expression>,
        aggregates: Vec<Expression>,
        remove_duplicates: bool,
        output_cols: Vec<Expression>,
        input: Box<PhysicalNode>,
    },
    UnionAll {
        output_cols: Vec<Expression>,
        inputs: Vec<PhysicalNode>,
    },
    Limit {
        row_limit: Option<u64>,
        offset: Option<u64>,
        output_cols: Vec<Expression>,
        input: Box<PhysicalNode>,
    },
    NullOp {
        output_cols: Vec<Expression>,
    },
}

impl PhysicalNode {
    pub fn output_cols(&self) -> &[Expression] {
        match self {
            PhysicalNode::Project { output_cols, .. }
            | PhysicalNode::ProjectInto { output_cols, .. }
            | PhysicalNode::Join { output_cols, .. }
            | PhysicalNode::Access { output_cols, .. }
            | PhysicalNode::PlanExecution { output_cols, .. }
            | PhysicalNode::DependentProcExecution { output_cols, .. }
            | PhysicalNode::Select { output_cols, .. }
            | PhysicalNode::Sort { output_cols, .. }
            | PhysicalNode::Grouping { output_cols, .. }
            | PhysicalNode::UnionAll { output_cols, .. }
            | PhysicalNode::Limit { output_cols, .. }
            | PhysicalNode::NullOp { output_cols } => output_cols,
        }
    }

    pub fn set_output_cols(&mut self, cols: Vec<Expression>) {
        match self {
            PhysicalNode::Project { output_cols, .. }
            | PhysicalNode::ProjectInto { output_cols, .. }
            | PhysicalNode::Join { output_cols, .. }
            | PhysicalNode::Access { output_cols, .. }
            | PhysicalNode::PlanExecution { output_cols, .. }
            | PhysicalNode::DependentProcExecution { output_cols, .. }
            | PhysicalNode::Select { output_cols, .. }
            | PhysicalNode::Sort { output_cols, .. }
            | PhysicalNode::Grouping { output_cols, .. }
            | PhysicalNode::UnionAll { output_cols, .. }
            | PhysicalNode::Limit { output_cols, .. }
            | PhysicalNode::NullOp { output_cols } => *output_cols = cols,
        }
    }

    /// Operator name for assertions and debug output.
    pub fn name(&self) -> &'static str {
        match self {
            PhysicalNode::Project { .. } => "Project",
            PhysicalNode::ProjectInto { .. } => "ProjectInto",
            PhysicalNode::Join { .. } => "Join",
            PhysicalNode::Access { .. } => "Access",
            PhysicalNode::PlanExecution { .. } => "PlanExecution",
            PhysicalNode::DependentProcExecution { .. } => "DependentProcExecution",
            PhysicalNode::Select { .. } => "Select",
            PhysicalNode::Sort { .. } => "Sort",
            PhysicalNode::Grouping { .. } => "Grouping",
            PhysicalNode::UnionAll { .. } => "UnionAll",
            PhysicalNode::Limit { .. } => "Limit",
            PhysicalNode::NullOp { .. } => "NullOp",
        }
    }

    /// The single input of a unary operator, `None` otherwise.
    pub fn input(&self) -> Option<&PhysicalNode> {
        match self {
            PhysicalNode::Project { input, .. }
            | PhysicalNode::ProjectInto { input, .. }
            | PhysicalNode::Select { input, .. }
            | PhysicalNode::Sort { input, .. }
            | PhysicalNode::Grouping { input, .. }
            | PhysicalNode::Limit { input, .. } => Some(input),
            _ => None,
        }
    }
}

/// Final compiler output: the physical operator tree plus the resolved
/// top-level output-column list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorPlan {
    pub root: PhysicalNode,
    pub output_cols: Vec<Expression>,
}
