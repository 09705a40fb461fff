// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Set query compilation tests
//!
//! UNION / INTERSECT / EXCEPT plans through the full pipeline, covering
//! branch flattening, duplicate removal, and limit pushdown.

use fedsql::ast::{
    Command, DataType, ElementSymbol, Expression, From, FromClause, FromHints, GroupSymbol,
    Limit, Query, Select, SetOpType, SetQuery,
};
use fedsql::capabilities::FakeCapabilitiesFinder;
use fedsql::catalog::FakeMetadata;
use fedsql::{
    compile, IdGenerator, JoinKind, PhysicalJoinStrategy, PhysicalNode, PlanningContext, SortMode,
    SortRequirement,
};

/// Three one-column integer tables on a single model.
fn catalog() -> (FakeMetadata, Vec<Command>, Vec<Expression>) {
    let mut md = FakeMetadata::new();
    let pm1 = md.add_model("pm1");
    let mut branches = Vec::new();
    let mut cols = Vec::new();
    for (table, col) in [("pm1.A", "a1"), ("pm1.B", "b1"), ("pm1.C", "c1")] {
        let (group, elems) = md.add_table(pm1, table, &[(col, DataType::Integer)]);
        let expr =
            Expression::Element(ElementSymbol::new(table, col, elems[0], DataType::Integer));
        branches.push(Command::Query(Query {
            select: Select {
                distinct: false,
                symbols: vec![expr.clone()],
            },
            into: None,
            from: Some(From {
                clauses: vec![FromClause::Unary {
                    group: GroupSymbol::new(table, group),
                    hints: FromHints::default(),
                }],
            }),
            criteria: None,
            group_by: vec![],
            having: None,
            order_by: None,
            limit: None,
        }));
        cols.push(expr);
    }
    (md, branches, cols)
}

fn set_query(left: Command, right: Command, op: SetOpType, all: bool) -> Command {
    Command::SetQuery(SetQuery {
        op,
        all,
        left: Box::new(left),
        right: Box::new(right),
        order_by: None,
        limit: None,
    })
}

fn compile_one(md: &FakeMetadata, cmd: &Command) -> fedsql::ProcessorPlan {
    let caps = FakeCapabilitiesFinder::new();
    let mut ids = IdGenerator::new();
    let ctx = PlanningContext::new();
    compile(cmd, md, &caps, &mut ids, &ctx, None).unwrap()
}

#[test]
fn distinct_union_dedupes_above_a_union_all() {
    let (md, mut branches, _) = catalog();
    let b = branches.remove(1);
    let a = branches.remove(0);
    let plan = compile_one(&md, &set_query(a, b, SetOpType::Union, false));

    let PhysicalNode::Sort { mode, keys, input, .. } = &plan.root else {
        panic!("expected a dedup sort at the root, got {}", plan.root.name());
    };
    assert_eq!(*mode, SortMode::DupRemove);
    assert!(keys.is_empty());
    let PhysicalNode::UnionAll { inputs, .. } = input.as_ref() else {
        panic!("expected a union all under the sort");
    };
    assert_eq!(inputs.len(), 2);
}

#[test]
fn nested_union_all_flattens_to_one_operator() {
    let (md, mut branches, cols) = catalog();
    let c = branches.remove(2);
    let b = branches.remove(1);
    let a = branches.remove(0);
    let inner = set_query(a, b, SetOpType::Union, true);
    let plan = compile_one(&md, &set_query(inner, c, SetOpType::Union, true));

    let PhysicalNode::UnionAll { inputs, output_cols } = &plan.root else {
        panic!("expected a union all root, got {}", plan.root.name());
    };
    assert_eq!(inputs.len(), 3);
    // the combined query keeps the leftmost branch's columns
    assert_eq!(output_cols, &vec![cols[0].clone()]);
}

#[test]
fn except_lowers_to_an_anti_semi_merge_join() {
    let (md, mut branches, cols) = catalog();
    let b = branches.remove(1);
    let a = branches.remove(0);
    let plan = compile_one(&md, &set_query(a, b, SetOpType::Except, false));

    let PhysicalNode::Join {
        kind,
        strategy,
        left_exprs,
        ..
    } = &plan.root
    else {
        panic!("expected a join root, got {}", plan.root.name());
    };
    assert_eq!(*kind, JoinKind::AntiSemi);
    // both sides sort-distinct their rows before the merge walk
    let PhysicalJoinStrategy::Merge {
        left_sort,
        right_sort,
        residual,
    } = strategy
    else {
        panic!("expected a merge strategy");
    };
    assert_eq!(*left_sort, SortRequirement::SortDistinct);
    assert_eq!(*right_sort, SortRequirement::SortDistinct);
    assert!(residual.is_empty());
    assert_eq!(left_exprs, &vec![cols[0].clone()]);
    assert_eq!(plan.output_cols, vec![cols[0].clone()]);
}

#[test]
fn intersect_lowers_to_a_semi_join() {
    let (md, mut branches, _) = catalog();
    let b = branches.remove(1);
    let a = branches.remove(0);
    let plan = compile_one(&md, &set_query(a, b, SetOpType::Intersect, false));

    let PhysicalNode::Join { kind, .. } = &plan.root else {
        panic!("expected a join root, got {}", plan.root.name());
    };
    assert_eq!(*kind, JoinKind::Semi);
}

#[test]
fn limit_is_copied_above_every_union_branch() {
    let (md, mut branches, _) = catalog();
    let b = branches.remove(1);
    let a = branches.remove(0);
    let cmd = Command::SetQuery(SetQuery {
        op: SetOpType::Union,
        all: true,
        left: Box::new(a),
        right: Box::new(b),
        order_by: None,
        limit: Some(Limit {
            row_limit: Some(10),
            offset: Some(3),
        }),
    });
    let plan = compile_one(&md, &cmd);

    let PhysicalNode::Limit {
        row_limit, offset, input, ..
    } = &plan.root
    else {
        panic!("expected a limit root, got {}", plan.root.name());
    };
    assert_eq!((*row_limit, *offset), (Some(10), Some(3)));
    let PhysicalNode::UnionAll { inputs, .. } = input.as_ref() else {
        panic!("expected a union all under the limit");
    };
    // each branch only needs limit + offset rows, with no branch offset
    for branch in inputs {
        let PhysicalNode::Limit { row_limit, offset, .. } = branch else {
            panic!("expected a pushed limit on each branch, got {}", branch.name());
        };
        assert_eq!((*row_limit, *offset), (Some(13), None));
    }
}
