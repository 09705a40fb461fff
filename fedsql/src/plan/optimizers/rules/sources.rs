// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Source and access placement rules
//!
//! PlaceAccess converts physical source leaves into routed Access nodes.
//! MergeVirtual inlines trivially-shaped merged view layers. RaiseAccess
//! folds adjacent operators into the pushed command. CollapseSource
//! synthesizes the pushed command for every Access that still lacks one.

use crate::ast::{
    Command, Criteria, Expression, From, FromClause, FromHints, Limit, OrderBy, Query, Select,
};
use crate::catalog::group_elements;
use crate::plan::operators::logical::{
    AccessPayload, NodeId, NodeKind, NodePayload, PlanArena,
};
use crate::plan::optimizers::rules::{groups_cover, rewrite_payload, OptimizerContext};
use crate::plan::PlanningError;

/// Convert every physical source leaf into an Access node pinned to its
/// routing model. Merged view layers and grafted sources stay untouched;
/// virtual leaves without a graft are a planner error caught at lowering.
pub fn place_access(
    plan: &mut PlanArena,
    ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    for id in plan.find_all(NodeKind::Source) {
        let node = plan.node(id);
        if !node.children.is_empty() {
            continue;
        }
        let source = match node.source() {
            Some(s) if s.symbol_map.is_none() => s.clone(),
            _ => continue,
        };
        // Sources carrying their own command route through it; a missing
        // catalog entry is only fatal for plain table references.
        let virtual_group = match ctx.metadata.is_virtual_group(source.group.metadata_id) {
            Ok(v) => v,
            Err(_) if source.command.is_some() => false,
            Err(e) => return Err(e.into()),
        };
        if virtual_group {
            continue;
        }

        let model_name = match ctx.metadata.get_model_id(source.group.metadata_id) {
            Ok(model) => Some(ctx.metadata.model_name(model)?),
            Err(_) if source.command.is_some() => None,
            Err(e) => return Err(e.into()),
        };

        let correlated_refs = match &source.command {
            Some(cmd) => correlated_elements(cmd, &source),
            None => Vec::new(),
        };

        plan.node_mut(id).payload = NodePayload::Access(AccessPayload {
            groups: vec![source.group.clone()],
            model_name,
            command: source.command,
            is_dependent_set: false,
            max_in_size: None,
            sub_plan: source.sub_plan,
            correlated_refs,
            make_dep: source.make_dep,
            make_not_dep: source.make_not_dep,
        });
        plan.node_mut(id).kind = NodeKind::Access;
        changed = true;
    }
    if changed {
        plan.recompute_groups();
    }
    Ok(changed)
}

/// Elements of the nested command that resolve against the outer groups
/// visible at the source, i.e. the inputs a dependent execution must feed.
fn correlated_elements(
    command: &Command,
    source: &crate::plan::operators::logical::SourcePayload,
) -> Vec<crate::ast::ElementSymbol> {
    let mut elements = Vec::new();
    if let Command::StoredProcedure(sp) = command {
        for p in &sp.parameters {
            p.collect_elements(&mut elements);
        }
    }
    elements.retain(|e| source.correlated.iter().any(|g| g.matches_name(&e.group)));
    elements
}

/// Inline a merged view layer whose grafted plan is a bare Project over one
/// leaf: references above are rewritten through the symbol map and the leaf
/// takes the view's place.
pub fn merge_virtual(
    plan: &mut PlanArena,
    _ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    loop {
        let candidate = plan.find_all(NodeKind::Source).into_iter().find_map(|id| {
            let node = plan.node(id);
            let source = node.source()?;
            source.symbol_map.as_ref()?;
            if node.children.len() != 1 {
                return None;
            }
            let project = node.children[0];
            if plan.node(project).kind != NodeKind::Project
                || plan.node(project).children.len() != 1
            {
                return None;
            }
            let leaf = plan.node(project).children[0];
            if !matches!(plan.node(leaf).kind, NodeKind::Access | NodeKind::Source)
                || !plan.node(leaf).children.is_empty()
            {
                return None;
            }
            Some((id, project, leaf))
        });

        let Some((source_id, project, leaf)) = candidate else {
            break;
        };
        let map = plan
            .node(source_id)
            .source()
            .and_then(|s| s.symbol_map.clone())
            .unwrap_or_default();

        // Rewrite every node outside the grafted subtree; the map's keys are
        // view elements and only occur above the graft point.
        let inside: Vec<NodeId> = plan.preorder(source_id);
        if let Some(root) = plan.root {
            for id in plan.preorder(root) {
                if !inside.contains(&id) {
                    rewrite_payload(&mut plan.node_mut(id).payload, &map);
                }
            }
        }

        plan.node_mut(project).children.clear();
        plan.node_mut(leaf).parent = None;
        match plan.node(source_id).parent {
            Some(p) => plan.replace_child(p, source_id, leaf),
            None => {
                if plan.root == Some(source_id) {
                    plan.root = Some(leaf);
                }
                plan.node_mut(source_id).parent = None;
            }
        }
        plan.recompute_groups();
        changed = true;
    }
    Ok(changed)
}

/// Fold Select/Project/Sort/DupRemove/TupleLimit operators sitting directly
/// above an Access into its pushed command, splicing them out of the tree.
pub fn raise_access(
    plan: &mut PlanArena,
    ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    loop {
        let mut folded = false;
        for id in plan.find_all(NodeKind::Access) {
            let Some(parent) = plan.node(id).parent else {
                continue;
            };
            if plan.node(parent).children.len() != 1 {
                continue;
            }
            if !foldable(plan, id, parent, ctx) {
                continue;
            }

            let parent_payload = plan.node(parent).payload.clone();
            let Some(query) = plan.node_mut(id).access_mut().and_then(ensure_query) else {
                continue;
            };
            match parent_payload {
                NodePayload::Select(p) => {
                    let mut conjuncts = query
                        .criteria
                        .take()
                        .map(Criteria::separate_by_and)
                        .unwrap_or_default();
                    conjuncts.push(p.criteria);
                    query.criteria = Criteria::combine_with_and(conjuncts);
                }
                NodePayload::Project(p) => {
                    query.select.symbols = p.cols;
                }
                NodePayload::Sort(p) => {
                    query.order_by = Some(OrderBy { items: p.keys });
                    if p.is_dup_removal {
                        query.select.distinct = true;
                    }
                }
                NodePayload::DupRemove => {
                    query.select.distinct = true;
                }
                NodePayload::TupleLimit(p) => {
                    query.limit = Some(Limit {
                        row_limit: p.row_limit,
                        offset: p.offset,
                    });
                }
                _ => continue,
            }
            plan.splice_out(parent);
            folded = true;
            changed = true;
            break;
        }
        if !folded {
            break;
        }
    }
    if changed {
        plan.recompute_groups();
    }
    Ok(changed)
}

fn foldable(
    plan: &PlanArena,
    access: NodeId,
    parent: NodeId,
    ctx: &OptimizerContext<'_>,
) -> bool {
    // Only query commands absorb operators.
    if let Some(a) = plan.node(access).access() {
        if matches!(&a.command, Some(c) if !matches!(c, Command::Query(_))) {
            return false;
        }
        if a.sub_plan.is_some() {
            return false;
        }
        // temp tables always fetch their full column set; the operators
        // above stay in the plan and run against the shared buffer
        if a.groups.len() == 1
            && a.groups.first().is_some_and(|g| {
                ctx.metadata.is_temporary_table(g.metadata_id).unwrap_or(false)
            })
        {
            return false;
        }
    }
    match &plan.node(parent).payload {
        NodePayload::Select(p) => {
            if p.is_having || !p.correlated.is_empty() {
                return false;
            }
            let mut referenced = Vec::new();
            p.criteria.collect_groups(&mut referenced);
            groups_cover(&plan.node(access).groups, &referenced)
        }
        NodePayload::Project(p) => p.into_group.is_none(),
        NodePayload::Sort(_) | NodePayload::DupRemove | NodePayload::TupleLimit(_) => true,
        _ => false,
    }
}

fn ensure_query(access: &mut AccessPayload) -> Option<&mut Query> {
    if access.command.is_none() {
        access.command = Some(Command::Query(Query {
            select: Select {
                distinct: false,
                symbols: Vec::new(),
            },
            into: None,
            from: Some(From {
                clauses: access
                    .groups
                    .iter()
                    .map(|g| FromClause::Unary {
                        group: g.clone(),
                        hints: FromHints::default(),
                    })
                    .collect(),
            }),
            criteria: None,
            group_by: Vec::new(),
            having: None,
            order_by: None,
            limit: None,
        }));
    }
    match access.command.as_mut() {
        Some(Command::Query(q)) => Some(q),
        _ => None,
    }
}

/// Give every Access a concrete pushed command. Temporary tables always
/// fetch their full column set; the lowering phase restores the requested
/// projection on top.
pub fn collapse_source(
    plan: &mut PlanArena,
    ctx: &mut OptimizerContext<'_>,
) -> Result<bool, PlanningError> {
    let mut changed = false;
    for id in plan.find_all(NodeKind::Access) {
        let node = plan.node(id);
        let access = match node.access() {
            Some(a) => a,
            None => continue,
        };
        if access.sub_plan.is_some() {
            continue;
        }
        if matches!(&access.command, Some(c) if !matches!(c, Command::Query(_))) {
            continue;
        }
        if let Some(Command::Query(q)) = &access.command {
            if !q.select.symbols.is_empty() {
                continue;
            }
        }

        let symbols = pushed_symbols(plan, id, ctx)?;
        let Some(query) = plan.node_mut(id).access_mut().and_then(ensure_query) else {
            continue;
        };
        query.select.symbols = symbols;
        changed = true;
    }
    Ok(changed)
}

fn pushed_symbols(
    plan: &PlanArena,
    id: NodeId,
    ctx: &mut OptimizerContext<'_>,
) -> Result<Vec<Expression>, PlanningError> {
    let node = plan.node(id);
    let Some(access) = node.access() else {
        return Ok(Vec::new());
    };
    let Some(first) = access.groups.first() else {
        return Ok(Vec::new());
    };
    if access.groups.len() == 1
        && ctx
            .metadata
            .is_temporary_table(first.metadata_id)
            .unwrap_or(false)
    {
        return Ok(group_elements(ctx.metadata, first)?
            .into_iter()
            .map(Expression::Element)
            .collect());
    }
    match &node.output_cols {
        Some(cols) if !cols.is_empty() => Ok(cols.clone()),
        _ => Ok(group_elements(ctx.metadata, first)?
            .into_iter()
            .map(Expression::Element)
            .collect()),
    }
}
