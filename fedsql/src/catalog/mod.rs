// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Metadata catalog interface
//!
//! The catalog is an external collaborator: the planner performs synchronous
//! read-only lookups against it and never mutates it. [`FakeMetadata`] is the
//! in-memory implementation used by unit and integration tests.

use std::collections::HashMap;

use thiserror::Error;

use crate::ast::{Command, DataType, ElementId, GroupId, ModelId};

/// Catalog/capability lookup failures. Always fatal for the compilation that
/// triggered them.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Group not found in catalog: {0}")]
    GroupNotFound(String),

    #[error("Element not found in catalog: {0}")]
    ElementNotFound(String),

    #[error("Model not found in catalog: {0}")]
    ModelNotFound(String),

    #[error("Routing resolution failed for group {0}")]
    RoutingResolution(String),
}

/// Synchronous read-only catalog operations the planner depends on.
pub trait QueryMetadata {
    fn is_virtual_group(&self, group: GroupId) -> Result<bool, MetadataError>;
    fn get_model_id(&self, group: GroupId) -> Result<ModelId, MetadataError>;
    fn get_full_name(&self, group: GroupId) -> Result<String, MetadataError>;
    fn model_name(&self, model: ModelId) -> Result<String, MetadataError>;

    /// Candidate full names whose trailing segments match `name`
    /// case-insensitively. Used as the fallback for dependent-hint matching.
    fn get_groups_for_partial_name(&self, name: &str) -> Result<Vec<String>, MetadataError>;

    fn is_temporary_table(&self, group: GroupId) -> Result<bool, MetadataError>;

    /// Element ids of the group's columns, in declaration order.
    fn get_elements_in_group(&self, group: GroupId) -> Result<Vec<ElementId>, MetadataError>;
    fn element_name(&self, element: ElementId) -> Result<String, MetadataError>;
    fn element_type(&self, element: ElementId) -> Result<DataType, MetadataError>;

    /// Defining command of a virtual group, `None` for physical groups.
    fn virtual_plan(&self, group: GroupId) -> Result<Option<&Command>, MetadataError>;
}

/// Resolve a group's columns to element symbols qualified by the name the
/// query knows the group as, in catalog declaration order.
pub fn group_elements(
    metadata: &dyn QueryMetadata,
    group: &crate::ast::GroupSymbol,
) -> Result<Vec<crate::ast::ElementSymbol>, MetadataError> {
    let mut out = Vec::new();
    for element in metadata.get_elements_in_group(group.metadata_id)? {
        out.push(crate::ast::ElementSymbol::new(
            group.name.clone(),
            metadata.element_name(element)?,
            element,
            metadata.element_type(element)?,
        ));
    }
    Ok(out)
}

#[derive(Debug, Clone)]
struct GroupEntry {
    full_name: String,
    model: ModelId,
    elements: Vec<ElementId>,
    virtual_plan: Option<Command>,
    temporary: bool,
}

#[derive(Debug, Clone)]
struct ElementEntry {
    name: String,
    ty: DataType,
}

/// In-memory catalog for tests.
#[derive(Debug, Default)]
pub struct FakeMetadata {
    models: HashMap<ModelId, String>,
    groups: HashMap<GroupId, GroupEntry>,
    elements: HashMap<ElementId, ElementEntry>,
    next_group: u32,
    next_element: u32,
    next_model: u32,
}

impl FakeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(&mut self, name: impl Into<String>) -> ModelId {
        let id = ModelId(self.next_model);
        self.next_model += 1;
        self.models.insert(id, name.into());
        id
    }

    /// Register a physical table with typed columns; returns the group id and
    /// the column element ids in declaration order.
    pub fn add_table(
        &mut self,
        model: ModelId,
        full_name: impl Into<String>,
        columns: &[(&str, DataType)],
    ) -> (GroupId, Vec<ElementId>) {
        self.add_group(model, full_name, columns, None, false)
    }

    /// Register a virtual group (view) backed by a defining command.
    pub fn add_virtual(
        &mut self,
        model: ModelId,
        full_name: impl Into<String>,
        columns: &[(&str, DataType)],
        plan: Command,
    ) -> (GroupId, Vec<ElementId>) {
        self.add_group(model, full_name, columns, Some(plan), false)
    }

    /// Register a temporary table.
    pub fn add_temp_table(
        &mut self,
        model: ModelId,
        full_name: impl Into<String>,
        columns: &[(&str, DataType)],
    ) -> (GroupId, Vec<ElementId>) {
        self.add_group(model, full_name, columns, None, true)
    }

    fn add_group(
        &mut self,
        model: ModelId,
        full_name: impl Into<String>,
        columns: &[(&str, DataType)],
        virtual_plan: Option<Command>,
        temporary: bool,
    ) -> (GroupId, Vec<ElementId>) {
        let gid = GroupId(self.next_group);
        self.next_group += 1;

        let mut elements = Vec::with_capacity(columns.len());
        for (name, ty) in columns {
            let eid = ElementId(self.next_element);
            self.next_element += 1;
            self.elements.insert(
                eid,
                ElementEntry {
                    name: (*name).to_string(),
                    ty: *ty,
                },
            );
            elements.push(eid);
        }

        self.groups.insert(
            gid,
            GroupEntry {
                full_name: full_name.into(),
                model,
                elements: elements.clone(),
                virtual_plan,
                temporary,
            },
        );
        (gid, elements)
    }

    fn group(&self, id: GroupId) -> Result<&GroupEntry, MetadataError> {
        self.groups
            .get(&id)
            .ok_or_else(|| MetadataError::GroupNotFound(format!("{:?}", id)))
    }
}

impl QueryMetadata for FakeMetadata {
    fn is_virtual_group(&self, group: GroupId) -> Result<bool, MetadataError> {
        Ok(self.group(group)?.virtual_plan.is_some())
    }

    fn get_model_id(&self, group: GroupId) -> Result<ModelId, MetadataError> {
        Ok(self.group(group)?.model)
    }

    fn get_full_name(&self, group: GroupId) -> Result<String, MetadataError> {
        Ok(self.group(group)?.full_name.clone())
    }

    fn model_name(&self, model: ModelId) -> Result<String, MetadataError> {
        self.models
            .get(&model)
            .cloned()
            .ok_or_else(|| MetadataError::ModelNotFound(format!("{:?}", model)))
    }

    fn get_groups_for_partial_name(&self, name: &str) -> Result<Vec<String>, MetadataError> {
        let suffix = name.to_ascii_lowercase();
        let mut out: Vec<String> = self
            .groups
            .values()
            .filter(|g| {
                let full = g.full_name.to_ascii_lowercase();
                full == suffix || full.ends_with(&format!(".{}", suffix))
            })
            .map(|g| g.full_name.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    fn is_temporary_table(&self, group: GroupId) -> Result<bool, MetadataError> {
        Ok(self.group(group)?.temporary)
    }

    fn get_elements_in_group(&self, group: GroupId) -> Result<Vec<ElementId>, MetadataError> {
        Ok(self.group(group)?.elements.clone())
    }

    fn element_name(&self, element: ElementId) -> Result<String, MetadataError> {
        self.elements
            .get(&element)
            .map(|e| e.name.clone())
            .ok_or_else(|| MetadataError::ElementNotFound(format!("{:?}", element)))
    }

    fn element_type(&self, element: ElementId) -> Result<DataType, MetadataError> {
        self.elements
            .get(&element)
            .map(|e| e.ty)
            .ok_or_else(|| MetadataError::ElementNotFound(format!("{:?}", element)))
    }

    fn virtual_plan(&self, group: GroupId) -> Result<Option<&Command>, MetadataError> {
        Ok(self.group(group)?.virtual_plan.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ElementSymbol, Expression, GroupSymbol, Query};

    #[test]
    fn fake_metadata_registers_tables_and_columns() {
        let mut md = FakeMetadata::new();
        let pm1 = md.add_model("pm1");
        let (a, cols) = md.add_table(
            pm1,
            "pm1.A",
            &[("a1", DataType::Integer), ("a2", DataType::String)],
        );

        assert!(!md.is_virtual_group(a).unwrap());
        assert_eq!(md.get_full_name(a).unwrap(), "pm1.A");
        assert_eq!(md.model_name(md.get_model_id(a).unwrap()).unwrap(), "pm1");
        assert_eq!(md.get_elements_in_group(a).unwrap(), cols);
        assert_eq!(md.element_name(cols[0]).unwrap(), "a1");
        assert_eq!(md.element_type(cols[1]).unwrap(), DataType::String);
    }

    #[test]
    fn partial_name_lookup_matches_trailing_segment() {
        let mut md = FakeMetadata::new();
        let pm1 = md.add_model("pm1");
        md.add_table(pm1, "pm1.Orders", &[("id", DataType::Integer)]);
        md.add_table(pm1, "pm2.Orders", &[("id", DataType::Integer)]);
        md.add_table(pm1, "pm1.Items", &[("id", DataType::Integer)]);

        let hits = md.get_groups_for_partial_name("orders").unwrap();
        assert_eq!(hits, vec!["pm1.Orders".to_string(), "pm2.Orders".to_string()]);
        let hits = md.get_groups_for_partial_name("pm1.items").unwrap();
        assert_eq!(hits, vec!["pm1.Items".to_string()]);
    }

    #[test]
    fn virtual_groups_carry_their_defining_command() {
        let mut md = FakeMetadata::new();
        let pm1 = md.add_model("pm1");
        let (a, a_cols) = md.add_table(pm1, "pm1.A", &[("a1", DataType::Integer)]);
        let vm = md.add_model("vm1");
        let defining = Command::Query(Query::simple(
            GroupSymbol::new("pm1.A", a),
            vec![Expression::Element(ElementSymbol::new(
                "pm1.A",
                "a1",
                a_cols[0],
                DataType::Integer,
            ))],
        ));
        let (v, _) = md.add_virtual(vm, "vm1.V", &[("c1", DataType::Integer)], defining.clone());

        assert!(md.is_virtual_group(v).unwrap());
        assert_eq!(md.virtual_plan(v).unwrap(), Some(&defining));
        assert_eq!(md.virtual_plan(a).unwrap(), None);
    }

    #[test]
    fn missing_group_is_a_metadata_error() {
        let md = FakeMetadata::new();
        assert!(matches!(
            md.get_full_name(GroupId(99)),
            Err(MetadataError::GroupNotFound(_))
        ));
    }
}
