//! Resource type schema definitions

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cardinality of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationType {
    #[serde(rename = "hasOne")]
    HasOne,
    #[serde(rename = "hasMany")]
    HasMany,
}

/// Attribute definition (currently only marks the field as an attribute)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {}

/// Relationship definition: target type and cardinality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDefinition {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub relation_type: RelationType,
}

impl RelationDefinition {
    pub fn has_one(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            relation_type: RelationType::HasOne,
        }
    }

    pub fn has_many(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            relation_type: RelationType::HasMany,
        }
    }
}

/// Schema of one resource type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    #[serde(rename = "type")]
    pub resource_type: String,

    pub collection_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, AttributeDefinition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<BTreeMap<String, RelationDefinition>>,
}

impl ResourceDefinition {
    pub fn new(resource_type: impl Into<String>, collection_path: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            collection_path: collection_path.into(),
            attributes: None,
            relationships: None,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), AttributeDefinition::default());
        self
    }

    pub fn with_relationship(mut self, name: impl Into<String>, relation: RelationDefinition) -> Self {
        self.relationships
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), relation);
        self
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes
            .as_ref()
            .map(|a| a.contains_key(name))
            .unwrap_or(false)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationDefinition> {
        self.relationships.as_ref().and_then(|r| r.get(name))
    }
}

/// Classification of one path segment against a definition
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FieldKind<'a> {
    Id,
    Type,
    Attribute,
    Relationship(&'a RelationDefinition),
}

/// Look up the definition of a type
pub fn find_definition<'a>(
    definitions: &'a [ResourceDefinition],
    resource_type: &str,
) -> Result<&'a ResourceDefinition> {
    definitions
        .iter()
        .find(|d| d.resource_type == resource_type)
        .ok_or_else(|| Error::DefinitionNotFound(resource_type.to_string()))
}

/// Resolve what `field` is on `resource_type`
pub(crate) fn classify_field<'a>(
    definitions: &'a [ResourceDefinition],
    resource_type: &str,
    field: &str,
) -> Result<FieldKind<'a>> {
    let definition = find_definition(definitions, resource_type)?;
    if definition.attributes.is_none() && definition.relationships.is_none() {
        return Err(Error::EmptyDefinition(resource_type.to_string()));
    }

    if definition.has_attribute(field) {
        return Ok(FieldKind::Attribute);
    }
    if let Some(relation) = definition.relationship(field) {
        return Ok(FieldKind::Relationship(relation));
    }
    match field {
        "id" => Ok(FieldKind::Id),
        "type" => Ok(FieldKind::Type),
        _ => Err(Error::UnknownField {
            resource_type: resource_type.to_string(),
            field: field.to_string(),
        }),
    }
}
