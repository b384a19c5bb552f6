//! Resource graph model: identifiers, resources, relationships and store bookkeeping

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use ulid::Ulid;

/// Attribute map of a resource
pub type Attributes = Map<String, Value>;

/// Uniquely addresses a resource by `(type, id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
}

impl ResourceIdentifier {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Create an identifier with a fresh client-side id
    pub fn generate(resource_type: impl Into<String>) -> Self {
        Self::new(resource_type, Ulid::new().to_string())
    }
}

impl std::fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.id)
    }
}

/// Linkage of a relationship
///
/// `ToOne(None)` and `ToMany(vec![])` both mean "known to be empty".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    ToMany(Vec<ResourceIdentifier>),
    ToOne(Option<ResourceIdentifier>),
}

impl RelationshipData {
    /// All identifiers referenced by this linkage
    pub fn identifiers(&self) -> &[ResourceIdentifier] {
        match self {
            RelationshipData::ToMany(ids) => ids.as_slice(),
            RelationshipData::ToOne(Some(id)) => std::slice::from_ref(id),
            RelationshipData::ToOne(None) => &[],
        }
    }

    pub fn is_to_many(&self) -> bool {
        matches!(self, RelationshipData::ToMany(_))
    }
}

/// A relationship object
///
/// An absent `data` means the linkage is unknown (not fetched).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub data: Option<RelationshipData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Relationship {
    pub fn to_one(id: ResourceIdentifier) -> Self {
        Self {
            data: Some(RelationshipData::ToOne(Some(id))),
            ..Default::default()
        }
    }

    pub fn to_many(ids: Vec<ResourceIdentifier>) -> Self {
        Self {
            data: Some(RelationshipData::ToMany(ids)),
            ..Default::default()
        }
    }

    /// A to-one relationship known to be empty
    pub fn empty_to_one() -> Self {
        Self {
            data: Some(RelationshipData::ToOne(None)),
            ..Default::default()
        }
    }

    /// Identifiers referenced by this relationship (empty when unknown)
    pub fn identifiers(&self) -> &[ResourceIdentifier] {
        self.data.as_ref().map(|d| d.identifiers()).unwrap_or(&[])
    }
}

/// Keeps an explicit `null` distinct from an absent field
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// A content-only resource snapshot, as exchanged on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: String,

    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<BTreeMap<String, Relationship>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            attributes: None,
            relationships: None,
            meta: None,
            links: None,
        }
    }

    /// A resource carrying nothing but its identifier
    pub fn from_identifier(id: &ResourceIdentifier) -> Self {
        Self::new(id.resource_type.clone(), id.id.clone())
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_relationship(mut self, name: impl Into<String>, relationship: Relationship) -> Self {
        self.relationships
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), relationship);
        self
    }

    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(self.resource_type.clone(), self.id.clone())
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.as_ref().and_then(|a| a.get(name))
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.as_ref().and_then(|r| r.get(name))
    }

    /// Iterate over `(name, relationship)` pairs
    pub fn relationships_iter(&self) -> impl Iterator<Item = (&String, &Relationship)> {
        self.relationships.iter().flat_map(|r| r.iter())
    }

    /// True when nothing but `type` and `id` is known
    pub fn is_identifier_only(&self) -> bool {
        self.attributes.is_none()
            && self.relationships.is_none()
            && self.meta.is_none()
            && self.links.is_none()
    }

    /// Content equality: identity plus attributes and relationships
    ///
    /// `meta` and `links` are server annotations and do not count as content.
    pub fn same_content(&self, other: &Resource) -> bool {
        self.id == other.id
            && self.resource_type == other.resource_type
            && self.attributes == other.attributes
            && self.relationships == other.relationships
    }
}

/// Lifecycle tag of a resource held in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    InSync,
    Created,
    Updated,
    Deleted,
    NotLoaded,
}

impl ResourceState {
    /// Whether the state represents an uncommitted local mutation
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ResourceState::Created | ResourceState::Updated | ResourceState::Deleted
        )
    }
}

/// Kind of remote operation in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Get,
    Post,
    Patch,
    Delete,
}

/// Source of a JSON:API error
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

/// A JSON:API error object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
}

impl ResourceError {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.source = Some(ErrorSource {
            pointer: Some(pointer.into()),
            parameter: None,
        });
        self
    }
}

/// A resource plus store-local bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResource {
    #[serde(flatten)]
    pub resource: Resource,

    pub state: ResourceState,

    /// Last server-confirmed snapshot, `None` if never persisted
    pub persisted_resource: Option<Resource>,

    /// In-flight operation, `None` when idle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading: Option<OperationType>,

    #[serde(default)]
    pub errors: Vec<ResourceError>,
}

impl StoreResource {
    /// Wrap a server-confirmed resource
    pub fn from_server(resource: Resource) -> Self {
        Self {
            persisted_resource: Some(resource.clone()),
            resource,
            state: ResourceState::InSync,
            loading: None,
            errors: Vec::new(),
        }
    }

    /// Wrap a resource that only exists locally
    pub fn local(resource: Resource) -> Self {
        Self {
            resource,
            state: ResourceState::Created,
            persisted_resource: None,
            loading: None,
            errors: Vec::new(),
        }
    }

    pub fn identifier(&self) -> ResourceIdentifier {
        self.resource.identifier()
    }

    pub fn resource_type(&self) -> &str {
        &self.resource.resource_type
    }

    pub fn id(&self) -> &str {
        &self.resource.id
    }

    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }
}

/// Primary data of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Many(Vec<Resource>),
    One(Option<Resource>),
}

impl PrimaryData {
    pub fn resources(&self) -> &[Resource] {
        match self {
            PrimaryData::Many(resources) => resources.as_slice(),
            PrimaryData::One(Some(resource)) => std::slice::from_ref(resource),
            PrimaryData::One(None) => &[],
        }
    }
}

/// A JSON:API top-level document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub data: Option<PrimaryData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included: Option<Vec<Resource>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ResourceError>>,
}

impl Document {
    pub fn one(resource: Resource) -> Self {
        Self {
            data: Some(PrimaryData::One(Some(resource))),
            ..Default::default()
        }
    }

    pub fn many(resources: Vec<Resource>) -> Self {
        Self {
            data: Some(PrimaryData::Many(resources)),
            ..Default::default()
        }
    }

    pub fn from_errors(errors: Vec<ResourceError>) -> Self {
        Self {
            errors: Some(errors),
            ..Default::default()
        }
    }

    pub fn with_included(mut self, included: Vec<Resource>) -> Self {
        self.included = Some(included);
        self
    }

    /// Primary resources in document order
    pub fn primary(&self) -> &[Resource] {
        self.data.as_ref().map(|d| d.resources()).unwrap_or(&[])
    }

    /// Identifiers of the primary resources
    pub fn primary_identifiers(&self) -> Vec<ResourceIdentifier> {
        self.primary().iter().map(Resource::identifier).collect()
    }

    pub fn errors(&self) -> &[ResourceError] {
        self.errors.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_relationship_null_vs_absent() {
        let rel: Relationship = serde_json::from_value(json!({ "data": null })).unwrap();
        assert_eq!(rel.data, Some(RelationshipData::ToOne(None)));

        let rel: Relationship = serde_json::from_value(json!({ "links": {} })).unwrap();
        assert!(rel.data.is_none());

        let rel: Relationship =
            serde_json::from_value(json!({ "data": [{ "type": "Tag", "id": "1" }] })).unwrap();
        assert!(rel.data.as_ref().unwrap().is_to_many());
        assert_eq!(rel.identifiers(), &[ResourceIdentifier::new("Tag", "1")]);
    }

    #[test]
    fn test_store_resource_wire_shape() {
        let resource = Resource::new("Article", "1").with_attribute("title", "Article 1");
        let stored = StoreResource::from_server(resource);
        let value = serde_json::to_value(&stored).unwrap();

        assert_eq!(value["type"], "Article");
        assert_eq!(value["state"], "IN_SYNC");
        assert_eq!(value["persistedResource"]["attributes"]["title"], "Article 1");
    }

    #[test]
    fn test_document_single_and_many() {
        let doc: Document = serde_json::from_value(json!({
            "data": { "type": "Article", "id": "1" },
            "included": [{ "type": "Person", "id": "2" }]
        }))
        .unwrap();
        assert_eq!(doc.primary_identifiers(), vec![ResourceIdentifier::new("Article", "1")]);
        assert_eq!(doc.included.as_ref().unwrap().len(), 1);

        let doc: Document = serde_json::from_value(json!({ "data": null })).unwrap();
        assert_eq!(doc.data, Some(PrimaryData::One(None)));
        assert!(doc.primary().is_empty());
    }

    #[test]
    fn test_pending_states() {
        assert!(!ResourceState::InSync.is_pending());
        assert!(!ResourceState::NotLoaded.is_pending());
        assert!(ResourceState::Created.is_pending());
        assert!(ResourceState::Deleted.is_pending());
    }

    #[test]
    fn test_generated_identifiers_differ() {
        let a = ResourceIdentifier::generate("Article");
        let b = ResourceIdentifier::generate("Article");
        assert_ne!(a.id, b.id);
        assert_eq!(a.resource_type, "Article");
    }
}
