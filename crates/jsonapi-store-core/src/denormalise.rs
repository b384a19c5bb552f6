//! Denormalised read projections over the normalized store
//!
//! Resources are materialized into an arena indexed by [`NodeId`]. Every
//! `(type, id)` gets exactly one node, so cycles terminate and every path to a
//! resource lands on the identical node.

use crate::definition::{classify_field, FieldKind, RelationType, ResourceDefinition};
use crate::error::{Error, Result};
use crate::resource::{Relationship, RelationshipData, ResourceIdentifier, StoreResource};
use crate::store::StoreData;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Index of a node in a [`DenormalisedGraph`]
pub type NodeId = usize;

/// Resolved target(s) of a relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `None` when the linkage is empty or the target is not in the store
    One(Option<NodeId>),
    /// Targets missing from the store are skipped
    Many(Vec<NodeId>),
}

impl Reference {
    pub fn nodes(&self) -> &[NodeId] {
        match self {
            Reference::One(Some(node)) => std::slice::from_ref(node),
            Reference::One(None) => &[],
            Reference::Many(nodes) => nodes.as_slice(),
        }
    }
}

/// A relationship with its linkage resolved
#[derive(Debug, Clone, PartialEq)]
pub struct DenormalisedRelationship {
    pub relationship: Relationship,
    /// `None` when the linkage itself is unknown
    pub reference: Option<Reference>,
}

/// A store resource with relationships resolved into graph nodes
#[derive(Debug, Clone, PartialEq)]
pub struct DenormalisedResource {
    pub store_resource: Arc<StoreResource>,
    pub relationships: BTreeMap<String, DenormalisedRelationship>,
    /// Relationships of the persisted snapshot, resolved against the same graph
    pub persisted_relationships: Option<BTreeMap<String, DenormalisedRelationship>>,
}

impl DenormalisedResource {
    pub fn identifier(&self) -> ResourceIdentifier {
        self.store_resource.identifier()
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.store_resource.resource.attribute(name)
    }

    pub fn reference(&self, relationship: &str) -> Option<&Reference> {
        self.relationships.get(relationship).and_then(|r| r.reference.as_ref())
    }
}

/// Arena of denormalised resources
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DenormalisedGraph {
    nodes: Vec<DenormalisedResource>,
    index: HashMap<ResourceIdentifier, NodeId>,
    roots: Vec<NodeId>,
}

impl DenormalisedGraph {
    /// Denormalise `roots` and everything reachable from them
    ///
    /// Roots missing from the store are skipped.
    pub fn build<'a, I>(roots: I, data: &StoreData) -> Self
    where
        I: IntoIterator<Item = &'a ResourceIdentifier>,
    {
        let mut graph = Self::default();
        let mut queue = VecDeque::new();

        for root in roots {
            if let Some(node) = graph.intern(root, data, &mut queue) {
                graph.roots.push(node);
            }
        }

        while let Some(node) = queue.pop_front() {
            let store_resource = Arc::clone(&graph.nodes[node].store_resource);
            let relationships = graph.resolve_all(store_resource.resource.relationships.as_ref(), data, &mut queue);
            let persisted_relationships = store_resource.persisted_resource.as_ref().map(|persisted| {
                graph.resolve_all(persisted.relationships.as_ref(), data, &mut queue)
            });
            let entry = &mut graph.nodes[node];
            entry.relationships = relationships;
            entry.persisted_relationships = persisted_relationships;
        }

        tracing::debug!(
            "Denormalised {} roots into {} nodes",
            graph.roots.len(),
            graph.nodes.len()
        );
        graph
    }

    /// Node for `id`, allocating and queueing it on first sight
    fn intern(
        &mut self,
        id: &ResourceIdentifier,
        data: &StoreData,
        queue: &mut VecDeque<NodeId>,
    ) -> Option<NodeId> {
        if let Some(&node) = self.index.get(id) {
            return Some(node);
        }
        let store_resource = data.get(id)?;
        let node = self.nodes.len();
        self.nodes.push(DenormalisedResource {
            store_resource: Arc::clone(store_resource),
            relationships: BTreeMap::new(),
            persisted_relationships: None,
        });
        self.index.insert(id.clone(), node);
        queue.push_back(node);
        Some(node)
    }

    fn resolve_all(
        &mut self,
        relationships: Option<&BTreeMap<String, Relationship>>,
        data: &StoreData,
        queue: &mut VecDeque<NodeId>,
    ) -> BTreeMap<String, DenormalisedRelationship> {
        let Some(relationships) = relationships else {
            return BTreeMap::new();
        };
        relationships
            .iter()
            .map(|(name, relationship)| {
                let reference = relationship.data.as_ref().map(|linkage| match linkage {
                    RelationshipData::ToOne(id) => {
                        Reference::One(id.as_ref().and_then(|id| self.intern(id, data, queue)))
                    }
                    RelationshipData::ToMany(ids) => Reference::Many(
                        ids.iter().filter_map(|id| self.intern(id, data, queue)).collect(),
                    ),
                });
                let resolved = DenormalisedRelationship {
                    relationship: relationship.clone(),
                    reference,
                };
                (name.clone(), resolved)
            })
            .collect()
    }

    pub fn node(&self, node: NodeId) -> &DenormalisedResource {
        &self.nodes[node]
    }

    /// Node holding `id`, if it was reached
    pub fn find(&self, id: &ResourceIdentifier) -> Option<NodeId> {
        self.index.get(id).copied()
    }

    /// Root nodes in request order
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn root_resources(&self) -> impl Iterator<Item = &DenormalisedResource> {
        self.roots.iter().map(|&node| &self.nodes[node])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Target of a to-one relationship
    pub fn related_one(&self, node: NodeId, relationship: &str) -> Option<NodeId> {
        match self.nodes[node].reference(relationship)? {
            Reference::One(target) => *target,
            Reference::Many(_) => None,
        }
    }

    /// Targets of a relationship, empty when unknown
    pub fn related(&self, node: NodeId, relationship: &str) -> &[NodeId] {
        self.nodes[node]
            .reference(relationship)
            .map(Reference::nodes)
            .unwrap_or(&[])
    }
}

/// Denormalise a single resource
pub fn denormalise_store_resource(resource: &StoreResource, data: &StoreData) -> DenormalisedGraph {
    DenormalisedGraph::build(std::iter::once(&resource.identifier()), data)
}

/// Denormalise a list of resources into one shared graph
pub fn denormalise_store_resources<'a, I>(resources: I, data: &StoreData) -> DenormalisedGraph
where
    I: IntoIterator<Item = &'a Arc<StoreResource>>,
{
    let ids: Vec<ResourceIdentifier> = resources.into_iter().map(|r| r.identifier()).collect();
    DenormalisedGraph::build(&ids, data)
}

/// One step of a resolved path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Id,
    Type,
    Attribute(String),
    /// Key inside the JSON value of the preceding attribute
    Key(String),
    /// Step through a to-one relationship
    Relationship(String),
    /// Terminal to-many relationship, yielding its references
    References(String),
}

/// A field path resolved against the schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenormalisedPath {
    pub segments: Vec<PathSegment>,
}

impl fmt::Display for DenormalisedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|segment| match segment {
                PathSegment::Id => "id".to_string(),
                PathSegment::Type => "type".to_string(),
                PathSegment::Attribute(name) => format!("attributes.{}", name),
                PathSegment::Key(key) => key.clone(),
                PathSegment::Relationship(name) | PathSegment::References(name) => {
                    format!("relationships.{}.reference", name)
                }
            })
            .collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Resolve a field path such as `author.name` against the schema
///
/// The path may end on an attribute, `id`, `type` or a hasMany relationship.
/// Segments after an attribute are keys into its JSON value, the same rule
/// [`get_resource_field_value`](crate::filter::get_resource_field_value)
/// applies. Ending on a hasOne relationship, crossing a hasMany relationship,
/// or naming an unknown type or field is an error.
pub fn get_denormalised_path(
    path: &str,
    base_type: &str,
    definitions: &[ResourceDefinition],
    separator: &str,
) -> Result<DenormalisedPath> {
    let fields: Vec<&str> = path.split(separator).collect();
    let mut segments = Vec::with_capacity(fields.len());
    let mut current_type = base_type.to_string();

    for (i, field) in fields.iter().enumerate() {
        let is_last = i == fields.len() - 1;
        let segment = match classify_field(definitions, &current_type, field)? {
            FieldKind::Id => PathSegment::Id,
            FieldKind::Type => PathSegment::Type,
            FieldKind::Attribute => {
                segments.push(PathSegment::Attribute(field.to_string()));
                segments.extend(fields[i + 1..].iter().map(|key| PathSegment::Key(key.to_string())));
                break;
            }
            FieldKind::Relationship(relation) => match (relation.relation_type, is_last) {
                (RelationType::HasMany, true) => PathSegment::References(field.to_string()),
                (RelationType::HasMany, false) => return Err(Error::FilterPastHasMany(path.to_string())),
                (RelationType::HasOne, true) => return Err(Error::PathEndsOnRelationship(path.to_string())),
                (RelationType::HasOne, false) => {
                    current_type = relation.resource_type.clone();
                    PathSegment::Relationship(field.to_string())
                }
            },
        };
        let terminal = !matches!(segment, PathSegment::Relationship(_));
        segments.push(segment);
        if terminal && !is_last {
            return Err(Error::UnknownField {
                resource_type: current_type,
                field: fields[i + 1].to_string(),
            });
        }
    }

    Ok(DenormalisedPath { segments })
}

/// Value found at the end of a denormalised path
#[derive(Debug, Clone, PartialEq)]
pub enum DenormalisedValue<'g> {
    Value(Value),
    Resources(Vec<&'g DenormalisedResource>),
}

/// Read the value at `path` from a node of the graph
///
/// Missing data along the path yields `Ok(None)`.
pub fn get_denormalised_value<'g>(
    path: &str,
    graph: &'g DenormalisedGraph,
    node: NodeId,
    definitions: &[ResourceDefinition],
    separator: &str,
) -> Result<Option<DenormalisedValue<'g>>> {
    let resolved = get_denormalised_path(path, graph.node(node).store_resource.resource_type(), definitions, separator)?;
    let mut current = node;

    for (i, segment) in resolved.segments.iter().enumerate() {
        let resource = graph.node(current);
        let value = match segment {
            PathSegment::Relationship(name) => match graph.related_one(current, name) {
                Some(next) => {
                    current = next;
                    continue;
                }
                None => return Ok(None),
            },
            PathSegment::Id => DenormalisedValue::Value(Value::String(resource.store_resource.id().to_string())),
            PathSegment::Type => {
                DenormalisedValue::Value(Value::String(resource.store_resource.resource_type().to_string()))
            }
            PathSegment::Attribute(name) => {
                let keys = resolved.segments[i + 1..].iter().filter_map(|s| match s {
                    PathSegment::Key(key) => Some(key.as_str()),
                    _ => None,
                });
                match keys.fold(resource.attribute(name), |value, key| value.and_then(|v| v.get(key))) {
                    Some(value) if !value.is_null() => DenormalisedValue::Value(value.clone()),
                    _ => return Ok(None),
                }
            }
            PathSegment::Key(_) => return Ok(None),
            PathSegment::References(name) => match resource.reference(name) {
                Some(reference) => {
                    DenormalisedValue::Resources(reference.nodes().iter().map(|&n| graph.node(n)).collect())
                }
                None => return Ok(None),
            },
        };
        return Ok(Some(value));
    }

    Ok(None)
}
