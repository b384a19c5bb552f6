//! In-memory transport for testing
//!
//! Emulates a JSON:API server over a map of resources: resolves `include`
//! paths, applies `offset`/`limit`, answers missing resources with 404 error
//! documents and assigns ids to created resources that lack one. Filtering and
//! sorting are not emulated.

use crate::error::{TransportError, TransportResult};
use crate::transport::Transport;
use async_trait::async_trait;
use jsonapi_store_core::merge::merge_resource;
use jsonapi_store_core::{Document, OperationType, Query, Resource, ResourceError, ResourceIdentifier};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;
use ulid::Ulid;

fn lock_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::new(
        500,
        vec![ResourceError::new("Internal Server Error")
            .with_status("500")
            .with_detail(format!("Lock error: {}", e))],
    )
}

fn not_found(id: &ResourceIdentifier) -> TransportError {
    TransportError::new(
        404,
        vec![ResourceError::new("Not Found")
            .with_status("404")
            .with_detail(format!("Resource {} does not exist", id))],
    )
}

/// Resources reachable from `primary` through the `include` paths
fn resolve_included(
    resources: &BTreeMap<ResourceIdentifier, Resource>,
    primary: &[Resource],
    include: &[String],
) -> Vec<Resource> {
    let mut seen: HashSet<ResourceIdentifier> = primary.iter().map(Resource::identifier).collect();
    let mut included = Vec::new();

    for path in include {
        let mut frontier: Vec<&Resource> = primary.iter().collect();
        for name in path.split('.') {
            let mut next = Vec::new();
            for resource in &frontier {
                let Some(relationship) = resource.relationship(name) else {
                    continue;
                };
                for id in relationship.identifiers() {
                    let Some(target) = resources.get(id) else {
                        continue;
                    };
                    if seen.insert(id.clone()) {
                        included.push(target.clone());
                    }
                    next.push(target);
                }
            }
            frontier = next;
        }
    }

    included
}

/// In-memory transport
pub struct MemoryTransport {
    resources: RwLock<BTreeMap<ResourceIdentifier, Resource>>,
    operations: RwLock<Vec<(OperationType, ResourceIdentifier)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            resources: RwLock::new(BTreeMap::new()),
            operations: RwLock::new(Vec::new()),
        }
    }

    /// Seed the server with resources
    pub fn with_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        let transport = Self::new();
        if let Ok(mut map) = transport.resources.write() {
            map.extend(resources.into_iter().map(|r| (r.identifier(), r)));
        }
        transport
    }

    /// Current server-side copy of a resource
    pub fn resource(&self, id: &ResourceIdentifier) -> Option<Resource> {
        self.resources.read().ok()?.get(id).cloned()
    }

    /// Requests served so far, in order
    pub fn operations(&self) -> Vec<(OperationType, ResourceIdentifier)> {
        self.operations.read().map(|ops| ops.clone()).unwrap_or_default()
    }

    fn record(&self, operation: OperationType, id: ResourceIdentifier) -> TransportResult<()> {
        tracing::debug!("MemoryTransport {:?} {}", operation, id);
        self.operations.write().map_err(lock_error)?.push((operation, id));
        Ok(())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn find(&self, query: &Query) -> TransportResult<Document> {
        query.validate().map_err(|e| {
            TransportError::new(400, vec![ResourceError::new("Bad Request").with_status("400").with_detail(e.to_string())])
        })?;
        let resource_type = query.resource_type.clone().unwrap_or_default();
        self.record(
            OperationType::Get,
            ResourceIdentifier::new(resource_type.clone(), query.id.clone().unwrap_or_default()),
        )?;

        let resources = self.resources.read().map_err(lock_error)?;
        let mut document = match query.identifier() {
            Some(id) => {
                let resource = resources.get(&id).cloned().ok_or_else(|| not_found(&id))?;
                Document::one(resource)
            }
            None => {
                let all: Vec<Resource> = resources
                    .values()
                    .filter(|r| r.resource_type == resource_type)
                    .cloned()
                    .collect();
                let total = all.len();
                let page = all
                    .into_iter()
                    .skip(query.params.offset.unwrap_or(0))
                    .take(query.params.limit.unwrap_or(usize::MAX))
                    .collect();
                let mut document = Document::many(page);
                document.meta = Some(json!({ "total": total }));
                document
            }
        };

        let included = resolve_included(&resources, document.primary(), &query.params.include);
        if !included.is_empty() {
            document = document.with_included(included);
        }
        Ok(document)
    }

    async fn create(&self, resource: &Resource) -> TransportResult<Document> {
        let mut created = resource.clone();
        if created.id.is_empty() {
            created.id = Ulid::new().to_string();
        }
        let id = created.identifier();
        self.record(OperationType::Post, id.clone())?;

        let mut resources = self.resources.write().map_err(lock_error)?;
        if resources.contains_key(&id) {
            return Err(TransportError::new(
                409,
                vec![ResourceError::new("Conflict")
                    .with_status("409")
                    .with_detail(format!("Resource {} already exists", id))],
            ));
        }
        resources.insert(id, created.clone());
        Ok(Document::one(created))
    }

    async fn update(&self, resource: &Resource) -> TransportResult<Document> {
        let id = resource.identifier();
        self.record(OperationType::Patch, id.clone())?;

        let mut resources = self.resources.write().map_err(lock_error)?;
        let existing = resources.get(&id).ok_or_else(|| not_found(&id))?;
        let merged = merge_resource(existing, resource);
        resources.insert(id, merged.clone());
        Ok(Document::one(merged))
    }

    async fn delete(&self, id: &ResourceIdentifier) -> TransportResult<Document> {
        self.record(OperationType::Delete, id.clone())?;

        let mut resources = self.resources.write().map_err(lock_error)?;
        resources.remove(id).ok_or_else(|| not_found(id))?;
        Ok(Document::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonapi_store_core::Relationship;

    fn transport() -> MemoryTransport {
        MemoryTransport::with_resources(vec![
            Resource::new("Article", "1")
                .with_attribute("title", "Article 1")
                .with_relationship("author", Relationship::to_one(ResourceIdentifier::new("Person", "1"))),
            Resource::new("Article", "2").with_attribute("title", "Article 2"),
            Resource::new("Person", "1")
                .with_attribute("name", "Ada")
                .with_relationship("country", Relationship::to_one(ResourceIdentifier::new("Country", "ch"))),
            Resource::new("Country", "ch"),
        ])
    }

    #[tokio::test]
    async fn test_find_with_include_and_paging() {
        let transport = transport();
        let query = Query::collection("Article").with_include("author.country");
        let document = transport.find(&query).await.unwrap();
        assert_eq!(document.primary().len(), 2);
        assert_eq!(document.included.as_ref().unwrap().len(), 2);
        assert_eq!(document.meta.as_ref().unwrap()["total"], 2);

        let page = transport.find(&Query::collection("Article").with_offset(1).with_limit(5)).await.unwrap();
        assert_eq!(page.primary_identifiers(), vec![ResourceIdentifier::new("Article", "2")]);
    }

    #[tokio::test]
    async fn test_missing_resource_is_404() {
        let transport = transport();
        let error = transport.find(&Query::single("Article", "9")).await.unwrap_err();
        assert_eq!(error.status, 404);
        assert_eq!(error.errors[0].status.as_deref(), Some("404"));

        let error = transport.delete(&ResourceIdentifier::new("Article", "9")).await.unwrap_err();
        assert_eq!(error.status, 404);
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let transport = transport();
        let created = transport.create(&Resource::new("Article", "").with_attribute("title", "New")).await.unwrap();
        let id = created.primary_identifiers().remove(0);
        assert!(!id.id.is_empty());
        assert!(transport.create(&Resource::new("Article", "1")).await.is_err());

        let patch = Resource::new("Article", "1").with_attribute("title", "Renamed");
        let updated = transport.update(&patch).await.unwrap();
        assert_eq!(updated.primary()[0].attribute("title").unwrap(), "Renamed");
        assert!(updated.primary()[0].relationship("author").is_some());

        let deleted = transport.delete(&id).await.unwrap();
        assert!(deleted.data.is_none());
        assert!(transport.resource(&id).is_none());
        assert_eq!(transport.operations().len(), 4);
    }
}
