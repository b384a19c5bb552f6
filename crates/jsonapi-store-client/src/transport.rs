//! Transport trait definitions

use crate::error::TransportResult;
use async_trait::async_trait;
use jsonapi_store_core::{Document, Query, Resource, ResourceIdentifier};

/// Trait for JSON:API transport implementations
///
/// Implementations turn each call into one request against the API and hand
/// back the response document, or the error document of a failed request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read one resource (`type` + `id`) or a collection (`type` only)
    async fn find(&self, query: &Query) -> TransportResult<Document>;

    /// Create a resource
    async fn create(&self, resource: &Resource) -> TransportResult<Document>;

    /// Update a resource with the given fields
    async fn update(&self, resource: &Resource) -> TransportResult<Document>;

    /// Delete a resource; an empty document means no content
    async fn delete(&self, id: &ResourceIdentifier) -> TransportResult<Document>;
}
