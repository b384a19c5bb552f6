//! Error types for the client layer

use jsonapi_store_core::{Document, ResourceError};
use thiserror::Error;

/// Result type alias for client operations
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Result type alias for transport calls
pub type TransportResult<T> = std::result::Result<T, TransportError>;

const JSONAPI_MEDIA_TYPE: &str = "application/vnd.api+json";

/// A failed request, carried as JSON:API error objects
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Request failed with status {status} ({count} errors)", count = .errors.len())]
pub struct TransportError {
    pub status: u16,
    pub errors: Vec<ResourceError>,
}

impl TransportError {
    pub fn new(status: u16, errors: Vec<ResourceError>) -> Self {
        Self { status, errors }
    }

    /// A single error built from the HTTP status line
    pub fn from_status(status: u16, status_text: &str) -> Self {
        Self::new(
            status,
            vec![ResourceError::new(status_text).with_status(status.to_string())],
        )
    }

    /// Build from an HTTP error response
    ///
    /// A JSON:API body (media type parameters such as `charset` are ignored)
    /// supplies the errors; anything else collapses to the status line.
    pub fn from_response(status: u16, status_text: &str, content_type: Option<&str>, body: &str) -> Self {
        let is_jsonapi = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|media| media.trim().eq_ignore_ascii_case(JSONAPI_MEDIA_TYPE))
            .unwrap_or(false);

        if is_jsonapi {
            match serde_json::from_str::<Document>(body) {
                Ok(document) if !document.errors().is_empty() => {
                    return Self::new(status, document.errors().to_vec());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Unreadable JSON:API error body: {}", e),
            }
        }
        Self::from_status(status, status_text)
    }

    /// The errors as a document, as consumed by the store
    pub fn to_document(&self) -> Document {
        Document::from_errors(self.errors.clone())
    }
}

/// Client-level error types
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] jsonapi_store_core::Error),

    #[error("Applying pending changes is disabled")]
    ApplyDisabled,

    #[error("Store service is closed")]
    Closed,
}
