//! Error types for the store core

use thiserror::Error;

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
///
/// Store mutations never produce these. They come from read-path helpers that
/// resolve schema-dependent paths, from query validation, and from config loading.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Definition not found for resource type: {0}")]
    DefinitionNotFound(String),

    #[error("Attributes or relationships must be provided for resource type: {0}")]
    EmptyDefinition(String),

    #[error("Cannot find field '{field}' in attributes or relationships of {resource_type}")]
    UnknownField { resource_type: String, field: String },

    #[error("Cannot filter past a hasMany relation: {0}")]
    FilterPastHasMany(String),

    #[error("The last field in path '{0}' cannot be a relation")]
    PathEndsOnRelationship(String),

    #[error("Unknown filtering operator: {0}")]
    UnknownOperator(String),

    #[error("Invalid value for operator '{operator}': {reason}")]
    InvalidFilterValue { operator: String, reason: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("expected single result for query {0}")]
    SingleResultExpected(String),

    #[error("Query not found: {0}")]
    QueryNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
