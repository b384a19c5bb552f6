//! JSON:API Store Core - normalized resource graph engine
//!
//! This crate provides the data model, merge engine, query evaluation,
//! denormalisation, pending-change ordering and compaction of a client-side
//! JSON:API store. Every mutation is a pure function over `Arc`-shared
//! snapshots; see [`Reducer`] for the event-driven entry point.

pub mod action;
pub mod compact;
pub mod config;
pub mod definition;
pub mod denormalise;
pub mod error;
pub mod filter;
pub mod merge;
pub mod pending;
pub mod query;
pub mod reducer;
pub mod resource;
pub mod selectors;
pub mod store;

pub use action::StoreAction;
pub use compact::compact_store;
pub use config::{FilteringConfig, StoreConfig};
pub use definition::{RelationDefinition, RelationType, ResourceDefinition};
pub use denormalise::{
    denormalise_store_resource, denormalise_store_resources, get_denormalised_path,
    get_denormalised_value, DenormalisedGraph, DenormalisedPath, DenormalisedResource,
    DenormalisedValue, NodeId, Reference,
};
pub use error::{Error, Result};
pub use filter::{evaluate_query, filter_resources, sort_resources, FilterOperator, FilterPredicate};
pub use merge::{upsert_resource, ErrorModification};
pub use pending::{get_pending_changes, sort_pending_changes};
pub use query::{FilteringParam, Query, QueryParams, QuerySource, SortDirection, SortingParam, StoreQuery};
pub use reducer::Reducer;
pub use resource::{
    Document, OperationType, Relationship, RelationshipData, Resource, ResourceError,
    ResourceIdentifier, ResourceState, StoreResource,
};
pub use selectors::{
    select_denormalised_query_result, select_many_query_result, select_one_query_result,
    select_query_result, select_store_query, select_store_resource, QueryResult,
};
pub use store::{JsonApiStore, StoreData};
