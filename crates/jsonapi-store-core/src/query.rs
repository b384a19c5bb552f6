//! Query specifications and live query bookkeeping

use crate::error::{Error, Result};
use crate::resource::{Document, ResourceError, ResourceIdentifier};
use crate::store::StoreQueries;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One sort key: a field path and a direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortingParam {
    pub api: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortingParam {
    pub fn asc(api: impl Into<String>) -> Self {
        Self {
            api: api.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(api: impl Into<String>) -> Self {
        Self {
            api: api.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// One filter clause; all clauses of a query must hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteringParam {
    pub path: String,

    /// Operator name, `iexact` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    pub value: Value,
}

impl FilteringParam {
    pub fn new(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            operator: None,
            value: value.into(),
        }
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn operator_name(&self) -> &str {
        self.operator.as_deref().unwrap_or("iexact")
    }
}

/// Filter, sort, include and pagination parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filtering: Vec<FilteringParam>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sorting: Vec<SortingParam>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// A query for one resource (`type` + `id`) or a collection (`type` only)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub params: QueryParams,
}

impl Query {
    /// Query every resource of a type
    pub fn collection(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            ..Default::default()
        }
    }

    /// Query a single resource
    pub fn single(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn for_identifier(id: &ResourceIdentifier) -> Self {
        Self::single(id.resource_type.clone(), id.id.clone())
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = Some(query_id.into());
        self
    }

    pub fn with_filter(mut self, filter: FilteringParam) -> Self {
        self.params.filtering.push(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortingParam) -> Self {
        self.params.sorting.push(sort);
        self
    }

    pub fn with_include(mut self, path: impl Into<String>) -> Self {
        self.params.include.push(path.into());
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.params.offset = Some(offset);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.params.limit = Some(limit);
        self
    }

    /// Reject queries without a type
    pub fn validate(&self) -> Result<()> {
        match self.resource_type.as_deref() {
            Some(t) if !t.is_empty() => Ok(()),
            _ => Err(Error::InvalidQuery("query must have a type".to_string())),
        }
    }

    pub fn is_single(&self) -> bool {
        self.id.is_some()
    }

    /// The addressed resource, for single-resource queries
    pub fn identifier(&self) -> Option<ResourceIdentifier> {
        match (&self.resource_type, &self.id) {
            (Some(t), Some(id)) => Some(ResourceIdentifier::new(t.clone(), id.clone())),
            _ => None,
        }
    }
}

/// Where a query's results come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuerySource {
    /// Results are cached from a server response
    #[default]
    Remote,
    /// Results are recomputed from the store on every change
    Local,
}

/// A named live query holding only identifiers into the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreQuery {
    pub query: Query,

    pub loading: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_ids: Option<Vec<ResourceIdentifier>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_meta: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_links: Option<Value>,

    #[serde(default)]
    pub errors: Vec<ResourceError>,

    #[serde(default)]
    pub source: QuerySource,
}

impl StoreQuery {
    pub fn new(query: Query, source: QuerySource) -> Self {
        Self {
            query,
            loading: false,
            result_ids: None,
            result_meta: None,
            result_links: None,
            errors: Vec::new(),
            source,
        }
    }

    pub fn query_id(&self) -> Option<&str> {
        self.query.query_id.as_deref()
    }
}

/// Store `store_query` under `query_id` unless an equal value is already there
fn put_query(queries: &Arc<StoreQueries>, query_id: &str, store_query: StoreQuery) -> Arc<StoreQueries> {
    if let Some(existing) = queries.get(query_id) {
        if **existing == store_query {
            return Arc::clone(queries);
        }
    }
    let mut next = (**queries).clone();
    next.insert(query_id.to_string(), Arc::new(store_query));
    Arc::new(next)
}

/// Register or replace the query; marks the query as loading
///
/// Cached results and errors of a replaced query are kept until new results
/// arrive.
pub fn update_query_params(
    queries: &Arc<StoreQueries>,
    query: &Query,
    source: QuerySource,
) -> Arc<StoreQueries> {
    let Some(query_id) = query.query_id.as_deref() else {
        tracing::warn!("Ignoring query without query id: {:?}", query.resource_type);
        return Arc::clone(queries);
    };

    let mut store_query = queries
        .get(query_id)
        .map(|q| (**q).clone())
        .unwrap_or_else(|| StoreQuery::new(query.clone(), source));
    store_query.query = query.clone();
    store_query.source = source;
    store_query.loading = true;

    put_query(queries, query_id, store_query)
}

/// Cache the primary identifiers, meta and links of a response
pub fn update_query_results(
    queries: &Arc<StoreQueries>,
    query_id: &str,
    document: &Document,
) -> Arc<StoreQueries> {
    let Some(existing) = queries.get(query_id) else {
        return Arc::clone(queries);
    };
    let mut store_query = (**existing).clone();
    store_query.result_ids = Some(document.primary_identifiers());
    store_query.result_meta = document.meta.clone();
    store_query.result_links = document.links.clone();
    store_query.loading = false;

    put_query(queries, query_id, store_query)
}

/// Replace cached identifiers with a locally computed result
pub fn update_query_result_ids(
    queries: &Arc<StoreQueries>,
    query_id: &str,
    result_ids: Vec<ResourceIdentifier>,
) -> Arc<StoreQueries> {
    let Some(existing) = queries.get(query_id) else {
        return Arc::clone(queries);
    };
    let mut store_query = (**existing).clone();
    store_query.result_ids = Some(result_ids);
    store_query.errors.clear();
    store_query.loading = false;

    put_query(queries, query_id, store_query)
}

/// Attach the errors of a failed response
pub fn update_query_errors(
    queries: &Arc<StoreQueries>,
    query_id: &str,
    document: &Document,
) -> Arc<StoreQueries> {
    let Some(existing) = queries.get(query_id) else {
        return Arc::clone(queries);
    };
    let mut store_query = (**existing).clone();
    store_query.errors = document.errors().to_vec();
    store_query.loading = false;

    put_query(queries, query_id, store_query)
}

/// Forget cached results so a refetch shows "no data yet" instead of stale data
pub fn clear_query_result(queries: &Arc<StoreQueries>, query_id: &str) -> Arc<StoreQueries> {
    let Some(existing) = queries.get(query_id) else {
        return Arc::clone(queries);
    };
    let mut store_query = (**existing).clone();
    store_query.result_ids = None;
    store_query.result_meta = None;
    store_query.result_links = None;

    put_query(queries, query_id, store_query)
}

pub fn remove_query(queries: &Arc<StoreQueries>, query_id: &str) -> Arc<StoreQueries> {
    if !queries.contains_key(query_id) {
        return Arc::clone(queries);
    }
    let mut next = (**queries).clone();
    next.remove(query_id);
    Arc::new(next)
}

/// Drop a deleted resource from every cached result
pub fn remove_deleted_from_queries(
    queries: &Arc<StoreQueries>,
    deleted: &ResourceIdentifier,
) -> Arc<StoreQueries> {
    let mut next = queries.clone();
    for (query_id, store_query) in queries.iter() {
        let Some(ids) = &store_query.result_ids else {
            continue;
        };
        if !ids.contains(deleted) {
            continue;
        }
        let mut updated = (**store_query).clone();
        updated.result_ids = Some(ids.iter().filter(|id| *id != deleted).cloned().collect());
        next = put_query(&next, query_id, updated);
    }
    next
}
