//! Read helpers over a store snapshot

use crate::denormalise::{denormalise_store_resources, DenormalisedGraph};
use crate::error::{Error, Result};
use crate::query::StoreQuery;
use crate::resource::{ResourceError, ResourceIdentifier, StoreResource};
use crate::store::JsonApiStore;
use serde_json::Value;
use std::sync::Arc;

pub fn select_store_resource<'s>(
    store: &'s JsonApiStore,
    id: &ResourceIdentifier,
) -> Option<&'s Arc<StoreResource>> {
    store.data.get(id)
}

pub fn select_store_query<'s>(store: &'s JsonApiStore, query_id: &str) -> Option<&'s Arc<StoreQuery>> {
    store.queries.get(query_id)
}

fn resolve_results(store: &JsonApiStore, store_query: &StoreQuery) -> Option<Vec<Arc<StoreResource>>> {
    if let Some(id) = store_query.query.identifier() {
        return match store.data.get(&id) {
            Some(resource) => Some(vec![Arc::clone(resource)]),
            None => store_query.result_ids.as_ref().map(|_| Vec::new()),
        };
    }
    let ids = store_query.result_ids.as_ref()?;
    Some(ids.iter().filter_map(|id| store.data.get(id)).cloned().collect())
}

/// Resources of a query, `None` while no result is known
///
/// Cached identifiers no longer present in the store are skipped.
pub fn select_many_query_result(store: &JsonApiStore, query_id: &str) -> Option<Vec<Arc<StoreResource>>> {
    resolve_results(store, select_store_query(store, query_id)?)
}

/// The single resource of a query
///
/// More than one result violates the query's contract and is an error.
pub fn select_one_query_result(store: &JsonApiStore, query_id: &str) -> Result<Option<Arc<StoreResource>>> {
    let Some(mut results) = select_many_query_result(store, query_id) else {
        return Ok(None);
    };
    if results.len() > 1 {
        return Err(Error::SingleResultExpected(query_id.to_string()));
    }
    Ok(results.pop())
}

/// A query's resources together with its bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub query_id: String,
    pub loading: bool,
    /// `None` while no result is known
    pub resources: Option<Vec<Arc<StoreResource>>>,
    pub meta: Option<Value>,
    pub links: Option<Value>,
    pub errors: Vec<ResourceError>,
}

impl QueryResult {
    /// The only resource, failing when there are several
    pub fn one(&self) -> Result<Option<&Arc<StoreResource>>> {
        match self.resources.as_deref() {
            Some([]) | None => Ok(None),
            Some([resource]) => Ok(Some(resource)),
            Some(_) => Err(Error::SingleResultExpected(self.query_id.clone())),
        }
    }
}

pub fn select_query_result(store: &JsonApiStore, query_id: &str) -> Option<QueryResult> {
    let store_query = select_store_query(store, query_id)?;
    Some(QueryResult {
        query_id: query_id.to_string(),
        loading: store_query.loading,
        resources: resolve_results(store, store_query),
        meta: store_query.result_meta.clone(),
        links: store_query.result_links.clone(),
        errors: store_query.errors.clone(),
    })
}

/// Denormalised graph rooted at a query's resources
pub fn select_denormalised_query_result(store: &JsonApiStore, query_id: &str) -> Option<DenormalisedGraph> {
    let resources = select_many_query_result(store, query_id)?;
    Some(denormalise_store_resources(&resources, &store.data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{update_query_params, update_query_results, Query, QuerySource};
    use crate::resource::{Document, Relationship, Resource};
    use crate::store::StoreData;

    fn store() -> JsonApiStore {
        let data: StoreData = vec![
            Resource::new("Article", "1")
                .with_attribute("title", "Article 1")
                .with_relationship("author", Relationship::to_one(ResourceIdentifier::new("Person", "1"))),
            Resource::new("Article", "2").with_attribute("title", "Article 2"),
            Resource::new("Person", "1").with_attribute("name", "Ada"),
        ]
        .into_iter()
        .map(StoreResource::from_server)
        .collect();

        let mut queries = Default::default();
        for query in [
            Query::collection("Article").with_query_id("all"),
            Query::single("Article", "1").with_query_id("one"),
            Query::single("Article", "9").with_query_id("missing"),
        ] {
            queries = update_query_params(&queries, &query, QuerySource::Remote);
        }
        let queries = update_query_results(
            &queries,
            "all",
            &Document::many(vec![
                Resource::new("Article", "1"),
                Resource::new("Article", "2"),
                Resource::new("Article", "gone"),
            ]),
        );

        JsonApiStore {
            data: Arc::new(data),
            queries,
            ..Default::default()
        }
    }

    #[test]
    fn test_select_many() {
        let store = store();
        let results = select_many_query_result(&store, "all").unwrap();
        assert_eq!(results.len(), 2);
        assert!(select_many_query_result(&store, "missing").is_none());
        assert!(select_many_query_result(&store, "nope").is_none());
    }

    #[test]
    fn test_select_one_enforces_uniqueness() {
        let store = store();
        let one = select_one_query_result(&store, "one").unwrap().unwrap();
        assert_eq!(one.id(), "1");

        let err = select_one_query_result(&store, "all").unwrap_err();
        assert_eq!(err.to_string(), "expected single result for query all");
    }

    #[test]
    fn test_query_result() {
        let store = store();
        let result = select_query_result(&store, "one").unwrap();
        assert!(result.loading);
        assert_eq!(result.one().unwrap().unwrap().id(), "1");

        let all = select_query_result(&store, "all").unwrap();
        assert!(!all.loading);
        assert!(matches!(all.one(), Err(Error::SingleResultExpected(_))));
    }

    #[test]
    fn test_denormalised_query_result() {
        let store = store();
        let graph = select_denormalised_query_result(&store, "all").unwrap();
        assert_eq!(graph.roots().len(), 2);
        assert_eq!(graph.len(), 3);

        let author = graph.related_one(graph.roots()[0], "author").unwrap();
        assert_eq!(graph.node(author).attribute("name").unwrap(), "Ada");
    }
}
