//! Pure state transitions: `(store, action) -> store`

use crate::action::StoreAction;
use crate::compact::compact_store;
use crate::config::StoreConfig;
use crate::filter::evaluate_query;
use crate::merge::{
    delete_store_resources, rollback_store_resources, update_resource_errors,
    update_resource_errors_for_query, update_resource_loading, update_resource_state,
    update_store_data_from_payload, upsert_resource,
};
use crate::query::{
    clear_query_result, remove_deleted_from_queries, remove_query, update_query_errors,
    update_query_params, update_query_result_ids, update_query_results, Query, QuerySource,
};
use crate::resource::{
    Document, OperationType, Resource, ResourceError, ResourceIdentifier, ResourceState,
};
use crate::store::{remove_resource, JsonApiStore, StoreData, StoreQueries};
use std::sync::Arc;

fn settle(counter: &mut u32) {
    *counter = counter.saturating_sub(1);
}

/// True when `query` is still the query registered under its id
fn is_current(queries: &StoreQueries, query: &Query) -> bool {
    query
        .query_id
        .as_deref()
        .and_then(|id| queries.get(id))
        .map(|stored| stored.query == *query)
        .unwrap_or(false)
}

/// Insert `resource` locally when absent, then mark its operation in flight
fn start_operation(data: &Arc<StoreData>, resource: &Resource, operation: OperationType) -> Arc<StoreData> {
    let data = upsert_resource(data, resource, false, false);
    update_resource_loading(&data, &resource.identifier(), Some(operation))
}

/// Apply a successful write response
///
/// A response without primary data confirms the local content as sent.
fn finish_write(data: &Arc<StoreData>, id: &ResourceIdentifier, document: &Document) -> Arc<StoreData> {
    if document.data.is_some() {
        let data = update_store_data_from_payload(data, document);
        return update_resource_loading(&data, id, None);
    }
    match data.get(id) {
        Some(existing) => upsert_resource(data, &existing.resource, true, true),
        None => Arc::clone(data),
    }
}

fn fail_write(data: &Arc<StoreData>, id: &ResourceIdentifier, document: &Document) -> Arc<StoreData> {
    let data = update_resource_loading(data, id, None);
    update_resource_errors_for_query(&data, &Query::for_identifier(id), document)
}

/// Applies [`StoreAction`]s to store snapshots
#[derive(Debug, Clone, Default)]
pub struct Reducer {
    config: Arc<StoreConfig>,
}

impl Reducer {
    pub fn new(config: impl Into<Arc<StoreConfig>>) -> Self {
        Self {
            config: config.into(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Compute the next snapshot
    ///
    /// Local queries are re-evaluated whenever the data or the queries changed,
    /// except the one whose result or failure the action itself delivers.
    pub fn reduce(&self, store: &JsonApiStore, action: &StoreAction) -> JsonApiStore {
        tracing::debug!("Reducing {}", action);
        let next = self.apply(store, action);
        if Arc::ptr_eq(&next.data, &store.data) && Arc::ptr_eq(&next.queries, &store.queries) {
            return next;
        }
        let settled = match action {
            StoreAction::LocalQuerySuccess { query, .. } | StoreAction::LocalQueryFail { query, .. } => {
                query.query_id.as_deref()
            }
            _ => None,
        };
        self.refresh_local_queries(next, settled)
    }

    fn apply(&self, store: &JsonApiStore, action: &StoreAction) -> JsonApiStore {
        let mut next = store.clone();

        match action {
            StoreAction::ApiPostInit { resource } => {
                next.data = start_operation(&store.data, resource, OperationType::Post);
                next.is_creating += 1;
            }
            StoreAction::ApiPostSuccess { id, document } => {
                next.data = finish_write(&store.data, id, document);
                settle(&mut next.is_creating);
            }
            StoreAction::ApiPostFail { id, document } => {
                next.data = fail_write(&store.data, id, document);
                settle(&mut next.is_creating);
            }

            StoreAction::ApiGetInit { query } => {
                next.queries = update_query_params(&store.queries, query, QuerySource::Remote);
                if let Some(id) = query.identifier() {
                    next.data = update_resource_loading(&store.data, &id, Some(OperationType::Get));
                }
                next.is_reading += 1;
            }
            StoreAction::ApiGetSuccess { query, document } => {
                settle(&mut next.is_reading);
                match query.query_id.as_deref() {
                    None => next.data = update_store_data_from_payload(&store.data, document),
                    Some(query_id) if is_current(&store.queries, query) => {
                        next.data = update_store_data_from_payload(&store.data, document);
                        next.queries = update_query_results(&store.queries, query_id, document);
                    }
                    Some(query_id) => {
                        tracing::warn!("Dropping response for superseded query {}", query_id);
                        if let Some(id) = query.identifier() {
                            let refetching = store
                                .queries
                                .get(query_id)
                                .and_then(|q| q.query.identifier())
                                .is_some_and(|current| current == id);
                            if !refetching {
                                next.data = update_resource_loading(&store.data, &id, None);
                            }
                        }
                    }
                }
            }
            StoreAction::ApiGetFail { query, document } => {
                settle(&mut next.is_reading);
                if let Some(id) = query.identifier() {
                    next.data = fail_write(&store.data, &id, document);
                }
                match query.query_id.as_deref() {
                    Some(query_id) if is_current(&store.queries, query) => {
                        next.queries = update_query_errors(&store.queries, query_id, document);
                    }
                    Some(query_id) => {
                        tracing::warn!("Dropping errors for superseded query {}", query_id);
                    }
                    None => {}
                }
            }

            StoreAction::ApiPatchInit { resource } => {
                next.data = start_operation(&store.data, resource, OperationType::Patch);
                next.is_updating += 1;
            }
            StoreAction::ApiPatchSuccess { id, document } => {
                next.data = finish_write(&store.data, id, document);
                settle(&mut next.is_updating);
            }
            StoreAction::ApiPatchFail { id, document } => {
                next.data = fail_write(&store.data, id, document);
                settle(&mut next.is_updating);
            }

            StoreAction::ApiDeleteInit { id } => {
                next.data = update_resource_loading(&store.data, id, Some(OperationType::Delete));
                next.is_deleting += 1;
            }
            StoreAction::ApiDeleteSuccess { id } => {
                next.data = delete_store_resources(&store.data, &Query::for_identifier(id));
                next.queries = remove_deleted_from_queries(&store.queries, id);
                settle(&mut next.is_deleting);
            }
            StoreAction::ApiDeleteFail { id, document } => {
                next.data = fail_write(&store.data, id, document);
                settle(&mut next.is_deleting);
            }

            StoreAction::ApiApplyInit => next.is_applying += 1,
            StoreAction::ApiApplySuccess | StoreAction::ApiApplyFail => settle(&mut next.is_applying),

            StoreAction::ApiRollback => next.data = rollback_store_resources(&store.data),
            StoreAction::ApiQueryRefresh { query_id } => {
                next.queries = clear_query_result(&store.queries, query_id);
            }

            StoreAction::LocalQueryInit { query } => {
                next.queries = update_query_params(&store.queries, query, QuerySource::Local);
            }
            StoreAction::LocalQuerySuccess { query, result_ids } => {
                if let Some(query_id) = query.query_id.as_deref().filter(|_| is_current(&store.queries, query)) {
                    next.queries = update_query_result_ids(&store.queries, query_id, result_ids.clone());
                }
            }
            StoreAction::LocalQueryFail { query, errors } => {
                if let Some(query_id) = query.query_id.as_deref().filter(|_| is_current(&store.queries, query)) {
                    let document = Document::from_errors(errors.clone());
                    next.queries = update_query_errors(&store.queries, query_id, &document);
                }
            }

            StoreAction::NewStoreResource { resource } => {
                next.data = upsert_resource(&store.data, resource, false, true);
            }
            StoreAction::PostStoreResource { resource } | StoreAction::PatchStoreResource { resource } => {
                next.data = upsert_resource(&store.data, resource, false, false);
            }
            StoreAction::DeleteStoreResource { id } => match store.data.get(id) {
                Some(existing) if existing.state == ResourceState::Created => {
                    next.data = remove_resource(&store.data, id);
                    next.queries = remove_deleted_from_queries(&store.queries, id);
                }
                _ => next.data = update_resource_state(&store.data, id, ResourceState::Deleted),
            },
            StoreAction::ModifyStoreResourceErrors {
                id,
                errors,
                modification,
            } => {
                next.data = update_resource_errors(&store.data, id, errors, *modification);
            }

            StoreAction::RemoveQuery { query_id } => {
                next.queries = remove_query(&store.queries, query_id);
            }
            StoreAction::CompactStore => next = compact_store(store),
            StoreAction::ClearStore => next = JsonApiStore::new(),
        }

        next
    }

    /// Recompute the cached identifiers of every local query but `settled`
    fn refresh_local_queries(&self, mut store: JsonApiStore, settled: Option<&str>) -> JsonApiStore {
        let local: Vec<_> = store
            .queries
            .iter()
            .filter(|(id, q)| q.source == QuerySource::Local && settled != Some(id.as_str()))
            .map(|(id, q)| (id.clone(), q.query.clone()))
            .collect();

        for (query_id, query) in local {
            store.queries = match evaluate_query(&store.data, &query, &self.config) {
                Ok(results) => {
                    let ids = results.iter().map(|r| r.identifier()).collect();
                    update_query_result_ids(&store.queries, &query_id, ids)
                }
                Err(e) => {
                    tracing::warn!("Local query {} failed: {}", query_id, e);
                    let error = ResourceError::new("local_query_error").with_detail(e.to_string());
                    update_query_errors(&store.queries, &query_id, &Document::from_errors(vec![error]))
                }
            };
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ResourceDefinition;
    use crate::query::FilteringParam;
    use crate::resource::Relationship;

    fn reducer() -> Reducer {
        Reducer::new(StoreConfig::new(vec![
            ResourceDefinition::new("Article", "articles").with_attribute("title"),
        ]))
    }

    fn article(id: &str, title: &str) -> Resource {
        Resource::new("Article", id).with_attribute("title", title)
    }

    fn articles_query() -> Query {
        Query::collection("Article").with_query_id("q1")
    }

    fn loaded() -> JsonApiStore {
        let reducer = reducer();
        let store = reducer.reduce(&JsonApiStore::new(), &StoreAction::ApiGetInit { query: articles_query() });
        reducer.reduce(
            &store,
            &StoreAction::ApiGetSuccess {
                query: articles_query(),
                document: Document::many(vec![article("1", "Article 1"), article("2", "Article 2")]),
            },
        )
    }

    #[test]
    fn test_get_lifecycle_and_counters() {
        let reducer = reducer();
        let store = reducer.reduce(&JsonApiStore::new(), &StoreAction::ApiGetInit { query: articles_query() });
        assert_eq!(store.is_reading, 1);
        assert!(store.queries["q1"].loading);

        let store = loaded();
        assert_eq!(store.is_reading, 0);
        assert_eq!(store.data.len(), 2);
        assert_eq!(store.queries["q1"].result_ids.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_counters_survive_overlapping_requests() {
        let reducer = reducer();
        let init = StoreAction::ApiDeleteInit { id: ResourceIdentifier::new("Article", "1") };
        let store = reducer.reduce(&loaded(), &init);
        let store = reducer.reduce(&store, &init);
        let store = reducer.reduce(
            &store,
            &StoreAction::ApiDeleteFail {
                id: ResourceIdentifier::new("Article", "1"),
                document: Document::from_errors(vec![ResourceError::new("Conflict")]),
            },
        );
        assert_eq!(store.is_deleting, 1);
        assert!(store.is_busy());

        let store = reducer.reduce(&store, &StoreAction::ApiApplyFail);
        assert_eq!(store.is_applying, 0);
    }

    #[test]
    fn test_superseded_query_results_are_dropped() {
        let reducer = reducer();
        let store = loaded();
        let narrowed = articles_query().with_filter(FilteringParam::new("title", "article 2"));
        let store = reducer.reduce(&store, &StoreAction::ApiGetInit { query: narrowed });

        let stale = StoreAction::ApiGetSuccess {
            query: articles_query(),
            document: Document::many(vec![article("3", "Article 3")]),
        };
        let next = reducer.reduce(&store, &stale);
        assert!(next.data.get_by("Article", "3").is_none());
        assert!(Arc::ptr_eq(&next.queries, &store.queries));

        let removed = reducer.reduce(&store, &StoreAction::RemoveQuery { query_id: "q1".into() });
        let next = reducer.reduce(&removed, &stale);
        assert!(next.queries.is_empty());
    }

    #[test]
    fn test_get_fail_sets_query_and_resource_errors() {
        let reducer = reducer();
        let query = Query::single("Article", "1").with_query_id("one");
        let store = reducer.reduce(&loaded(), &StoreAction::ApiGetInit { query: query.clone() });
        assert_eq!(store.data.get_by("Article", "1").unwrap().loading, Some(OperationType::Get));

        let failed = Document::from_errors(vec![ResourceError::new("Not Found").with_status("404")]);
        let store = reducer.reduce(&store, &StoreAction::ApiGetFail { query, document: failed });
        assert_eq!(store.queries["one"].errors.len(), 1);
        let resource = store.data.get_by("Article", "1").unwrap();
        assert_eq!(resource.loading, None);
        assert_eq!(resource.errors.len(), 1);
    }

    #[test]
    fn test_post_lifecycle() {
        let reducer = reducer();
        let draft = article("9", "Draft");
        let store = reducer.reduce(&JsonApiStore::new(), &StoreAction::ApiPostInit { resource: draft.clone() });
        let stored = store.data.get_by("Article", "9").unwrap();
        assert_eq!(stored.state, ResourceState::Created);
        assert_eq!(stored.loading, Some(OperationType::Post));
        assert_eq!(store.is_creating, 1);

        let store = reducer.reduce(
            &store,
            &StoreAction::ApiPostSuccess {
                id: draft.identifier(),
                document: Document::one(draft.clone()),
            },
        );
        let stored = store.data.get_by("Article", "9").unwrap();
        assert_eq!(stored.state, ResourceState::InSync);
        assert_eq!(stored.loading, None);
        assert_eq!(store.is_creating, 0);
    }

    #[test]
    fn test_patch_without_response_body_confirms_local_content() {
        let reducer = reducer();
        let patch = article("1", "Renamed");
        let store = reducer.reduce(&loaded(), &StoreAction::ApiPatchInit { resource: patch.clone() });
        assert_eq!(store.data.get_by("Article", "1").unwrap().state, ResourceState::Updated);

        let store = reducer.reduce(
            &store,
            &StoreAction::ApiPatchSuccess {
                id: patch.identifier(),
                document: Document::default(),
            },
        );
        let stored = store.data.get_by("Article", "1").unwrap();
        assert_eq!(stored.state, ResourceState::InSync);
        assert_eq!(stored.persisted_resource.as_ref().unwrap().attribute("title").unwrap(), "Renamed");
    }

    #[test]
    fn test_local_delete() {
        let reducer = reducer();
        let store = reducer.reduce(&loaded(), &StoreAction::NewStoreResource { resource: article("new", "New") });
        assert_eq!(store.data.get_by("Article", "new").unwrap().state, ResourceState::Created);

        let store = reducer.reduce(&store, &StoreAction::DeleteStoreResource { id: ResourceIdentifier::new("Article", "new") });
        assert!(store.data.get_by("Article", "new").is_none());

        let store = reducer.reduce(&store, &StoreAction::DeleteStoreResource { id: ResourceIdentifier::new("Article", "1") });
        assert_eq!(store.data.get_by("Article", "1").unwrap().state, ResourceState::Deleted);

        let store = reducer.reduce(&store, &StoreAction::ApiDeleteSuccess { id: ResourceIdentifier::new("Article", "1") });
        assert!(store.data.get_by("Article", "1").is_none());
        assert_eq!(store.queries["q1"].result_ids.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_local_query_tracks_store_changes() {
        let reducer = reducer();
        let query = Query::collection("Article")
            .with_query_id("local")
            .with_filter(FilteringParam::new("title", "article 2"));
        let store = reducer.reduce(&loaded(), &StoreAction::LocalQueryInit { query });
        assert_eq!(
            store.queries["local"].result_ids.as_ref().unwrap(),
            &vec![ResourceIdentifier::new("Article", "2")]
        );
        assert!(!store.queries["local"].loading);

        let store = reducer.reduce(&store, &StoreAction::PatchStoreResource { resource: article("1", "ARTICLE 2") });
        assert_eq!(store.queries["local"].result_ids.as_ref().unwrap().len(), 2);

        let unchanged = reducer.reduce(&store, &StoreAction::PatchStoreResource { resource: article("1", "ARTICLE 2") });
        assert!(unchanged.ptr_eq(&store));
    }

    #[test]
    fn test_local_edit_keeps_in_flight_patch_marker() {
        let reducer = reducer();
        let store = reducer.reduce(&loaded(), &StoreAction::ApiPatchInit { resource: article("1", "Sent") });
        let store = reducer.reduce(&store, &StoreAction::PatchStoreResource { resource: article("1", "Typing") });

        let stored = store.data.get_by("Article", "1").unwrap();
        assert_eq!(stored.loading, Some(OperationType::Patch));
        assert_eq!(stored.resource.attribute("title").unwrap(), "Typing");
        assert_eq!(store.is_updating, 1);
    }

    #[test]
    fn test_local_query_result_and_failure_are_kept() {
        let reducer = reducer();
        let query = Query::collection("Article").with_query_id("local");
        let store = reducer.reduce(&loaded(), &StoreAction::LocalQueryInit { query: query.clone() });
        assert_eq!(store.queries["local"].result_ids.as_ref().unwrap().len(), 2);

        let only_two = vec![ResourceIdentifier::new("Article", "2")];
        let store = reducer.reduce(
            &store,
            &StoreAction::LocalQuerySuccess { query: query.clone(), result_ids: only_two.clone() },
        );
        assert_eq!(store.queries["local"].result_ids.as_ref().unwrap(), &only_two);

        let boom = ResourceError::new("boom");
        let store = reducer.reduce(&store, &StoreAction::LocalQueryFail { query, errors: vec![boom.clone()] });
        assert_eq!(store.queries["local"].errors, vec![boom]);
        assert!(!store.queries["local"].loading);
    }

    #[test]
    fn test_dropped_single_response_clears_loading() {
        let reducer = reducer();
        let query = Query::single("Article", "1").with_query_id("one");
        let store = reducer.reduce(&loaded(), &StoreAction::ApiGetInit { query: query.clone() });
        let store = reducer.reduce(&store, &StoreAction::RemoveQuery { query_id: "one".into() });
        assert_eq!(store.data.get_by("Article", "1").unwrap().loading, Some(OperationType::Get));

        let store = reducer.reduce(
            &store,
            &StoreAction::ApiGetSuccess { query: query.clone(), document: Document::one(article("1", "Late")) },
        );
        let stored = store.data.get_by("Article", "1").unwrap();
        assert_eq!(stored.loading, None);
        assert_eq!(stored.resource.attribute("title").unwrap(), "Article 1");
        assert_eq!(store.is_reading, 0);

        let refetch = query.clone().with_include("author");
        let store = reducer.reduce(&store, &StoreAction::ApiGetInit { query: query.clone() });
        let store = reducer.reduce(&store, &StoreAction::ApiGetInit { query: refetch });
        let store = reducer.reduce(
            &store,
            &StoreAction::ApiGetSuccess { query, document: Document::one(article("1", "Late")) },
        );
        assert_eq!(store.data.get_by("Article", "1").unwrap().loading, Some(OperationType::Get));
    }

    #[test]
    fn test_local_query_errors_become_data() {
        let reducer = reducer();
        let query = Query::collection("Article")
            .with_query_id("bad")
            .with_filter(FilteringParam::new("author", "x"));
        let store = reducer.reduce(&loaded(), &StoreAction::LocalQueryInit { query });
        assert_eq!(store.queries["bad"].errors[0].code.as_deref(), Some("local_query_error"));
    }

    #[test]
    fn test_rollback_refresh_compact_clear() {
        let reducer = reducer();
        let store = reducer.reduce(&loaded(), &StoreAction::PatchStoreResource { resource: article("1", "Edited") });
        let store = reducer.reduce(&store, &StoreAction::ApiRollback);
        assert_eq!(
            store.data.get_by("Article", "1").unwrap().resource.attribute("title").unwrap(),
            "Article 1"
        );

        let orphan = Resource::new("Person", "7").with_relationship("friend", Relationship::empty_to_one());
        let store = reducer.reduce(
            &store,
            &StoreAction::ApiGetSuccess { query: Query::single("Person", "7"), document: Document::one(orphan) },
        );
        assert!(store.data.get_by("Person", "7").is_some());
        let compacted = reducer.reduce(&store, &StoreAction::CompactStore);
        assert!(compacted.data.get_by("Person", "7").is_none());
        assert_eq!(compacted.data.len(), 2);

        let refreshed = reducer.reduce(&compacted, &StoreAction::ApiQueryRefresh { query_id: "q1".into() });
        assert!(refreshed.queries["q1"].result_ids.is_none());

        let cleared = reducer.reduce(&refreshed, &StoreAction::ClearStore);
        assert!(cleared.data.is_empty() && cleared.queries.is_empty());
    }
}
