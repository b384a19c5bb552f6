//! Mark-and-sweep compaction of the resource graph

use crate::resource::{ResourceIdentifier, ResourceState};
use crate::store::{JsonApiStore, StoreData, StoreResources};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Roots: every cached query result plus every resource not in sync
///
/// `NOT_LOADED` stubs count as roots so a rolled-back remote delete survives.
fn root_set(store: &JsonApiStore) -> HashSet<ResourceIdentifier> {
    let query_roots = store
        .queries
        .values()
        .filter_map(|q| q.result_ids.as_ref())
        .flatten()
        .cloned();
    let pending_roots = store
        .data
        .iter()
        .filter(|r| r.state != ResourceState::InSync)
        .map(|r| r.identifier());
    query_roots.chain(pending_roots).collect()
}

/// Extend `retained` with everything reachable through relationships
///
/// Repeats full passes over the retained resources until one adds nothing.
fn mark(data: &StoreData, retained: &mut HashSet<ResourceIdentifier>) -> usize {
    let mut passes = 0;
    loop {
        passes += 1;
        let discovered: Vec<ResourceIdentifier> = retained
            .iter()
            .filter_map(|id| data.get(id))
            .flat_map(|r| {
                let mut ids: Vec<&ResourceIdentifier> = r
                    .resource
                    .relationships_iter()
                    .flat_map(|(_, rel)| rel.identifiers())
                    .collect();
                if let Some(persisted) = &r.persisted_resource {
                    ids.extend(persisted.relationships_iter().flat_map(|(_, rel)| rel.identifiers()));
                }
                ids
            })
            .filter(|id| !retained.contains(*id))
            .cloned()
            .collect();

        if discovered.is_empty() {
            return passes;
        }
        retained.extend(discovered);
    }
}

/// Drop every resource not reachable from a live query or a pending change
///
/// Returns a clone sharing the same `Arc`s when nothing was removed.
pub fn compact_store(store: &JsonApiStore) -> JsonApiStore {
    let mut retained = root_set(store);
    let passes = mark(&store.data, &mut retained);

    let mut removed = 0;
    let mut types = BTreeMap::new();
    for (resource_type, bucket) in store.data.buckets() {
        let kept: StoreResources = bucket
            .iter()
            .filter(|(_, r)| retained.contains(&r.identifier()))
            .map(|(id, r)| (id.clone(), Arc::clone(r)))
            .collect();
        removed += bucket.len() - kept.len();

        if kept.len() == bucket.len() {
            types.insert(resource_type.clone(), Arc::clone(bucket));
        } else if !kept.is_empty() {
            types.insert(resource_type.clone(), Arc::new(kept));
        }
    }

    tracing::debug!(
        "Compaction retained {} resources after {} passes, removed {}",
        store.data.len() - removed,
        passes,
        removed
    );

    if removed == 0 {
        return store.clone();
    }
    JsonApiStore {
        data: Arc::new(StoreData::from_buckets(types)),
        ..store.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{rollback_store_resources, update_resource_state, upsert_resource};
    use crate::query::{update_query_params, update_query_results, Query, QuerySource};
    use crate::resource::{Document, Relationship, Resource, StoreResource};

    fn rel(resource_type: &str, id: &str) -> Relationship {
        Relationship::to_one(ResourceIdentifier::new(resource_type, id))
    }

    /// Query q1 holds X; X -> Y -> W; Z is unrelated
    fn store() -> JsonApiStore {
        let data: StoreData = vec![
            Resource::new("Article", "x").with_relationship("author", rel("Person", "y")),
            Resource::new("Person", "y").with_relationship("country", rel("Country", "w")),
            Resource::new("Country", "w"),
            Resource::new("Article", "z"),
        ]
        .into_iter()
        .map(StoreResource::from_server)
        .collect();

        let query = Query::collection("Article").with_query_id("q1");
        let queries = update_query_params(&Default::default(), &query, QuerySource::Remote);
        let queries = update_query_results(&queries, "q1", &Document::many(vec![Resource::new("Article", "x")]));

        JsonApiStore {
            data: Arc::new(data),
            queries,
            ..Default::default()
        }
    }

    #[test]
    fn test_retains_reachable_and_drops_rest() {
        let store = store();
        let compacted = compact_store(&store);

        assert!(compacted.data.get_by("Article", "x").is_some());
        assert!(compacted.data.get_by("Person", "y").is_some());
        assert!(compacted.data.get_by("Country", "w").is_some());
        assert!(compacted.data.get_by("Article", "z").is_none());
        assert!(Arc::ptr_eq(
            store.data.resources_of_type("Person").unwrap(),
            compacted.data.resources_of_type("Person").unwrap()
        ));
    }

    #[test]
    fn test_pending_changes_are_roots() {
        let store = store();
        let draft = Resource::new("Article", "draft").with_relationship("author", rel("Person", "y"));
        let store = JsonApiStore {
            data: upsert_resource(&store.data, &draft, false, false),
            queries: Default::default(),
            ..store
        };

        let compacted = compact_store(&store);
        assert!(compacted.data.get_by("Article", "draft").is_some());
        assert!(compacted.data.get_by("Country", "w").is_some());
        assert!(compacted.data.get_by("Article", "x").is_none());
    }

    #[test]
    fn test_rolled_back_delete_stub_survives() {
        let stub = ResourceIdentifier::new("Article", "7");
        let data = update_resource_state(&store().data, &stub, ResourceState::Deleted);
        let data = rollback_store_resources(&data);
        assert_eq!(data.get(&stub).unwrap().state, ResourceState::NotLoaded);

        let store = JsonApiStore {
            data,
            ..store()
        };
        let compacted = compact_store(&store);
        assert_eq!(compacted.data.get(&stub).unwrap().state, ResourceState::NotLoaded);
        assert!(compacted.data.get_by("Article", "z").is_none());
    }

    #[test]
    fn test_nothing_removed_keeps_identity() {
        let compacted = compact_store(&store());
        let again = compact_store(&compacted);
        assert!(again.ptr_eq(&compacted));
    }

    #[test]
    fn test_empty_store_drops_everything() {
        let store = JsonApiStore::with_data(store().data.as_ref().clone());
        let compacted = compact_store(&store);
        assert!(compacted.data.is_empty());
        assert_eq!(compacted.data.types().count(), 0);
    }
}
