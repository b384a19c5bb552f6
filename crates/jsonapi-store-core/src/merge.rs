//! Merge engine: insert, patch, delete and roll back resources in the graph
//!
//! All functions are total. Missing resources leave the input untouched and
//! an unchanged result is returned as the same `Arc`.

use crate::query::Query;
use crate::resource::{
    Document, OperationType, PrimaryData, Relationship, Resource, ResourceError,
    ResourceIdentifier, ResourceState, StoreResource,
};
use crate::store::{put_resource, remove_resource, StoreData, StoreResources};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// How new errors combine with a resource's existing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorModification {
    Add,
    Set,
    Remove,
}

/// Deep-merge `source` into `target`; objects merge key-wise, anything else replaces
fn merge_value(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => merge_object(target, source),
        (target, source) => *target = source.clone(),
    }
}

fn merge_object(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match target.get_mut(key) {
            Some(existing) => merge_value(existing, value),
            None => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn merge_optional(target: &mut Option<Value>, source: &Option<Value>) {
    if let Some(source) = source {
        match target {
            Some(existing) => merge_value(existing, source),
            None => *target = Some(source.clone()),
        }
    }
}

fn merge_relationship(target: &mut Relationship, source: &Relationship) {
    // linkage is replaced as a whole, never appended to
    if let Some(data) = &source.data {
        target.data = Some(data.clone());
    }
    merge_optional(&mut target.links, &source.links);
    merge_optional(&mut target.meta, &source.meta);
}

/// Apply a local patch on top of `base`
///
/// Attributes, meta and links are deep-merged with arrays replaced;
/// relationships are merged per name with their linkage replaced.
pub fn merge_resource(base: &Resource, patch: &Resource) -> Resource {
    let mut merged = base.clone();

    if let Some(attributes) = &patch.attributes {
        merge_object(merged.attributes.get_or_insert_with(Map::new), attributes);
    }
    if let Some(relationships) = &patch.relationships {
        let target = merged.relationships.get_or_insert_with(BTreeMap::new);
        for (name, relationship) in relationships {
            merge_relationship(target.entry(name.clone()).or_default(), relationship);
        }
    }
    merge_optional(&mut merged.meta, &patch.meta);
    merge_optional(&mut merged.links, &patch.links);

    merged
}

fn with_resource(resources: &Arc<StoreResources>, resource: StoreResource) -> Arc<StoreResources> {
    if let Some(existing) = resources.get(resource.id()) {
        if **existing == resource {
            return Arc::clone(resources);
        }
    }
    let mut next = (**resources).clone();
    next.insert(resource.id().to_string(), Arc::new(resource));
    Arc::new(next)
}

/// Insert `resource` into a type bucket, replacing any existing entry
///
/// Server resources arrive `IN_SYNC`; local ones as `CREATED`.
pub fn insert_store_resource(
    resources: &Arc<StoreResources>,
    resource: &Resource,
    from_server: bool,
) -> Arc<StoreResources> {
    let stored = if from_server {
        StoreResource::from_server(resource.clone())
    } else {
        StoreResource::local(resource.clone())
    };
    with_resource(resources, stored)
}

/// Update an existing entry of a type bucket
///
/// A server resource replaces the entry wholesale. A local patch is merged
/// and the state derived from the persisted snapshot: equal content collapses
/// back to `IN_SYNC`. The in-flight marker and attached errors are kept.
pub fn update_store_resource(
    resources: &Arc<StoreResources>,
    resource: &Resource,
    from_server: bool,
) -> Arc<StoreResources> {
    let Some(found) = resources.get(&resource.id) else {
        return insert_store_resource(resources, resource, from_server);
    };

    if from_server {
        return with_resource(resources, StoreResource::from_server(resource.clone()));
    }

    let merged = merge_resource(&found.resource, resource);
    let persisted = found.persisted_resource.clone();
    let (content, state) = match &persisted {
        Some(p) if merged.same_content(p) => (p.clone(), ResourceState::InSync),
        Some(_) => (merged, ResourceState::Updated),
        None => (merged, ResourceState::Created),
    };

    with_resource(
        resources,
        StoreResource {
            resource: content,
            state,
            persisted_resource: persisted,
            loading: found.loading,
            errors: found.errors.clone(),
        },
    )
}

/// Insert or merge a single resource into the graph
///
/// With `override_existing` the resource is inserted even if present,
/// discarding local state.
pub fn upsert_resource(
    data: &Arc<StoreData>,
    resource: &Resource,
    from_server: bool,
    override_existing: bool,
) -> Arc<StoreData> {
    let empty = Arc::new(StoreResources::new());
    let bucket = data.resources_of_type(&resource.resource_type).unwrap_or(&empty);

    let updated = if override_existing || !bucket.contains_key(&resource.id) {
        insert_store_resource(bucket, resource, from_server)
    } else {
        update_store_resource(bucket, resource, from_server)
    };

    if Arc::ptr_eq(&updated, bucket) {
        return Arc::clone(data);
    }
    Arc::new(data.with_bucket(&resource.resource_type, updated))
}

/// Apply the primary data and every included resource of a server document
pub fn update_store_data_from_payload(data: &Arc<StoreData>, document: &Document) -> Arc<StoreData> {
    let Some(primary) = &document.data else {
        return Arc::clone(data);
    };

    let included = document.included.iter().flatten();
    let mut next = Arc::clone(data);
    for resource in primary.resources().iter().chain(included) {
        next = upsert_resource(&next, resource, true, true);
    }
    next
}

/// Set the lifecycle state of a resource
///
/// Marking an absent resource `DELETED` inserts an identifier-only stub so
/// the deletion can still be committed.
pub fn update_resource_state(
    data: &Arc<StoreData>,
    id: &ResourceIdentifier,
    state: ResourceState,
) -> Arc<StoreData> {
    match data.get(id) {
        None if state == ResourceState::Deleted => {
            let stub = Resource::from_identifier(id);
            put_resource(
                data,
                StoreResource {
                    resource: stub.clone(),
                    state,
                    persisted_resource: Some(stub),
                    loading: None,
                    errors: Vec::new(),
                },
            )
        }
        None => Arc::clone(data),
        Some(existing) if existing.state == state => Arc::clone(data),
        Some(existing) => {
            let mut updated = (**existing).clone();
            updated.state = state;
            put_resource(data, updated)
        }
    }
}

/// Set or clear the in-flight marker of a resource
pub fn update_resource_loading(
    data: &Arc<StoreData>,
    id: &ResourceIdentifier,
    loading: Option<OperationType>,
) -> Arc<StoreData> {
    match data.get(id) {
        Some(existing) if existing.loading != loading => {
            let mut updated = (**existing).clone();
            updated.loading = loading;
            put_resource(data, updated)
        }
        _ => Arc::clone(data),
    }
}

/// Remove one resource (`type` + `id`) or a whole type (`type` only)
pub fn delete_store_resources(data: &Arc<StoreData>, query: &Query) -> Arc<StoreData> {
    let Some(resource_type) = query.resource_type.as_deref() else {
        return Arc::clone(data);
    };
    match &query.id {
        Some(id) => remove_resource(data, &ResourceIdentifier::new(resource_type, id.clone())),
        None if data.resources_of_type(resource_type).is_some() => {
            Arc::new(data.without_bucket(resource_type))
        }
        None => Arc::clone(data),
    }
}

/// Discard every local edit
///
/// Resources without a persisted snapshot are removed; pending ones revert to
/// their snapshot. Reverted identifier-only delete stubs become `NOT_LOADED`.
pub fn rollback_store_resources(data: &Arc<StoreData>) -> Arc<StoreData> {
    let mut changed = false;
    let mut types = BTreeMap::new();

    for (resource_type, bucket) in data.buckets() {
        let mut bucket_changed = false;
        let mut next = StoreResources::new();

        for (id, stored) in bucket.iter() {
            let Some(persisted) = &stored.persisted_resource else {
                bucket_changed = true;
                continue;
            };
            if !stored.is_pending() {
                next.insert(id.clone(), Arc::clone(stored));
                continue;
            }
            let state = if persisted.is_identifier_only() {
                ResourceState::NotLoaded
            } else {
                ResourceState::InSync
            };
            bucket_changed = true;
            next.insert(
                id.clone(),
                Arc::new(StoreResource {
                    resource: persisted.clone(),
                    state,
                    persisted_resource: Some(persisted.clone()),
                    loading: None,
                    errors: Vec::new(),
                }),
            );
        }

        if bucket_changed {
            changed = true;
            if !next.is_empty() {
                types.insert(resource_type.clone(), Arc::new(next));
            }
        } else {
            types.insert(resource_type.clone(), Arc::clone(bucket));
        }
    }

    if !changed {
        return Arc::clone(data);
    }
    Arc::new(StoreData::from_buckets(types))
}

/// Add, set or remove errors on a resource
///
/// `Remove` drops every existing error equal to one of `errors`.
pub fn update_resource_errors(
    data: &Arc<StoreData>,
    id: &ResourceIdentifier,
    errors: &[ResourceError],
    modification: ErrorModification,
) -> Arc<StoreData> {
    let Some(existing) = data.get(id) else {
        return Arc::clone(data);
    };

    let new_errors: Vec<ResourceError> = match modification {
        ErrorModification::Set => errors.to_vec(),
        ErrorModification::Add => existing.errors.iter().chain(errors).cloned().collect(),
        ErrorModification::Remove => existing
            .errors
            .iter()
            .filter(|e| !errors.contains(e))
            .cloned()
            .collect(),
    };
    if new_errors == existing.errors {
        return Arc::clone(data);
    }

    let mut updated = (**existing).clone();
    updated.errors = new_errors;
    put_resource(data, updated)
}

/// Set the errors of a failed single-resource operation on its resource
pub fn update_resource_errors_for_query(
    data: &Arc<StoreData>,
    query: &Query,
    document: &Document,
) -> Arc<StoreData> {
    let Some(id) = query.identifier() else {
        tracing::warn!("Resource errors need a single-resource query, got {:?}", query);
        return Arc::clone(data);
    };
    if matches!(document.data, Some(PrimaryData::Many(_))) {
        tracing::warn!("Resource errors for {} carried a collection document", id);
        return Arc::clone(data);
    }
    update_resource_errors(data, &id, document.errors(), ErrorModification::Set)
}
