//! Normalized store containers
//!
//! Every container is shared behind an `Arc`. Mutating functions build a new
//! top-level value that shares untouched branches and hand back the *same*
//! `Arc` when nothing changed, so `Arc::ptr_eq` doubles as a dirty check.

use crate::query::StoreQuery;
use crate::resource::{ResourceIdentifier, StoreResource};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Resources of one type, keyed by id
pub type StoreResources = BTreeMap<String, Arc<StoreResource>>;

/// Live queries keyed by query id
pub type StoreQueries = BTreeMap<String, Arc<StoreQuery>>;

/// The normalized resource graph: type -> id -> resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreData {
    types: BTreeMap<String, Arc<StoreResources>>,
}

impl StoreData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ResourceIdentifier) -> Option<&Arc<StoreResource>> {
        self.get_by(&id.resource_type, &id.id)
    }

    pub fn get_by(&self, resource_type: &str, id: &str) -> Option<&Arc<StoreResource>> {
        self.types.get(resource_type).and_then(|bucket| bucket.get(id))
    }

    pub fn contains(&self, id: &ResourceIdentifier) -> bool {
        self.get(id).is_some()
    }

    /// The bucket holding every resource of `resource_type`
    pub fn resources_of_type(&self, resource_type: &str) -> Option<&Arc<StoreResources>> {
        self.types.get(resource_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &String> {
        self.types.keys()
    }

    /// All resources, ordered by type then id
    pub fn iter(&self) -> impl Iterator<Item = &Arc<StoreResource>> {
        self.types.values().flat_map(|bucket| bucket.values())
    }

    pub fn len(&self) -> usize {
        self.types.values().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn buckets(&self) -> &BTreeMap<String, Arc<StoreResources>> {
        &self.types
    }

    pub(crate) fn with_bucket(&self, resource_type: &str, bucket: Arc<StoreResources>) -> Self {
        let mut types = self.types.clone();
        if bucket.is_empty() {
            types.remove(resource_type);
        } else {
            types.insert(resource_type.to_string(), bucket);
        }
        Self { types }
    }

    pub(crate) fn without_bucket(&self, resource_type: &str) -> Self {
        let mut types = self.types.clone();
        types.remove(resource_type);
        Self { types }
    }

    pub(crate) fn from_buckets(types: BTreeMap<String, Arc<StoreResources>>) -> Self {
        Self { types }
    }
}

impl FromIterator<StoreResource> for StoreData {
    fn from_iter<I: IntoIterator<Item = StoreResource>>(iter: I) -> Self {
        let mut types: BTreeMap<String, StoreResources> = BTreeMap::new();
        for resource in iter {
            types
                .entry(resource.resource_type().to_string())
                .or_default()
                .insert(resource.id().to_string(), Arc::new(resource));
        }
        Self {
            types: types.into_iter().map(|(t, b)| (t, Arc::new(b))).collect(),
        }
    }
}

/// Replace (or insert) a single resource, sharing everything else
pub(crate) fn put_resource(data: &Arc<StoreData>, resource: StoreResource) -> Arc<StoreData> {
    let resource_type = resource.resource_type().to_string();
    let mut bucket = data
        .resources_of_type(&resource_type)
        .map(|b| (**b).clone())
        .unwrap_or_default();
    bucket.insert(resource.id().to_string(), Arc::new(resource));
    Arc::new(data.with_bucket(&resource_type, Arc::new(bucket)))
}

/// Remove a single resource if present
pub(crate) fn remove_resource(data: &Arc<StoreData>, id: &ResourceIdentifier) -> Arc<StoreData> {
    let Some(bucket) = data.resources_of_type(&id.resource_type) else {
        return Arc::clone(data);
    };
    if !bucket.contains_key(&id.id) {
        return Arc::clone(data);
    }
    let mut bucket = (**bucket).clone();
    bucket.remove(&id.id);
    Arc::new(data.with_bucket(&id.resource_type, Arc::new(bucket)))
}

/// The complete store snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonApiStore {
    pub data: Arc<StoreData>,
    pub queries: Arc<StoreQueries>,
    pub is_creating: u32,
    pub is_reading: u32,
    pub is_updating: u32,
    pub is_deleting: u32,
    pub is_applying: u32,
}

impl JsonApiStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: StoreData) -> Self {
        Self {
            data: Arc::new(data),
            ..Default::default()
        }
    }

    /// Identity comparison: same branches and same counters
    pub fn ptr_eq(&self, other: &JsonApiStore) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
            && Arc::ptr_eq(&self.queries, &other.queries)
            && self.is_creating == other.is_creating
            && self.is_reading == other.is_reading
            && self.is_updating == other.is_updating
            && self.is_deleting == other.is_deleting
            && self.is_applying == other.is_applying
    }

    pub fn query(&self, query_id: &str) -> Option<&Arc<StoreQuery>> {
        self.queries.get(query_id)
    }

    /// True while any remote operation is in flight
    pub fn is_busy(&self) -> bool {
        self.is_creating + self.is_reading + self.is_updating + self.is_deleting + self.is_applying
            > 0
    }
}
