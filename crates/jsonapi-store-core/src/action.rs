//! Store events consumed by the [`Reducer`](crate::reducer::Reducer)

use crate::merge::ErrorModification;
use crate::query::Query;
use crate::resource::{Document, Resource, ResourceError, ResourceIdentifier};

/// Action labels, as they appear in logs
pub mod labels {
    pub const API_POST_INIT: &str = "[jsonapi] API_POST_INIT";
    pub const API_POST_SUCCESS: &str = "[jsonapi] API_POST_SUCCESS";
    pub const API_POST_FAIL: &str = "[jsonapi] API_POST_FAIL";
    pub const API_GET_INIT: &str = "[jsonapi] API_GET_INIT";
    pub const API_GET_SUCCESS: &str = "[jsonapi] API_GET_SUCCESS";
    pub const API_GET_FAIL: &str = "[jsonapi] API_GET_FAIL";
    pub const API_PATCH_INIT: &str = "[jsonapi] API_PATCH_INIT";
    pub const API_PATCH_SUCCESS: &str = "[jsonapi] API_PATCH_SUCCESS";
    pub const API_PATCH_FAIL: &str = "[jsonapi] API_PATCH_FAIL";
    pub const API_DELETE_INIT: &str = "[jsonapi] API_DELETE_INIT";
    pub const API_DELETE_SUCCESS: &str = "[jsonapi] API_DELETE_SUCCESS";
    pub const API_DELETE_FAIL: &str = "[jsonapi] API_DELETE_FAIL";
    pub const API_APPLY_INIT: &str = "[jsonapi] API_APPLY_INIT";
    pub const API_APPLY_SUCCESS: &str = "[jsonapi] API_APPLY_SUCCESS";
    pub const API_APPLY_FAIL: &str = "[jsonapi] API_APPLY_FAIL";
    pub const API_ROLLBACK: &str = "[jsonapi] API_ROLLBACK";
    pub const API_QUERY_REFRESH: &str = "[jsonapi] API_QUERY_REFRESH";
    pub const LOCAL_QUERY_INIT: &str = "[jsonapi] LOCAL_QUERY_INIT";
    pub const LOCAL_QUERY_SUCCESS: &str = "[jsonapi] LOCAL_QUERY_SUCCESS";
    pub const LOCAL_QUERY_FAIL: &str = "[jsonapi] LOCAL_QUERY_FAIL";
    pub const NEW_STORE_RESOURCE: &str = "[jsonapi] NEW_STORE_RESOURCE";
    pub const POST_STORE_RESOURCE: &str = "[jsonapi] POST_STORE_RESOURCE";
    pub const PATCH_STORE_RESOURCE: &str = "[jsonapi] PATCH_STORE_RESOURCE";
    pub const DELETE_STORE_RESOURCE: &str = "[jsonapi] DELETE_STORE_RESOURCE";
    pub const MODIFY_STORE_RESOURCE_ERRORS: &str = "[jsonapi] MODIFY_STORE_RESOURCE_ERRORS";
    pub const REMOVE_QUERY: &str = "[jsonapi] REMOVE_QUERY";
    pub const COMPACT_STORE: &str = "[jsonapi] COMPACT_STORE";
    pub const CLEAR_STORE: &str = "[jsonapi] CLEAR_STORE";

    pub(super) const ALL: [&str; 28] = [
        API_POST_INIT,
        API_POST_SUCCESS,
        API_POST_FAIL,
        API_GET_INIT,
        API_GET_SUCCESS,
        API_GET_FAIL,
        API_PATCH_INIT,
        API_PATCH_SUCCESS,
        API_PATCH_FAIL,
        API_DELETE_INIT,
        API_DELETE_SUCCESS,
        API_DELETE_FAIL,
        API_APPLY_INIT,
        API_APPLY_SUCCESS,
        API_APPLY_FAIL,
        API_ROLLBACK,
        API_QUERY_REFRESH,
        LOCAL_QUERY_INIT,
        LOCAL_QUERY_SUCCESS,
        LOCAL_QUERY_FAIL,
        NEW_STORE_RESOURCE,
        POST_STORE_RESOURCE,
        PATCH_STORE_RESOURCE,
        DELETE_STORE_RESOURCE,
        MODIFY_STORE_RESOURCE_ERRORS,
        REMOVE_QUERY,
        COMPACT_STORE,
        CLEAR_STORE,
    ];
}

const fn str_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

const fn all_distinct(labels: &[&str]) -> bool {
    let mut i = 0;
    while i < labels.len() {
        let mut j = i + 1;
        while j < labels.len() {
            if str_eq(labels[i], labels[j]) {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const _: () = assert!(all_distinct(&labels::ALL), "action labels must be unique");

/// Every event the store reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum StoreAction {
    /// A resource is about to be created remotely
    ApiPostInit { resource: Resource },
    ApiPostSuccess { id: ResourceIdentifier, document: Document },
    ApiPostFail { id: ResourceIdentifier, document: Document },

    /// A remote read for `query` started
    ApiGetInit { query: Query },
    /// Response to `query`; ignored when the query was replaced or removed
    ApiGetSuccess { query: Query, document: Document },
    ApiGetFail { query: Query, document: Document },

    ApiPatchInit { resource: Resource },
    ApiPatchSuccess { id: ResourceIdentifier, document: Document },
    ApiPatchFail { id: ResourceIdentifier, document: Document },

    ApiDeleteInit { id: ResourceIdentifier },
    ApiDeleteSuccess { id: ResourceIdentifier },
    ApiDeleteFail { id: ResourceIdentifier, document: Document },

    ApiApplyInit,
    ApiApplySuccess,
    ApiApplyFail,

    /// Discard all local edits
    ApiRollback,
    /// Forget cached results ahead of a refetch
    ApiQueryRefresh { query_id: String },

    /// Register a query evaluated against the store
    LocalQueryInit { query: Query },
    LocalQuerySuccess { query: Query, result_ids: Vec<ResourceIdentifier> },
    LocalQueryFail { query: Query, errors: Vec<ResourceError> },

    /// Insert a fresh, never-persisted resource
    NewStoreResource { resource: Resource },
    /// Insert or merge a local resource
    PostStoreResource { resource: Resource },
    /// Merge a local patch into a resource
    PatchStoreResource { resource: Resource },
    /// Mark a resource for deletion
    DeleteStoreResource { id: ResourceIdentifier },
    ModifyStoreResourceErrors {
        id: ResourceIdentifier,
        errors: Vec<ResourceError>,
        modification: ErrorModification,
    },

    RemoveQuery { query_id: String },
    CompactStore,
    ClearStore,
}

impl StoreAction {
    pub fn label(&self) -> &'static str {
        use self::labels::*;
        match self {
            StoreAction::ApiPostInit { .. } => API_POST_INIT,
            StoreAction::ApiPostSuccess { .. } => API_POST_SUCCESS,
            StoreAction::ApiPostFail { .. } => API_POST_FAIL,
            StoreAction::ApiGetInit { .. } => API_GET_INIT,
            StoreAction::ApiGetSuccess { .. } => API_GET_SUCCESS,
            StoreAction::ApiGetFail { .. } => API_GET_FAIL,
            StoreAction::ApiPatchInit { .. } => API_PATCH_INIT,
            StoreAction::ApiPatchSuccess { .. } => API_PATCH_SUCCESS,
            StoreAction::ApiPatchFail { .. } => API_PATCH_FAIL,
            StoreAction::ApiDeleteInit { .. } => API_DELETE_INIT,
            StoreAction::ApiDeleteSuccess { .. } => API_DELETE_SUCCESS,
            StoreAction::ApiDeleteFail { .. } => API_DELETE_FAIL,
            StoreAction::ApiApplyInit => API_APPLY_INIT,
            StoreAction::ApiApplySuccess => API_APPLY_SUCCESS,
            StoreAction::ApiApplyFail => API_APPLY_FAIL,
            StoreAction::ApiRollback => API_ROLLBACK,
            StoreAction::ApiQueryRefresh { .. } => API_QUERY_REFRESH,
            StoreAction::LocalQueryInit { .. } => LOCAL_QUERY_INIT,
            StoreAction::LocalQuerySuccess { .. } => LOCAL_QUERY_SUCCESS,
            StoreAction::LocalQueryFail { .. } => LOCAL_QUERY_FAIL,
            StoreAction::NewStoreResource { .. } => NEW_STORE_RESOURCE,
            StoreAction::PostStoreResource { .. } => POST_STORE_RESOURCE,
            StoreAction::PatchStoreResource { .. } => PATCH_STORE_RESOURCE,
            StoreAction::DeleteStoreResource { .. } => DELETE_STORE_RESOURCE,
            StoreAction::ModifyStoreResourceErrors { .. } => MODIFY_STORE_RESOURCE_ERRORS,
            StoreAction::RemoveQuery { .. } => REMOVE_QUERY,
            StoreAction::CompactStore => COMPACT_STORE,
            StoreAction::ClearStore => CLEAR_STORE,
        }
    }
}

impl std::fmt::Display for StoreAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert!(all_distinct(&labels::ALL));
        assert!(!all_distinct(&["[jsonapi] A", "[jsonapi] B", "[jsonapi] A"]));
        assert_eq!(StoreAction::CompactStore.to_string(), "[jsonapi] COMPACT_STORE");
        assert_eq!(
            StoreAction::RemoveQuery { query_id: "q1".into() }.label(),
            labels::REMOVE_QUERY
        );
    }
}
