//! Store service: wires the reducer to a transport and exposes live queries

use crate::error::{ClientError, ClientResult};
use crate::transport::Transport;
use futures::Stream;
use jsonapi_store_core::{
    get_pending_changes, select_query_result, sort_pending_changes, DenormalisedGraph,
    ErrorModification, JsonApiStore, Query, QueryResult, Reducer, Resource, ResourceError,
    ResourceIdentifier, ResourceState, StoreAction, StoreConfig,
};
use std::sync::Arc;
use tokio::sync::watch;
use ulid::Ulid;

/// Serializes every action through the reducer and publishes snapshots
#[derive(Debug)]
struct Dispatcher {
    reducer: Reducer,
    state: watch::Sender<JsonApiStore>,
}

impl Dispatcher {
    fn dispatch(&self, action: StoreAction) -> JsonApiStore {
        self.state.send_if_modified(|store| {
            let next = self.reducer.reduce(store, &action);
            if next.ptr_eq(store) {
                return false;
            }
            *store = next;
            true
        });
        self.state.borrow().clone()
    }
}

/// Client-side JSON:API store bound to a transport
pub struct JsonApiService<T: Transport> {
    transport: Arc<T>,
    dispatcher: Arc<Dispatcher>,
}

impl<T: Transport> JsonApiService<T> {
    pub fn new(transport: T, config: StoreConfig) -> Self {
        Self::with_transport(Arc::new(transport), config)
    }

    pub fn with_transport(transport: Arc<T>, config: StoreConfig) -> Self {
        let (state, _) = watch::channel(JsonApiStore::new());
        Self {
            transport,
            dispatcher: Arc::new(Dispatcher {
                reducer: Reducer::new(config),
                state,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        self.dispatcher.reducer.config()
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Current snapshot
    pub fn store(&self) -> JsonApiStore {
        self.dispatcher.state.borrow().clone()
    }

    /// Apply an action and return the resulting snapshot
    pub fn dispatch(&self, action: StoreAction) -> JsonApiStore {
        self.dispatcher.dispatch(action)
    }

    fn handle(&self, query_id: String, expect_one: bool) -> QueryHandle {
        QueryHandle {
            query_id,
            expect_one,
            receiver: self.dispatcher.state.subscribe(),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a query and return a live handle on its result
    ///
    /// Remote queries are fetched before this returns; fetch failures are
    /// recorded on the query rather than returned. Queries without an id get
    /// a generated one.
    pub async fn put_query(&self, mut query: Query, from_server: bool, expect_one: bool) -> ClientResult<QueryHandle> {
        query.validate()?;
        let query_id = query
            .query_id
            .get_or_insert_with(|| Ulid::new().to_string())
            .clone();

        if from_server {
            self.fetch(query).await;
        } else {
            self.dispatch(StoreAction::LocalQueryInit { query });
        }
        Ok(self.handle(query_id, expect_one))
    }

    /// Live handle on a query expected to yield at most one resource
    pub async fn find_one(&self, query: Query, from_server: bool) -> ClientResult<QueryHandle> {
        self.put_query(query, from_server, true).await
    }

    pub async fn find_many(&self, query: Query, from_server: bool) -> ClientResult<QueryHandle> {
        self.put_query(query, from_server, false).await
    }

    async fn fetch(&self, query: Query) {
        self.dispatch(StoreAction::ApiGetInit { query: query.clone() });
        let action = match self.transport.find(&query).await {
            Ok(document) => StoreAction::ApiGetSuccess { query, document },
            Err(e) => {
                tracing::warn!("Query {:?} failed: {}", query.query_id, e);
                StoreAction::ApiGetFail {
                    document: e.to_document(),
                    query,
                }
            }
        };
        self.dispatch(action);
    }

    /// Drop cached results of a query and fetch it again
    pub async fn refresh(&self, query_id: &str) -> ClientResult<()> {
        let store_query = self
            .store()
            .query(query_id)
            .cloned()
            .ok_or_else(|| jsonapi_store_core::Error::QueryNotFound(query_id.to_string()))?;

        self.dispatch(StoreAction::ApiQueryRefresh {
            query_id: query_id.to_string(),
        });
        if store_query.source == jsonapi_store_core::QuerySource::Remote {
            self.fetch(store_query.query.clone()).await;
        }
        Ok(())
    }

    pub fn remove_query(&self, query_id: &str) {
        self.dispatch(StoreAction::RemoveQuery {
            query_id: query_id.to_string(),
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Resource Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a never-persisted resource, generating an id when it has none
    pub fn new_resource(&self, mut resource: Resource) -> ResourceIdentifier {
        if resource.id.is_empty() {
            resource.id = ResourceIdentifier::generate(resource.resource_type.clone()).id;
        }
        let id = resource.identifier();
        self.dispatch(StoreAction::NewStoreResource { resource });
        id
    }

    /// Create a resource locally, or remotely with `to_server`
    pub async fn post_resource(&self, resource: Resource, to_server: bool) -> ClientResult<()> {
        if !to_server {
            self.dispatch(StoreAction::PostStoreResource { resource });
            return Ok(());
        }
        let id = resource.identifier();
        self.dispatch(StoreAction::ApiPostInit {
            resource: resource.clone(),
        });
        match self.transport.create(&resource).await {
            Ok(document) => {
                self.dispatch(StoreAction::ApiPostSuccess { id, document });
                Ok(())
            }
            Err(e) => {
                self.dispatch(StoreAction::ApiPostFail {
                    id,
                    document: e.to_document(),
                });
                Err(e.into())
            }
        }
    }

    /// Patch a resource locally, or remotely with `to_server`
    pub async fn patch_resource(&self, resource: Resource, to_server: bool) -> ClientResult<()> {
        if !to_server {
            self.dispatch(StoreAction::PatchStoreResource { resource });
            return Ok(());
        }
        let id = resource.identifier();
        self.dispatch(StoreAction::ApiPatchInit {
            resource: resource.clone(),
        });
        match self.transport.update(&resource).await {
            Ok(document) => {
                self.dispatch(StoreAction::ApiPatchSuccess { id, document });
                Ok(())
            }
            Err(e) => {
                self.dispatch(StoreAction::ApiPatchFail {
                    id,
                    document: e.to_document(),
                });
                Err(e.into())
            }
        }
    }

    /// Mark a resource deleted locally, or delete it remotely with `to_server`
    pub async fn delete_resource(&self, id: ResourceIdentifier, to_server: bool) -> ClientResult<()> {
        if !to_server {
            self.dispatch(StoreAction::DeleteStoreResource { id });
            return Ok(());
        }
        self.dispatch(StoreAction::ApiDeleteInit { id: id.clone() });
        match self.transport.delete(&id).await {
            Ok(_) => {
                self.dispatch(StoreAction::ApiDeleteSuccess { id });
                Ok(())
            }
            Err(e) => {
                self.dispatch(StoreAction::ApiDeleteFail {
                    id,
                    document: e.to_document(),
                });
                Err(e.into())
            }
        }
    }

    pub fn modify_resource_errors(
        &self,
        id: ResourceIdentifier,
        errors: Vec<ResourceError>,
        modification: ErrorModification,
    ) {
        self.dispatch(StoreAction::ModifyStoreResourceErrors {
            id,
            errors,
            modification,
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Store Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Commit every pending change, referenced new resources first
    ///
    /// Changes are sent one at a time; the first failure stops the commit and
    /// is returned, leaving the remaining changes pending.
    pub async fn apply(&self) -> ClientResult<()> {
        if !self.config().apply_enabled {
            return Err(ClientError::ApplyDisabled);
        }

        let store = self.dispatch(StoreAction::ApiApplyInit);
        let pending = get_pending_changes(&store.data, None, &[], true);
        let ordered = sort_pending_changes(&pending);
        tracing::debug!("Applying {} pending changes", ordered.len());

        for change in ordered {
            let resource = change.resource.clone();
            let result = match change.state {
                ResourceState::Created => self.post_resource(resource, true).await,
                ResourceState::Updated => self.patch_resource(resource, true).await,
                ResourceState::Deleted => self.delete_resource(change.identifier(), true).await,
                ResourceState::InSync | ResourceState::NotLoaded => Ok(()),
            };
            if let Err(e) = result {
                tracing::warn!("Apply stopped at {}: {}", change.identifier(), e);
                self.dispatch(StoreAction::ApiApplyFail);
                return Err(e);
            }
        }

        self.dispatch(StoreAction::ApiApplySuccess);
        Ok(())
    }

    /// Discard every local edit
    pub fn rollback(&self) {
        self.dispatch(StoreAction::ApiRollback);
    }

    /// Drop resources no live query or pending change can reach
    pub fn compact(&self) {
        self.dispatch(StoreAction::CompactStore);
    }

    pub fn clear(&self) {
        self.dispatch(StoreAction::ClearStore);
    }
}

type QueryItem = jsonapi_store_core::Result<Option<QueryResult>>;

fn query_item(store: &JsonApiStore, query_id: &str, expect_one: bool) -> QueryItem {
    let result = select_query_result(store, query_id);
    if expect_one {
        if let Some(result) = &result {
            result.one()?;
        }
    }
    Ok(result)
}

/// Live view on one registered query
pub struct QueryHandle {
    query_id: String,
    expect_one: bool,
    receiver: watch::Receiver<JsonApiStore>,
    dispatcher: Arc<Dispatcher>,
}

impl QueryHandle {
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// Result in the latest snapshot, `None` once the query is removed
    ///
    /// A handle from `find_one` fails when the query matches several resources.
    pub fn result(&self) -> QueryItem {
        query_item(&self.receiver.borrow(), &self.query_id, self.expect_one)
    }

    /// The latest result denormalised against the latest snapshot
    pub fn denormalised(&self) -> Option<DenormalisedGraph> {
        jsonapi_store_core::selectors::select_denormalised_query_result(&self.receiver.borrow(), &self.query_id)
    }

    /// Wait for the next snapshot
    pub async fn changed(&mut self) -> ClientResult<()> {
        self.receiver.changed().await.map_err(|_| ClientError::Closed)
    }

    /// Results of the current snapshot and then of every following one
    ///
    /// Contract violations are yielded as items. The stream ends once the
    /// query has been removed.
    pub fn stream(&self) -> impl Stream<Item = QueryItem> + Send + 'static {
        let mut receiver = self.receiver.clone();
        receiver.mark_changed();
        let query_id = self.query_id.clone();
        let expect_one = self.expect_one;

        futures::stream::unfold(receiver, move |mut receiver| {
            let query_id = query_id.clone();
            async move {
                receiver.changed().await.ok()?;
                let item = {
                    let store = receiver.borrow_and_update();
                    store.query(&query_id)?;
                    query_item(&store, &query_id, expect_one)
                };
                Some((item, receiver))
            }
        })
    }

    /// Remove the query from the store
    pub fn unsubscribe(self) {
        self.dispatcher.dispatch(StoreAction::RemoveQuery {
            query_id: self.query_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::memory::MemoryTransport;
    use futures::StreamExt;
    use jsonapi_store_core::{FilteringParam, OperationType, Relationship, ResourceDefinition};
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn article(id: &str, title: &str) -> Resource {
        Resource::new("Article", id).with_attribute("title", title)
    }

    fn config() -> StoreConfig {
        StoreConfig::new(vec![
            ResourceDefinition::new("Article", "articles")
                .with_attribute("title")
                .with_relationship("author", jsonapi_store_core::RelationDefinition::has_one("Person")),
            ResourceDefinition::new("Person", "people").with_attribute("name"),
        ])
    }

    fn service() -> JsonApiService<MemoryTransport> {
        init_tracing();
        let transport = MemoryTransport::with_resources(vec![article("1", "Article 1"), article("2", "Article 2")]);
        JsonApiService::new(transport, config())
    }

    fn ids(result: &QueryResult) -> Vec<&str> {
        result.resources.as_ref().map(|r| r.iter().map(|r| r.id()).collect()).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_remote_then_local_filtering() {
        let service = service();
        let all = service
            .find_many(Query::collection("Article").with_query_id("all"), true)
            .await
            .unwrap();
        assert_eq!(ids(&all.result().unwrap().unwrap()), vec!["1", "2"]);

        let filtered = service
            .find_many(
                Query::collection("Article").with_filter(FilteringParam::new("title", "article 2")),
                false,
            )
            .await
            .unwrap();
        assert_eq!(ids(&filtered.result().unwrap().unwrap()), vec!["2"]);
        assert_eq!(service.store().is_reading, 0);
    }

    #[tokio::test]
    async fn test_find_one_uniqueness() {
        let service = service();
        service.find_many(Query::collection("Article"), true).await.unwrap();

        let handle = service
            .find_one(Query::collection("Article").with_query_id("unique"), false)
            .await
            .unwrap();
        let err = handle.result().unwrap_err();
        assert_eq!(err.to_string(), "expected single result for query unique");

        let single = service.find_one(Query::single("Article", "1"), true).await.unwrap();
        let result = single.result().unwrap().unwrap();
        assert_eq!(result.one().unwrap().unwrap().id(), "1");
    }

    #[tokio::test]
    async fn test_missing_resource_records_errors() {
        let service = service();
        let handle = service.find_one(Query::single("Article", "9"), true).await.unwrap();
        let result = handle.result().unwrap().unwrap();
        assert!(!result.loading);
        assert_eq!(result.errors[0].status.as_deref(), Some("404"));
        assert!(result.resources.is_none());
    }

    #[tokio::test]
    async fn test_apply_orders_new_referents_first() {
        let service = service();
        service.find_many(Query::collection("Article"), true).await.unwrap();

        let author = service.new_resource(Resource::new("Person", "").with_attribute("name", "Ada"));
        service
            .patch_resource(
                Resource::new("Article", "1").with_relationship("author", Relationship::to_one(author.clone())),
                false,
            )
            .await
            .unwrap();
        service
            .delete_resource(ResourceIdentifier::new("Article", "2"), false)
            .await
            .unwrap();

        service.apply().await.unwrap();

        let writes: Vec<_> = service
            .transport()
            .operations()
            .into_iter()
            .filter(|(op, _)| *op != OperationType::Get)
            .collect();
        assert_eq!(
            writes,
            vec![
                (OperationType::Delete, ResourceIdentifier::new("Article", "2")),
                (OperationType::Post, author.clone()),
                (OperationType::Patch, ResourceIdentifier::new("Article", "1")),
            ]
        );

        let store = service.store();
        assert!(get_pending_changes(&store.data, None, &[], true).is_empty());
        assert!(!store.is_busy());
        assert!(store.data.get_by("Article", "2").is_none());
        assert_eq!(
            service.transport().resource(&ResourceIdentifier::new("Article", "1")).unwrap().relationship("author"),
            Some(&Relationship::to_one(author))
        );
    }

    #[tokio::test]
    async fn test_apply_failure_keeps_changes_pending() {
        let service = service();
        service
            .delete_resource(ResourceIdentifier::new("Article", "404"), false)
            .await
            .unwrap();
        let stub = service.store().data.get_by("Article", "404").cloned().unwrap();
        assert_eq!(stub.state, ResourceState::Deleted);

        let err = service.apply().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(TransportError { status: 404, .. })));

        let store = service.store();
        let stub = store.data.get_by("Article", "404").unwrap();
        assert_eq!(stub.state, ResourceState::Deleted);
        assert_eq!(stub.errors.len(), 1);
        assert_eq!(store.is_applying, 0);

        service.rollback();
        assert_eq!(
            service.store().data.get_by("Article", "404").unwrap().state,
            ResourceState::NotLoaded
        );
    }

    #[tokio::test]
    async fn test_apply_disabled() {
        let mut config = config();
        config.apply_enabled = false;
        let service = JsonApiService::new(MemoryTransport::new(), config);
        assert!(matches!(service.apply().await, Err(ClientError::ApplyDisabled)));
    }

    #[tokio::test]
    async fn test_stream_follows_changes_until_unsubscribe() {
        let service = service();
        let handle = service
            .find_many(
                Query::collection("Article")
                    .with_query_id("titled")
                    .with_filter(FilteringParam::new("title", "renamed")),
                false,
            )
            .await
            .unwrap();
        let mut stream = Box::pin(handle.stream());

        let first = stream.next().await.unwrap().unwrap().unwrap();
        assert!(ids(&first).is_empty());

        service.post_resource(article("3", "Renamed"), false).await.unwrap();
        let second = stream.next().await.unwrap().unwrap().unwrap();
        assert_eq!(ids(&second), vec!["3"]);

        handle.unsubscribe();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_changed_and_refresh() {
        let service = service();
        let mut handle = service
            .find_many(Query::collection("Article").with_query_id("all"), true)
            .await
            .unwrap();

        service.patch_resource(article("1", "Edited"), false).await.unwrap();
        handle.changed().await.unwrap();
        let denormalised = handle.denormalised().unwrap();
        assert_eq!(
            denormalised.node(denormalised.roots()[0]).attribute("title").unwrap(),
            "Edited"
        );

        service.refresh("all").await.unwrap();
        assert_eq!(ids(&handle.result().unwrap().unwrap()).len(), 2);
        assert!(matches!(
            service.refresh("nope").await,
            Err(ClientError::Store(jsonapi_store_core::Error::QueryNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_compact_and_clear() {
        let service = service();
        let handle = service
            .find_many(Query::collection("Article").with_query_id("all"), true)
            .await
            .unwrap();
        service.find_one(Query::single("Article", "1"), true).await.unwrap();

        handle.unsubscribe();
        service.compact();
        let store = service.store();
        assert_eq!(store.data.len(), 1);

        service.clear();
        assert!(service.store().data.is_empty());
    }
}
