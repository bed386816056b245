//! Local fallback for failed operations
//!
//! When the remote backend cannot serve a call, the handler registered for
//! the call's [`OperationKind`] performs it against local storage, making up
//! the identifiers and timestamps the remote would have assigned. Writes are
//! queued for replay so the remote catches up later.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clientkey_common::CommonError;
use clientkey_domain::constants::{ACTIVITIES_RESOURCE, CLIENTS_RESOURCE};
use clientkey_domain::{DataRequest, OperationKind, Query, ReplayOperation};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::error::{DataAccessError, DataAccessResult};
use crate::local::LocalTables;
use crate::records::{find_by_term, newest_activities};
use crate::replay::ReplayQueue;

/// What a fallback handler produced
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackOutcome {
    /// Returned to the caller as if the remote had answered
    pub data: Value,
    /// The write to re-apply remotely, if any
    pub replay: Option<Query>,
}

impl FallbackOutcome {
    pub fn read(data: Value) -> Self {
        Self { data, replay: None }
    }

    pub fn write(data: Value, replay: Query) -> Self {
        Self { data, replay: Some(replay) }
    }
}

/// Serves one kind of operation from local storage
pub trait FallbackHandler: Send + Sync {
    fn handle(
        &self,
        request: &DataRequest,
        tables: &LocalTables,
        now: DateTime<Utc>,
    ) -> DataAccessResult<FallbackOutcome>;
}

fn mismatch(expected: OperationKind, request: &DataRequest) -> DataAccessError {
    CommonError::internal_with_context(
        format!("handler for {expected} received {}", request.kind()),
        "fallback",
    )
    .into()
}

struct GetClientsFallback;

impl FallbackHandler for GetClientsFallback {
    fn handle(&self, _: &DataRequest, tables: &LocalTables, _: DateTime<Utc>) -> DataAccessResult<FallbackOutcome> {
        let clients = tables.load(CLIENTS_RESOURCE)?;
        Ok(FallbackOutcome::read(Value::Array(clients.into_iter().map(Value::Object).collect())))
    }
}

struct AddClientFallback;

impl FallbackHandler for AddClientFallback {
    fn handle(&self, request: &DataRequest, tables: &LocalTables, now: DateTime<Utc>) -> DataAccessResult<FallbackOutcome> {
        let DataRequest::AddClient(record) = request else {
            return Err(mismatch(OperationKind::AddClient, request));
        };
        let stored = tables.insert(CLIENTS_RESOURCE, record.clone(), now)?;
        let replay = Query::insert(CLIENTS_RESOURCE, stored.clone());
        Ok(FallbackOutcome::write(Value::Object(stored), replay))
    }
}

struct UpdateClientFallback;

impl FallbackHandler for UpdateClientFallback {
    fn handle(&self, request: &DataRequest, tables: &LocalTables, now: DateTime<Utc>) -> DataAccessResult<FallbackOutcome> {
        let DataRequest::UpdateClient { id, changes } = request else {
            return Err(mismatch(OperationKind::UpdateClient, request));
        };
        let stored = tables.update(CLIENTS_RESOURCE, id, changes, now)?;
        let mut replayed_changes = changes.clone();
        if let Some(updated_at) = stored.get("updated_at") {
            replayed_changes.insert("updated_at".into(), updated_at.clone());
        }
        let replay = Query::update(CLIENTS_RESOURCE, id, replayed_changes);
        Ok(FallbackOutcome::write(Value::Object(stored), replay))
    }
}

struct DeleteClientFallback;

impl FallbackHandler for DeleteClientFallback {
    fn handle(&self, request: &DataRequest, tables: &LocalTables, _: DateTime<Utc>) -> DataAccessResult<FallbackOutcome> {
        let DataRequest::DeleteClient { id } = request else {
            return Err(mismatch(OperationKind::DeleteClient, request));
        };
        tables.delete(CLIENTS_RESOURCE, id)?;
        Ok(FallbackOutcome::write(
            json!({ "id": id, "deleted": true }),
            Query::delete(CLIENTS_RESOURCE, id),
        ))
    }
}

struct AddActivityFallback;

impl FallbackHandler for AddActivityFallback {
    fn handle(&self, request: &DataRequest, tables: &LocalTables, now: DateTime<Utc>) -> DataAccessResult<FallbackOutcome> {
        let DataRequest::AddActivity(record) = request else {
            return Err(mismatch(OperationKind::AddActivity, request));
        };
        let stored = tables.insert(ACTIVITIES_RESOURCE, record.clone(), now)?;
        let replay = Query::insert(ACTIVITIES_RESOURCE, stored.clone());
        Ok(FallbackOutcome::write(Value::Object(stored), replay))
    }
}

struct GetActivitiesFallback;

impl FallbackHandler for GetActivitiesFallback {
    fn handle(&self, request: &DataRequest, tables: &LocalTables, _: DateTime<Utc>) -> DataAccessResult<FallbackOutcome> {
        let DataRequest::GetActivities { client_id, limit } = request else {
            return Err(mismatch(OperationKind::GetActivities, request));
        };
        let activities =
            newest_activities(tables.load(ACTIVITIES_RESOURCE)?, client_id.as_deref(), *limit);
        Ok(FallbackOutcome::read(Value::Array(activities.into_iter().map(Value::Object).collect())))
    }
}

struct FindClientFallback;

impl FallbackHandler for FindClientFallback {
    fn handle(&self, request: &DataRequest, tables: &LocalTables, _: DateTime<Utc>) -> DataAccessResult<FallbackOutcome> {
        let DataRequest::FindClient { term } = request else {
            return Err(mismatch(OperationKind::FindClient, request));
        };
        let found = find_by_term(&tables.load(CLIENTS_RESOURCE)?, term);
        Ok(FallbackOutcome::read(found.map_or(Value::Null, Value::Object)))
    }
}

fn default_handler(kind: OperationKind) -> Arc<dyn FallbackHandler> {
    match kind {
        OperationKind::GetClients => Arc::new(GetClientsFallback),
        OperationKind::AddClient => Arc::new(AddClientFallback),
        OperationKind::UpdateClient => Arc::new(UpdateClientFallback),
        OperationKind::DeleteClient => Arc::new(DeleteClientFallback),
        OperationKind::AddActivity => Arc::new(AddActivityFallback),
        OperationKind::GetActivities => Arc::new(GetActivitiesFallback),
        OperationKind::FindClient => Arc::new(FindClientFallback),
    }
}

/// Handlers keyed by operation kind
#[derive(Clone, Default)]
pub struct FallbackRegistry {
    handlers: HashMap<OperationKind, Arc<dyn FallbackHandler>>,
}

impl std::fmt::Debug for FallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl FallbackRegistry {
    /// A registry with no handlers; every failure propagates
    pub fn empty() -> Self {
        Self::default()
    }

    /// A handler for every operation kind
    pub fn with_defaults() -> Self {
        let handlers = OperationKind::ALL.iter().map(|kind| (*kind, default_handler(*kind))).collect();
        Self { handlers }
    }

    pub fn register(mut self, kind: OperationKind, handler: Arc<dyn FallbackHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn without(mut self, kind: OperationKind) -> Self {
        self.handlers.remove(&kind);
        self
    }

    pub fn get(&self, kind: OperationKind) -> Option<&Arc<dyn FallbackHandler>> {
        self.handlers.get(&kind)
    }

    pub fn contains(&self, kind: OperationKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

/// Routes failed operations to their local handler and queues the writes
#[derive(Debug)]
pub struct FallbackDispatcher {
    registry: FallbackRegistry,
    tables: LocalTables,
    queue: Arc<ReplayQueue>,
}

impl FallbackDispatcher {
    pub fn new(registry: FallbackRegistry, tables: LocalTables, queue: Arc<ReplayQueue>) -> Self {
        Self { registry, tables, queue }
    }

    pub fn registry(&self) -> &FallbackRegistry {
        &self.registry
    }

    pub fn tables(&self) -> &LocalTables {
        &self.tables
    }

    /// Serve `request` locally after it failed with `error`
    ///
    /// `None` means there is no fallback for this failure, or the handler
    /// itself failed; either way the original error should propagate.
    #[instrument(skip(self, error, request), fields(operation = %request.kind()))]
    pub async fn handle_fallback(
        &self,
        error: &DataAccessError,
        request: &DataRequest,
        now: DateTime<Utc>,
    ) -> Option<Value> {
        if !error.allows_fallback() {
            return None;
        }
        let kind = request.kind();
        let handler = self.registry.get(kind)?;

        warn!(error = %error, "Serving operation from local fallback");
        let outcome = match handler.handle(request, &self.tables, now) {
            Ok(outcome) => outcome,
            Err(fallback_error) => {
                warn!(error = %fallback_error, "Local fallback failed, keeping the original error");
                return None;
            }
        };

        if let Some(query) = outcome.replay {
            let queue_len = self.queue.enqueue(ReplayOperation::new(kind, query, now)).await;
            info!(queue_len, "Fallback write queued for replay");
        }
        Some(outcome.data)
    }
}

#[cfg(test)]
mod tests {
    use clientkey_domain::{AddClientRequest, BackendError, QueryOp, Record};

    use super::*;
    use crate::local::MemoryLocalStore;
    use crate::replay::ReplayConfig;

    fn dispatcher(registry: FallbackRegistry) -> FallbackDispatcher {
        let store = Arc::new(MemoryLocalStore::new());
        let queue = Arc::new(ReplayQueue::restore(
            store.clone(),
            Arc::new(clientkey_common::resilience::MockClock::new()),
            ReplayConfig::default(),
        ));
        FallbackDispatcher::new(registry, LocalTables::new(store), queue)
    }

    fn unreachable() -> DataAccessError {
        DataAccessError::from(BackendError::connection_refused("connect ECONNREFUSED 127.0.0.1:5432"))
    }

    #[test]
    fn defaults_cover_every_kind() {
        let registry = FallbackRegistry::with_defaults();
        for kind in OperationKind::ALL {
            assert!(registry.contains(kind), "{kind} has no fallback");
        }
        assert!(!FallbackRegistry::empty().contains(OperationKind::AddClient));
    }

    #[tokio::test]
    async fn add_client_is_stored_locally_and_queued_once() {
        let dispatcher = dispatcher(FallbackRegistry::with_defaults());
        let record = AddClientRequest::new("Ana", "ana@x.com").into_record("c1", Utc::now());

        let data = dispatcher
            .handle_fallback(&unreachable(), &DataRequest::AddClient(record), Utc::now())
            .await
            .unwrap();

        assert_eq!(data["id"], json!("c1"));
        assert_eq!(dispatcher.tables().load(CLIENTS_RESOURCE).unwrap().len(), 1);

        let queued = dispatcher.queue.snapshot().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].kind, OperationKind::AddClient);
        assert_eq!(queued[0].query.op, QueryOp::Insert);
        assert_eq!(queued[0].query.record_id(), Some("c1"));
    }

    #[tokio::test]
    async fn reads_are_not_queued() {
        let dispatcher = dispatcher(FallbackRegistry::with_defaults());
        let data = dispatcher.handle_fallback(&unreachable(), &DataRequest::GetClients, Utc::now()).await;

        assert_eq!(data, Some(json!([])));
        assert!(dispatcher.queue.is_empty().await);
    }

    #[tokio::test]
    async fn validation_failures_never_fall_back() {
        let dispatcher = dispatcher(FallbackRegistry::with_defaults());
        let error = DataAccessError::from(BackendError::validation("invalid email"));

        let data = dispatcher.handle_fallback(&error, &DataRequest::GetClients, Utc::now()).await;
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn missing_handler_returns_none() {
        let dispatcher = dispatcher(FallbackRegistry::with_defaults().without(OperationKind::GetClients));
        let data = dispatcher.handle_fallback(&unreachable(), &DataRequest::GetClients, Utc::now()).await;
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn circuit_open_falls_back() {
        let dispatcher = dispatcher(FallbackRegistry::with_defaults());
        let error = DataAccessError::CircuitOpen { retry_after: None };

        let data = dispatcher.handle_fallback(&error, &DataRequest::GetClients, Utc::now()).await;
        assert_eq!(data, Some(json!([])));
    }

    #[tokio::test]
    async fn failing_handler_yields_none_and_queues_nothing() {
        let dispatcher = dispatcher(FallbackRegistry::with_defaults());

        let mut changes = Record::new();
        changes.insert("name".into(), json!("Bia"));
        let request = DataRequest::UpdateClient { id: "ghost".into(), changes };

        let data = dispatcher.handle_fallback(&unreachable(), &request, Utc::now()).await;
        assert!(data.is_none());
        assert!(dispatcher.queue.is_empty().await);
    }

    #[test]
    fn handler_rejects_foreign_request() {
        let tables = LocalTables::new(Arc::new(MemoryLocalStore::new()));
        let err = AddClientFallback.handle(&DataRequest::GetClients, &tables, Utc::now()).unwrap_err();
        assert!(err.to_string().contains("addClient"));
    }
}
