//! Data access facade
//!
//! [`DataAccess`] is the one surface callers use. Every call goes through the
//! circuit breaker, which wraps the retry executor, which wraps the active
//! backend. When a remote call still fails, the fallback dispatcher serves it
//! from local storage and queues writes for replay.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use clientkey_common::error::CommonError;
use clientkey_common::resilience::{
    CircuitBreakerConfig, Jitter, ResilienceError, RetryConfig, RetryExecutor, SystemClock,
    TokioSleeper,
};
use clientkey_common::validation::ValidationError;
use clientkey_domain::constants::{CLIENTS_RESOURCE, DEFAULT_ACTIVITY_LIMIT};
use clientkey_domain::{
    generate_id, Activity, AddActivityRequest, AddClientRequest, Client, DataRequest,
    HealthReport, OperationKind, ProviderKind, Query, QueryOp, QueryResponse, Record,
    ReplayOperation, ResilienceConfig, UpdateClientRequest,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::classifier::{classify, ErrorKind, RetryPolicies};
use crate::error::{DataAccessError, DataAccessResult};
use crate::fallback::{FallbackDispatcher, FallbackRegistry};
use crate::local::{LocalBackend, LocalTables};
use crate::ports::{LocalStore, StorageBackend};
use crate::records::shape_read;
use crate::replay::{DrainReport, ReplayConfig, ReplayDrain, ReplayQueue};
use crate::selector::ProviderSelector;
use crate::stats::{ErrorStats, ErrorStatsSnapshot};
use crate::validation::{validate_add_activity, validate_add_client, validate_update_client};
use crate::{Breaker, SharedClock, SharedSleeper};

/// Wires a [`DataAccess`] from its collaborators
pub struct DataAccessBuilder {
    local_store: Arc<dyn LocalStore>,
    candidates: Vec<Arc<dyn StorageBackend>>,
    resilience: ResilienceConfig,
    clock: SharedClock,
    sleeper: SharedSleeper,
    registry: FallbackRegistry,
    policies: RetryPolicies,
}

impl DataAccessBuilder {
    pub fn new(local_store: Arc<dyn LocalStore>) -> Self {
        Self {
            local_store,
            candidates: Vec::new(),
            resilience: ResilienceConfig::default(),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            registry: FallbackRegistry::with_defaults(),
            policies: RetryPolicies::default(),
        }
    }

    /// Add a remote backend; earlier backends take priority
    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.candidates.push(backend);
        self
    }

    pub fn with_resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }

    /// Clock read by the circuit breaker
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Sleeper used for retry backoff and replay pauses
    pub fn with_sleeper(mut self, sleeper: SharedSleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_fallbacks(mut self, registry: FallbackRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_retry_policies(mut self, policies: RetryPolicies) -> Self {
        self.policies = policies;
        self
    }

    pub fn build(self) -> DataAccessResult<DataAccess> {
        let resilience = self.resilience;

        let breaker_config = CircuitBreakerConfig::builder()
            .failure_threshold(resilience.failure_threshold)
            .cooldown(resilience.cooldown())
            .build()
            .map_err(|e| CommonError::config(e.to_string()))?;
        let breaker = Breaker::with_clock(breaker_config, self.clock)
            .map_err(|e| CommonError::config(e.to_string()))?;

        let retry = RetryExecutor::with_sleeper(
            RetryConfig::builder()
                .jitter(Jitter::up_to(resilience.max_jitter()))
                .max_delay(resilience.max_delay())
                .build(),
            self.policies,
            self.sleeper.clone(),
        );

        let tables = LocalTables::new(self.local_store.clone())
            .with_activity_cap(resilience.activity_cap_per_client);
        let local: Arc<dyn StorageBackend> = Arc::new(LocalBackend::new(tables.clone()));
        let queue = Arc::new(ReplayQueue::restore(
            self.local_store,
            self.sleeper,
            ReplayConfig::from(&resilience),
        ));

        Ok(DataAccess {
            inner: Arc::new(Inner {
                selector: ProviderSelector::new(self.candidates, local),
                breaker,
                retry,
                dispatcher: FallbackDispatcher::new(self.registry, tables, queue.clone()),
                queue,
                stats: ErrorStats::new(),
                drain_on_enqueue: resilience.drain_on_enqueue,
            }),
        })
    }
}

struct Inner {
    selector: ProviderSelector,
    breaker: Breaker,
    retry: RetryExecutor<RetryPolicies, SharedSleeper>,
    dispatcher: FallbackDispatcher,
    queue: Arc<ReplayQueue>,
    stats: ErrorStats,
    drain_on_enqueue: bool,
}

/// Resilient client and activity storage
///
/// Cheap to clone; clones share the breaker, the replay queue and the
/// selected backend.
#[derive(Clone)]
pub struct DataAccess {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DataAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccess")
            .field("selector", &self.inner.selector)
            .field("breaker", &self.inner.breaker)
            .field("queue", &self.inner.queue)
            .finish_non_exhaustive()
    }
}

impl DataAccess {
    pub fn builder(local_store: Arc<dyn LocalStore>) -> DataAccessBuilder {
        DataAccessBuilder::new(local_store)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Select the backend; awaiting this once replaces polling for readiness
    ///
    /// Idempotent. Queries call it implicitly when nothing is selected yet.
    pub async fn initialize(&self) -> DataAccessResult<ProviderKind> {
        self.inner.selector.initialize().await
    }

    /// Drop the current backend and run selection again
    pub async fn reinitialize(&self) -> DataAccessResult<ProviderKind> {
        let provider = self.inner.selector.reinitialize().await?;
        self.inner.breaker.reset();
        Ok(provider)
    }

    pub async fn close(&self) {
        self.inner.selector.close().await;
    }

    pub fn is_available(&self) -> bool {
        self.inner.selector.is_initialized()
    }

    /// The backend serving queries, if one is selected
    pub fn provider(&self) -> Option<ProviderKind> {
        self.inner.selector.provider()
    }

    /// Cheap liveness probe against the active backend
    pub async fn health_check(&self) -> HealthReport {
        let Some(backend) = self.inner.selector.active() else {
            return HealthReport::unhealthy(None, "not initialized");
        };
        let provider = backend.provider();
        match backend.health_check().await {
            Ok(()) => HealthReport::healthy(provider),
            Err(e) => {
                warn!(%provider, error = %e, "Health check failed");
                HealthReport::unhealthy(Some(provider), e.to_string())
            }
        }
    }

    pub fn breaker(&self) -> &Breaker {
        &self.inner.breaker
    }

    // ------------------------------------------------------------------
    // Generic surface
    // ------------------------------------------------------------------

    /// Run a raw query
    ///
    /// Queries that map to a logical operation get its fallback; anything else
    /// reports the backend failure as is.
    #[instrument(skip_all, fields(op = %op, resource = %resource))]
    pub async fn query(&self, op: QueryOp, resource: &str, payload: Option<Record>) -> QueryResponse {
        let query = Query::new(op, resource, payload);
        let result = match DataRequest::from_query(&query) {
            Some(request) => self.run(request).await,
            None => self.run_unmapped(query).await,
        };
        match result {
            Ok(data) => QueryResponse::ok(data),
            Err(e) => QueryResponse::failed(e.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Typed operations
    // ------------------------------------------------------------------

    pub async fn get_clients(&self) -> DataAccessResult<Vec<Client>> {
        decode(self.run(DataRequest::GetClients).await?)
    }

    /// Register a client; the email must not be taken
    #[instrument(skip(self, request))]
    pub async fn add_client(&self, request: AddClientRequest) -> DataAccessResult<Client> {
        validate_add_client(&request).map_err(|e| self.rejected(OperationKind::AddClient, e))?;

        let email = request.normalized_email();
        let existing = self.registered_clients().await?;
        if existing.iter().any(|c| c.email.eq_ignore_ascii_case(&email)) {
            return Err(self.rejected(
                OperationKind::AddClient,
                ValidationError::field("email", "already registered"),
            ));
        }

        let record = request.into_record(&generate_id(), Utc::now());
        decode(self.run(DataRequest::AddClient(record)).await?)
    }

    #[instrument(skip(self, request))]
    pub async fn update_client(
        &self,
        id: &str,
        request: UpdateClientRequest,
    ) -> DataAccessResult<Client> {
        validate_update_client(id, &request)
            .map_err(|e| self.rejected(OperationKind::UpdateClient, e))?;

        let changes = request.into_changes(Utc::now());
        decode(self.run(DataRequest::UpdateClient { id: id.to_string(), changes }).await?)
    }

    #[instrument(skip(self))]
    pub async fn delete_client(&self, id: &str) -> DataAccessResult<()> {
        if id.trim().is_empty() {
            return Err(
                self.rejected(OperationKind::DeleteClient, ValidationError::field("id", "cannot be empty"))
            );
        }
        self.run(DataRequest::DeleteClient { id: id.to_string() }).await?;
        Ok(())
    }

    #[instrument(skip(self, request))]
    pub async fn add_activity(&self, request: AddActivityRequest) -> DataAccessResult<Activity> {
        validate_add_activity(&request)
            .map_err(|e| self.rejected(OperationKind::AddActivity, e))?;

        let record = request.into_record(&generate_id(), Utc::now());
        decode(self.run(DataRequest::AddActivity(record)).await?)
    }

    /// Newest activities first, for one client or across all of them
    pub async fn get_client_activities(
        &self,
        client_id: Option<&str>,
        limit: Option<usize>,
    ) -> DataAccessResult<Vec<Activity>> {
        let request = DataRequest::GetActivities {
            client_id: client_id.map(str::to_string),
            limit: limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT),
        };
        decode(self.run(request).await?)
    }

    /// First client whose email or name contains `term`, ignoring case
    pub async fn find_client_by_email_or_name(&self, term: &str) -> DataAccessResult<Option<Client>> {
        if term.trim().is_empty() {
            return Ok(None);
        }
        match self.run(DataRequest::FindClient { term: term.to_string() }).await? {
            Value::Null => Ok(None),
            data => decode(data).map(Some),
        }
    }

    // ------------------------------------------------------------------
    // Replay and statistics
    // ------------------------------------------------------------------

    /// Drain the replay queue against the active remote backend
    ///
    /// A no-op while local storage is the active provider.
    pub async fn process_queue(&self) -> DrainReport {
        let remote = self.inner.selector.active().filter(|b| b.provider().is_remote());
        match remote {
            Some(backend) => self.inner.queue.process_queue(backend.as_ref(), &self.inner.breaker).await,
            None => {
                debug!("No remote backend active, skipping replay");
                DrainReport { remaining: self.inner.queue.len().await, ..DrainReport::default() }
            }
        }
    }

    /// Operations waiting for replay, in drain order
    pub async fn pending_operations(&self) -> Vec<ReplayOperation> {
        self.inner.queue.snapshot().await
    }

    pub async fn error_stats(&self) -> ErrorStatsSnapshot {
        let breaker = &self.inner.breaker;
        self.inner.stats.snapshot(
            breaker.get_state(),
            breaker.failure_count(),
            self.inner.queue.len().await,
            self.inner.queue.is_processing(),
        )
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn backend(&self) -> DataAccessResult<Arc<dyn StorageBackend>> {
        if let Some(backend) = self.inner.selector.active() {
            return Ok(backend);
        }
        self.inner.selector.initialize().await?;
        self.inner
            .selector
            .active()
            .ok_or_else(|| DataAccessError::NotInitialized("no backend selected".to_string()))
    }

    /// Clients a new registration is checked against
    ///
    /// One plain read of the active backend, outside the breaker and the retry
    /// loop, so a registration stays a single breaker outcome. When the read
    /// fails or the circuit is open, the local copy answers.
    async fn registered_clients(&self) -> DataAccessResult<Vec<Client>> {
        let backend = self.backend().await?;
        if !self.inner.breaker.is_open() {
            match backend.execute(&DataRequest::GetClients.to_query()).await {
                Ok(data) => return decode(data),
                Err(e) if classify(Some(&e)) == ErrorKind::Validation => return Err(e.into()),
                Err(e) => debug!(error = %e, "Checking registration against local clients"),
            }
        }
        let local = self.inner.dispatcher.tables().load(CLIENTS_RESOURCE)?;
        decode(Value::Array(local.into_iter().map(Value::Object).collect()))
    }

    /// Breaker gate around the retry loop around one backend call
    ///
    /// The breaker sees one outcome per logical call. Validation failures
    /// leave it untouched.
    async fn call_backend(
        &self,
        backend: &Arc<dyn StorageBackend>,
        operation: &str,
        query: &Query,
    ) -> DataAccessResult<Value> {
        let inner = &self.inner;
        let result = inner
            .breaker
            .execute_classified(
                || inner.retry.execute(operation, || backend.execute(query)),
                |e| classify(Some(e)) != ErrorKind::Validation,
            )
            .await;

        match result {
            Ok(data) => Ok(data),
            Err(ResilienceError::CircuitOpen { retry_after }) => {
                inner.stats.record_rejection(operation, Utc::now());
                Err(DataAccessError::CircuitOpen { retry_after })
            }
            Err(ResilienceError::OperationFailed { source }) => {
                let error = DataAccessError::from(source);
                inner.stats.record_error(error.kind(), operation, &error.to_string(), Utc::now());
                Err(error)
            }
        }
    }

    #[instrument(skip(self, request), fields(operation = %request.kind()))]
    async fn run(&self, request: DataRequest) -> DataAccessResult<Value> {
        let backend = self.backend().await?;
        let kind = request.kind();
        let query = request.to_query();

        match self.call_backend(&backend, kind.as_str(), &query).await {
            Ok(data) => {
                self.after_remote_success(&backend).await;
                Ok(shape_read(&request, data))
            }
            Err(error) => {
                if !backend.provider().is_remote() {
                    return Err(error);
                }
                match self.inner.dispatcher.handle_fallback(&error, &request, Utc::now()).await {
                    Some(data) => {
                        self.inner.stats.record_recovery();
                        if kind.is_write() {
                            self.schedule_drain();
                        }
                        Ok(data)
                    }
                    None => Err(error),
                }
            }
        }
    }

    async fn run_unmapped(&self, query: Query) -> DataAccessResult<Value> {
        let backend = self.backend().await?;
        let operation = format!("{} {}", query.op, query.resource);
        let data = self.call_backend(&backend, &operation, &query).await?;
        self.after_remote_success(&backend).await;
        Ok(data)
    }

    async fn after_remote_success(&self, backend: &Arc<dyn StorageBackend>) {
        if backend.provider().is_remote() && !self.inner.queue.is_empty().await {
            self.schedule_drain();
        }
    }

    fn schedule_drain(&self) {
        if !self.inner.drain_on_enqueue || self.inner.queue.is_processing() {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let report = this.process_queue().await;
            if report.replayed > 0 {
                info!(replayed = report.replayed, remaining = report.remaining, "Background replay finished");
            }
        });
    }

    fn rejected(&self, kind: OperationKind, error: ValidationError) -> DataAccessError {
        let error = DataAccessError::InvalidRequest(error);
        self.inner.stats.record_error(ErrorKind::Validation, kind.as_str(), &error.to_string(), Utc::now());
        error
    }
}

#[async_trait]
impl ReplayDrain for DataAccess {
    async fn drain(&self) -> DrainReport {
        self.process_queue().await
    }
}

fn decode<T: DeserializeOwned>(data: Value) -> DataAccessResult<T> {
    serde_json::from_value(data).map_err(|e| DataAccessError::Common(CommonError::from(e)))
}
