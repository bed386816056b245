use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clientkey_common::resilience::Sleeper;
use clientkey_domain::constants::{REPLAY_MAX_ATTEMPTS, REPLAY_QUEUE_KEY};
use clientkey_domain::{ReplayOperation, ResilienceConfig};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::ports::{LocalStore, StorageBackend};
use crate::Breaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Attempts per operation before it is dropped
    pub max_attempts: u32,
    /// Pause between successful replays
    pub pause: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { max_attempts: REPLAY_MAX_ATTEMPTS, pause: Duration::from_millis(100) }
    }
}

impl From<&ResilienceConfig> for ReplayConfig {
    fn from(config: &ResilienceConfig) -> Self {
        Self { max_attempts: config.replay_max_attempts.max(1), pause: config.replay_pause() }
    }
}

/// What one drain pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub replayed: usize,
    pub requeued: usize,
    pub dropped: usize,
    pub remaining: usize,
    /// Another drain was in progress, so this one did nothing
    pub already_running: bool,
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// FIFO of pending writes, persisted to local storage after every change
pub struct ReplayQueue {
    pending: Mutex<VecDeque<ReplayOperation>>,
    processing: AtomicBool,
    store: Arc<dyn LocalStore>,
    sleeper: Arc<dyn Sleeper>,
    config: ReplayConfig,
}

impl std::fmt::Debug for ReplayQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayQueue")
            .field("processing", &self.is_processing())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReplayQueue {
    /// Create a queue, picking up operations persisted by an earlier run
    pub fn restore(
        store: Arc<dyn LocalStore>,
        sleeper: Arc<dyn Sleeper>,
        config: ReplayConfig,
    ) -> Self {
        let pending = match store.get_item(REPLAY_QUEUE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<VecDeque<ReplayOperation>>(&raw) {
                Ok(pending) => {
                    if !pending.is_empty() {
                        info!(queue_len = pending.len(), "Restored pending replay operations");
                    }
                    pending
                }
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable replay queue snapshot");
                    VecDeque::new()
                }
            },
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!(error = %e, "Could not read replay queue snapshot");
                VecDeque::new()
            }
        };

        Self {
            pending: Mutex::new(pending),
            processing: AtomicBool::new(false),
            store,
            sleeper,
            config,
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Append an operation; returns the new queue length
    pub async fn enqueue(&self, operation: ReplayOperation) -> usize {
        let mut pending = self.pending.lock().await;
        debug!(id = %operation.id, kind = %operation.kind, "Queued operation for replay");
        pending.push_back(operation);
        self.persist(&pending);
        pending.len()
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<ReplayOperation> {
        self.pending.lock().await.iter().cloned().collect()
    }

    pub async fn clear(&self) {
        let mut pending = self.pending.lock().await;
        pending.clear();
        self.persist(&pending);
    }

    /// Whether a drain is currently running
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Replay queued operations against `backend`
    ///
    /// Runs unless the breaker is open; a half-open breaker lets the drain
    /// through once its cooldown has passed. Stops at the first failure: the
    /// failed operation goes to the tail, or is dropped once it has used all
    /// its attempts. Only one drain runs at a time; a concurrent call returns
    /// immediately. The breaker is consulted but never updated.
    #[instrument(skip_all, fields(provider = %backend.provider()))]
    pub async fn process_queue(&self, backend: &dyn StorageBackend, breaker: &Breaker) -> DrainReport {
        if self.processing.swap(true, Ordering::AcqRel) {
            debug!("Replay drain already running");
            return DrainReport { already_running: true, ..DrainReport::default() };
        }
        let _guard = ProcessingGuard(&self.processing);
        let mut report = DrainReport::default();

        loop {
            if breaker.is_open() {
                debug!(state = %breaker.get_state(), "Circuit open, pausing replay");
                break;
            }

            let Some(mut operation) = self.pending.lock().await.pop_front() else {
                break;
            };

            match backend.execute(&operation.query).await {
                Ok(_) => {
                    report.replayed += 1;
                    let remaining = {
                        let pending = self.pending.lock().await;
                        self.persist(&pending);
                        pending.len()
                    };
                    info!(id = %operation.id, kind = %operation.kind, queue_len = remaining, "Replayed operation");
                    if remaining == 0 {
                        break;
                    }
                    self.sleeper.sleep(self.config.pause).await;
                }
                Err(e) => {
                    operation.attempt_count += 1;
                    let mut pending = self.pending.lock().await;
                    if operation.attempt_count < self.config.max_attempts {
                        warn!(
                            id = %operation.id,
                            kind = %operation.kind,
                            attempt = operation.attempt_count,
                            error = %e,
                            "Replay failed, requeued at tail"
                        );
                        pending.push_back(operation);
                        report.requeued += 1;
                    } else {
                        error!(
                            id = %operation.id,
                            kind = %operation.kind,
                            attempts = operation.attempt_count,
                            error = %e,
                            "Replay failed permanently, dropping operation"
                        );
                        report.dropped += 1;
                    }
                    self.persist(&pending);
                    break;
                }
            }
        }

        report.remaining = self.pending.lock().await.len();
        report
    }

    fn persist(&self, pending: &VecDeque<ReplayOperation>) {
        let result = if pending.is_empty() {
            self.store.remove_item(REPLAY_QUEUE_KEY)
        } else {
            serde_json::to_string(pending)
                .map_err(Into::into)
                .and_then(|raw| self.store.set_item(REPLAY_QUEUE_KEY, &raw))
        };
        if let Err(e) = result {
            warn!(error = %e, queue_len = pending.len(), "Failed to persist replay queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::Utc;
    use clientkey_common::resilience::{CircuitBreakerConfig, MockClock};
    use clientkey_domain::{BackendError, OperationKind, ProviderKind, Query};
    use serde_json::{json, Value};

    use super::*;
    use crate::local::MemoryLocalStore;
    use crate::SharedClock;

    struct CountingBackend {
        calls: AtomicUsize,
        fail: AtomicBool,
        seen: parking_lot::Mutex<Vec<String>>,
    }

    impl CountingBackend {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(fail),
                seen: parking_lot::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StorageBackend for CountingBackend {
        fn provider(&self) -> ProviderKind {
            ProviderKind::Primary
        }

        async fn connect(&self) -> Result<(), BackendError> {
            Ok(())
        }

        async fn execute(&self, query: &Query) -> Result<Value, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(query.record_id().unwrap_or_default().to_string());
            if self.fail.load(Ordering::SeqCst) {
                Err(BackendError::connection_refused("connect ECONNREFUSED"))
            } else {
                Ok(json!({}))
            }
        }

        async fn health_check(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn breaker(clock: &MockClock) -> Breaker {
        let clock: SharedClock = Arc::new(clock.clone());
        Breaker::with_clock(CircuitBreakerConfig::default(), clock).unwrap()
    }

    fn queue(store: Arc<MemoryLocalStore>, clock: &MockClock) -> ReplayQueue {
        ReplayQueue::restore(store, Arc::new(clock.clone()), ReplayConfig::default())
    }

    fn op(id: &str) -> ReplayOperation {
        ReplayOperation::new(OperationKind::DeleteClient, Query::delete("clients", id), Utc::now())
    }

    #[tokio::test]
    async fn drains_in_order_with_pause_between_successes() {
        let clock = MockClock::new();
        let queue = queue(Arc::new(MemoryLocalStore::new()), &clock);
        let backend = CountingBackend::new(false);
        for id in ["c1", "c2", "c3"] {
            queue.enqueue(op(id)).await;
        }

        let report = queue.process_queue(&backend, &breaker(&clock)).await;

        assert_eq!(report.replayed, 3);
        assert_eq!(report.remaining, 0);
        assert_eq!(*backend.seen.lock(), vec!["c1", "c2", "c3"]);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(100); 2]);
    }

    #[tokio::test]
    async fn failing_backend_drops_each_operation_after_three_attempts() {
        let clock = MockClock::new();
        let queue = queue(Arc::new(MemoryLocalStore::new()), &clock);
        let backend = CountingBackend::new(true);
        let breaker = breaker(&clock);
        for id in ["c1", "c2", "c3"] {
            queue.enqueue(op(id)).await;
        }

        let mut dropped = 0;
        for _ in 0..9 {
            let report = queue.process_queue(&backend, &breaker).await;
            assert_eq!(report.replayed + report.requeued + report.dropped, 1);
            dropped += report.dropped;
        }

        assert_eq!(dropped, 3);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 9);
        assert!(queue.is_empty().await);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn failure_moves_operation_to_tail() {
        let clock = MockClock::new();
        let queue = queue(Arc::new(MemoryLocalStore::new()), &clock);
        let backend = CountingBackend::new(true);
        queue.enqueue(op("c1")).await;
        queue.enqueue(op("c2")).await;

        queue.process_queue(&backend, &breaker(&clock)).await;

        let order: Vec<_> =
            queue.snapshot().await.iter().map(|o| o.query.record_id().unwrap().to_string()).collect();
        assert_eq!(order, vec!["c2", "c1"]);
        assert_eq!(queue.snapshot().await[1].attempt_count, 1);
    }

    #[tokio::test]
    async fn open_circuit_pauses_drain() {
        let clock = MockClock::new();
        let queue = queue(Arc::new(MemoryLocalStore::new()), &clock);
        let backend = CountingBackend::new(false);
        let breaker = breaker(&clock);
        for _ in 0..5 {
            breaker.record_failure();
        }
        queue.enqueue(op("c1")).await;

        let report = queue.process_queue(&backend, &breaker).await;
        assert_eq!(report.replayed, 0);
        assert_eq!(report.remaining, 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn drain_resumes_once_cooldown_elapses() {
        let clock = MockClock::new();
        let queue = queue(Arc::new(MemoryLocalStore::new()), &clock);
        let backend = CountingBackend::new(false);
        let breaker = breaker(&clock);
        for _ in 0..5 {
            breaker.record_failure();
        }
        for id in ["c1", "c2"] {
            queue.enqueue(op(id)).await;
        }
        assert_eq!(queue.process_queue(&backend, &breaker).await.remaining, 2);

        clock.advance(Duration::from_secs(31));
        let report = queue.process_queue(&backend, &breaker).await;

        assert_eq!(report.replayed, 2);
        assert_eq!(report.remaining, 0);
        assert_eq!(*backend.seen.lock(), vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn concurrent_drain_is_refused() {
        let clock = MockClock::new();
        let queue = queue(Arc::new(MemoryLocalStore::new()), &clock);
        queue.processing.store(true, Ordering::SeqCst);

        let report = queue.process_queue(&CountingBackend::new(false), &breaker(&clock)).await;
        assert!(report.already_running);
    }

    #[tokio::test]
    async fn queue_survives_restart() {
        let clock = MockClock::new();
        let store = Arc::new(MemoryLocalStore::new());
        {
            let queue = queue(Arc::clone(&store), &clock);
            queue.enqueue(op("c1")).await;
            queue.enqueue(op("c2")).await;
        }
        assert!(store.get_item(REPLAY_QUEUE_KEY).unwrap().is_some());

        let restored = queue(Arc::clone(&store), &clock);
        assert_eq!(restored.len().await, 2);

        restored.clear().await;
        assert!(store.get_item(REPLAY_QUEUE_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn unreadable_snapshot_starts_empty() {
        let clock = MockClock::new();
        let store = Arc::new(MemoryLocalStore::new());
        store.set_item(REPLAY_QUEUE_KEY, "[{broken").unwrap();

        assert!(queue(store, &clock).is_empty().await);
    }
}
