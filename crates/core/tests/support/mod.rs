//! Shared fixtures for `clientkey-core` integration tests
//!
//! `ScriptedBackend` plays a remote store that can be switched between
//! failing and healthy mid-test. While healthy it keeps records in memory,
//! reusing the local record layout, so replayed writes can be read back.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clientkey_common::resilience::MockClock;
use clientkey_core::{DataAccess, LocalBackend, LocalTables, MemoryLocalStore, StorageBackend};
use clientkey_domain::{BackendError, ProviderKind, Query, Record, ResilienceConfig};
use serde_json::Value;

pub struct ScriptedBackend {
    provider: ProviderKind,
    reachable: AtomicBool,
    failure: Mutex<Option<BackendError>>,
    calls: AtomicUsize,
    executed: Mutex<Vec<Query>>,
    rows: LocalBackend,
}

impl ScriptedBackend {
    pub fn healthy() -> Self {
        Self {
            provider: ProviderKind::Primary,
            reachable: AtomicBool::new(true),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
            rows: LocalBackend::new(LocalTables::new(Arc::new(MemoryLocalStore::new()))),
        }
    }

    /// Connects fine but every query fails with `error`
    pub fn failing(error: BackendError) -> Self {
        let backend = Self::healthy();
        backend.fail_with(error);
        backend
    }

    pub fn refusing() -> Self {
        Self::failing(BackendError::connection_refused("connect ECONNREFUSED 127.0.0.1:5432"))
    }

    /// Cannot even connect, so selection skips it
    pub fn unreachable() -> Self {
        let backend = Self::refusing();
        backend.reachable.store(false, Ordering::SeqCst);
        backend
    }

    pub fn as_secondary(mut self) -> Self {
        self.provider = ProviderKind::Secondary;
        self
    }

    pub fn fail_with(&self, error: BackendError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Queries attempted, including failed ones
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queries that succeeded, in order
    pub fn executed(&self) -> Vec<Query> {
        self.executed.lock().unwrap().clone()
    }

    pub fn stored(&self, resource: &str) -> Vec<Record> {
        self.rows.tables().load(resource).unwrap()
    }
}

#[async_trait]
impl StorageBackend for ScriptedBackend {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn connect(&self) -> Result<(), BackendError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::connection_refused("connect ECONNREFUSED 127.0.0.1:5432"))
        }
    }

    async fn execute(&self, query: &Query) -> Result<Value, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.failure.lock().unwrap().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        let data = self.rows.execute(query).await?;
        self.executed.lock().unwrap().push(query.clone());
        Ok(data)
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let failure = self.failure.lock().unwrap().clone();
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// No jitter and no background drains, so tests decide when replay runs
pub fn quiet_resilience() -> ResilienceConfig {
    ResilienceConfig { max_jitter_ms: 0, drain_on_enqueue: false, ..ResilienceConfig::default() }
}

pub struct Harness {
    pub access: DataAccess,
    pub primary: Arc<ScriptedBackend>,
    pub store: Arc<MemoryLocalStore>,
    pub clock: MockClock,
}

impl Harness {
    pub fn new(primary: ScriptedBackend, resilience: ResilienceConfig) -> Self {
        Self::with_store(primary, resilience, Arc::new(MemoryLocalStore::new()))
    }

    /// Build over an existing local store, as a restarted process would
    pub fn with_store(
        primary: ScriptedBackend,
        resilience: ResilienceConfig,
        store: Arc<MemoryLocalStore>,
    ) -> Self {
        let primary = Arc::new(primary);
        let clock = MockClock::new();
        let access = DataAccess::builder(store.clone())
            .with_backend(primary.clone())
            .with_resilience(resilience)
            .with_clock(Arc::new(clock.clone()))
            .with_sleeper(Arc::new(clock.clone()))
            .build()
            .unwrap();
        Self { access, primary, store, clock }
    }

    /// Records the local fallback holds for `resource`
    pub fn local(&self, resource: &str) -> Vec<Record> {
        LocalTables::new(self.store.clone()).load(resource).unwrap()
    }
}

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
