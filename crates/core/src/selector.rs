//! Backend selection
//!
//! Remote candidates are tried in priority order (relational, then document);
//! the first one that connects serves every query until the selector is
//! re-initialized or closed. Local storage is the last resort and always
//! connects.

use std::sync::Arc;

use clientkey_domain::ProviderKind;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::{DataAccessError, DataAccessResult};
use crate::ports::StorageBackend;

pub struct ProviderSelector {
    candidates: Vec<Arc<dyn StorageBackend>>,
    local: Arc<dyn StorageBackend>,
    active: RwLock<Option<Arc<dyn StorageBackend>>>,
    init_lock: Mutex<()>,
}

impl std::fmt::Debug for ProviderSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSelector")
            .field("candidates", &self.candidates.iter().map(|c| c.provider()).collect::<Vec<_>>())
            .field("active", &self.provider())
            .finish()
    }
}

impl ProviderSelector {
    /// `candidates` in priority order; `local` is used when none connects
    pub fn new(candidates: Vec<Arc<dyn StorageBackend>>, local: Arc<dyn StorageBackend>) -> Self {
        Self { candidates, local, active: RwLock::new(None), init_lock: Mutex::new(()) }
    }

    /// Select a backend unless one is already active
    ///
    /// Concurrent callers wait for the same selection instead of starting
    /// their own.
    pub async fn initialize(&self) -> DataAccessResult<ProviderKind> {
        let _init = self.init_lock.lock().await;
        if let Some(provider) = self.provider() {
            return Ok(provider);
        }
        self.select().await
    }

    /// Close the active backend and select again
    pub async fn reinitialize(&self) -> DataAccessResult<ProviderKind> {
        let _init = self.init_lock.lock().await;
        self.release().await;
        self.select().await
    }

    /// Close the active backend; queries wait for the next initialization
    pub async fn close(&self) {
        let _init = self.init_lock.lock().await;
        self.release().await;
    }

    pub fn active(&self) -> Option<Arc<dyn StorageBackend>> {
        self.active.read().clone()
    }

    pub fn provider(&self) -> Option<ProviderKind> {
        self.active.read().as_ref().map(|backend| backend.provider())
    }

    pub fn is_initialized(&self) -> bool {
        self.active.read().is_some()
    }

    #[instrument(skip(self))]
    async fn select(&self) -> DataAccessResult<ProviderKind> {
        for candidate in &self.candidates {
            let provider = candidate.provider();
            match candidate.connect().await {
                Ok(()) => {
                    info!(%provider, "Storage provider selected");
                    *self.active.write() = Some(Arc::clone(candidate));
                    return Ok(provider);
                }
                Err(e) => warn!(%provider, error = %e, "Storage provider unavailable"),
            }
        }

        match self.local.connect().await {
            Ok(()) => {
                warn!(provider = %ProviderKind::Local, "No remote provider reachable, using local storage");
                *self.active.write() = Some(Arc::clone(&self.local));
                Ok(ProviderKind::Local)
            }
            Err(e) => Err(DataAccessError::NotInitialized(format!(
                "no storage provider available: {e}"
            ))),
        }
    }

    async fn release(&self) {
        let previous = self.active.write().take();
        if let Some(backend) = previous {
            info!(provider = %backend.provider(), "Closing storage provider");
            backend.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use clientkey_domain::{BackendError, Query};
    use serde_json::Value;

    use super::*;

    struct Probe {
        provider: ProviderKind,
        reachable: AtomicBool,
        connects: AtomicUsize,
        closes: AtomicUsize,
    }

    impl Probe {
        fn new(provider: ProviderKind, reachable: bool) -> Arc<Self> {
            Arc::new(Self {
                provider,
                reachable: AtomicBool::new(reachable),
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl StorageBackend for Probe {
        fn provider(&self) -> ProviderKind {
            self.provider
        }

        async fn connect(&self) -> Result<(), BackendError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.reachable.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(BackendError::connection_refused("connect ECONNREFUSED"))
            }
        }

        async fn execute(&self, _query: &Query) -> Result<Value, BackendError> {
            Ok(Value::Null)
        }

        async fn health_check(&self) -> Result<(), BackendError> {
            Ok(())
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn selector(primary: &Arc<Probe>, secondary: &Arc<Probe>, local: &Arc<Probe>) -> ProviderSelector {
        ProviderSelector::new(
            vec![primary.clone() as Arc<dyn StorageBackend>, secondary.clone()],
            local.clone(),
        )
    }

    #[tokio::test]
    async fn prefers_primary_then_secondary_then_local() {
        let primary = Probe::new(ProviderKind::Primary, false);
        let secondary = Probe::new(ProviderKind::Secondary, true);
        let local = Probe::new(ProviderKind::Local, true);
        let selector = selector(&primary, &secondary, &local);

        assert_eq!(selector.provider(), None);
        assert_eq!(selector.initialize().await.unwrap(), ProviderKind::Secondary);

        secondary.reachable.store(false, Ordering::SeqCst);
        assert_eq!(selector.reinitialize().await.unwrap(), ProviderKind::Local);
        assert_eq!(secondary.closes.load(Ordering::SeqCst), 1);

        primary.reachable.store(true, Ordering::SeqCst);
        assert_eq!(selector.reinitialize().await.unwrap(), ProviderKind::Primary);
    }

    #[tokio::test]
    async fn selection_is_fixed_until_reinitialized() {
        let primary = Probe::new(ProviderKind::Primary, true);
        let secondary = Probe::new(ProviderKind::Secondary, true);
        let local = Probe::new(ProviderKind::Local, true);
        let selector = selector(&primary, &secondary, &local);

        selector.initialize().await.unwrap();
        primary.reachable.store(false, Ordering::SeqCst);
        assert_eq!(selector.initialize().await.unwrap(), ProviderKind::Primary);
        assert_eq!(primary.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_initialization_selects_once() {
        let primary = Probe::new(ProviderKind::Primary, true);
        let secondary = Probe::new(ProviderKind::Secondary, true);
        let local = Probe::new(ProviderKind::Local, true);
        let selector = Arc::new(selector(&primary, &secondary, &local));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let selector = Arc::clone(&selector);
                tokio::spawn(async move { selector.initialize().await.unwrap() })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), ProviderKind::Primary);
        }
        assert_eq!(primary.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_releases_backend() {
        let primary = Probe::new(ProviderKind::Primary, true);
        let secondary = Probe::new(ProviderKind::Secondary, true);
        let local = Probe::new(ProviderKind::Local, true);
        let selector = selector(&primary, &secondary, &local);

        selector.initialize().await.unwrap();
        selector.close().await;

        assert!(!selector.is_initialized());
        assert_eq!(primary.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nothing_reachable_is_an_error() {
        let primary = Probe::new(ProviderKind::Primary, false);
        let secondary = Probe::new(ProviderKind::Secondary, false);
        let local = Probe::new(ProviderKind::Local, false);
        let selector = selector(&primary, &secondary, &local);

        let err = selector.initialize().await.unwrap_err();
        assert!(matches!(err, DataAccessError::NotInitialized(_)));
    }
}
