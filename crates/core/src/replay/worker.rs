//! Periodic replay drain with explicit lifecycle management
//!
//! The worker owns one background task. `stop()` cancels it through a
//! `CancellationToken` and awaits the join handle under a timeout; dropping a
//! running worker cancels the task without waiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::DrainReport;

/// Something that can drain the replay queue on demand
#[async_trait]
pub trait ReplayDrain: Send + Sync {
    async fn drain(&self) -> DrainReport;
}

#[derive(Debug, Clone)]
pub struct ReplayWorkerConfig {
    /// Time between drain passes
    pub interval: Duration,
    /// How long `stop` waits for the task to finish
    pub join_timeout: Duration,
}

impl Default for ReplayWorkerConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(30), join_timeout: Duration::from_secs(5) }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Worker already running")]
    AlreadyRunning,

    #[error("Worker not running")]
    NotRunning,

    #[error("Worker task panicked")]
    Panicked,

    #[error("Worker task did not finish within {0:?}")]
    JoinTimeout(Duration),
}

pub struct ReplayWorker {
    drain: Arc<dyn ReplayDrain>,
    config: ReplayWorkerConfig,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl ReplayWorker {
    pub fn new(drain: Arc<dyn ReplayDrain>, config: ReplayWorkerConfig) -> Self {
        Self { drain, config, cancellation: CancellationToken::new(), task_handle: None }
    }

    /// Spawn the background drain loop
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();
        let drain = Arc::clone(&self.drain);
        let interval = self.config.interval;
        let cancel = self.cancellation.clone();

        self.task_handle = Some(tokio::spawn(async move {
            Self::drain_loop(drain, interval, cancel).await;
        }));
        info!(interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX), "Replay worker started");
        Ok(())
    }

    /// Cancel the loop and wait for it to finish
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<(), WorkerError> {
        let Some(handle) = self.task_handle.take() else {
            return Err(WorkerError::NotRunning);
        };

        self.cancellation.cancel();
        let result = match tokio::time::timeout(self.config.join_timeout, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, "Replay worker task panicked");
                Err(WorkerError::Panicked)
            }
            Err(_) => {
                warn!("Replay worker did not stop within timeout");
                Err(WorkerError::JoinTimeout(self.config.join_timeout))
            }
        };
        self.cancellation = CancellationToken::new();
        info!("Replay worker stopped");
        result
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    async fn drain_loop(drain: Arc<dyn ReplayDrain>, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Replay worker loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    let report = drain.drain().await;
                    if report.replayed + report.dropped > 0 {
                        debug!(
                            replayed = report.replayed,
                            dropped = report.dropped,
                            queue_len = report.remaining,
                            "Replay pass finished"
                        );
                    }
                }
            }
        }
    }
}

impl Drop for ReplayWorker {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("ReplayWorker dropped while running; cancelling task");
            self.cancellation.cancel();
        }
    }
}
