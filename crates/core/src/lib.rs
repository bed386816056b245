//! # ClientKey Core
//!
//! The resilient data-access layer, free of infrastructure code.
//!
//! This crate contains:
//! - Port interfaces for storage backends and local key/value storage
//! - Failure classification and the per-kind retry policy table
//! - The local fallback dispatcher and the replay queue
//! - Provider selection and the [`DataAccess`] facade callers use
//!
//! ## Architecture Principles
//! - Depends only on `clientkey-common` and `clientkey-domain`
//! - No database, HTTP or filesystem code
//! - Every collaborator is injected; nothing is process-global

pub mod classifier;
pub mod error;
pub mod fallback;
pub mod local;
pub mod ports;
pub mod records;
pub mod replay;
pub mod selector;
pub mod service;
pub mod stats;
pub mod validation;

use std::sync::Arc;

use clientkey_common::resilience::{CircuitBreaker, Clock, Sleeper};

/// Clock shared by the breaker and everything that reads time
pub type SharedClock = Arc<dyn Clock>;
/// Sleeper shared by retry backoff and replay pauses
pub type SharedSleeper = Arc<dyn Sleeper>;
/// The circuit breaker guarding the active backend
pub type Breaker = CircuitBreaker<SharedClock>;

pub use classifier::{classify, ErrorKind, RetryPolicies};
pub use error::{DataAccessError, DataAccessResult};
pub use fallback::{FallbackDispatcher, FallbackHandler, FallbackOutcome, FallbackRegistry};
pub use local::{LocalBackend, LocalTables, MemoryLocalStore};
pub use ports::{LocalStore, StorageBackend};
pub use replay::{
    DrainReport, ReplayConfig, ReplayDrain, ReplayQueue, ReplayWorker, ReplayWorkerConfig, WorkerError,
};
pub use selector::ProviderSelector;
pub use service::{DataAccess, DataAccessBuilder};
pub use stats::{ErrorRecord, ErrorStats, ErrorStatsSnapshot};
