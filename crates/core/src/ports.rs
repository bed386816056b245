//! Port interfaces for storage
//!
//! Remote and local backends implement [`StorageBackend`]; the local backend
//! and the fallback handlers share one [`LocalStore`] underneath.

use async_trait::async_trait;
use clientkey_common::CommonError;
use clientkey_domain::{BackendError, ProviderKind, Query};
use serde_json::Value;

/// A storage system that can answer queries
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Which provider slot this backend fills
    fn provider(&self) -> ProviderKind;

    /// Establish (or verify) connectivity; failing here skips the backend
    async fn connect(&self) -> Result<(), BackendError>;

    /// Run one query
    ///
    /// SELECT returns an array of records, INSERT and UPDATE the stored
    /// record, DELETE `{"id": .., "deleted": true}`.
    async fn execute(&self, query: &Query) -> Result<Value, BackendError>;

    /// Cheap liveness probe
    async fn health_check(&self) -> Result<(), BackendError>;

    /// Release connections
    async fn close(&self) {}
}

/// Synchronous string key/value storage
pub trait LocalStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, CommonError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), CommonError>;

    fn remove_item(&self, key: &str) -> Result<(), CommonError>;
}
