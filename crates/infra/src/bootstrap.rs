//! Wiring of concrete backends into the data-access layer

use std::sync::Arc;

use clientkey_core::{DataAccess, DataAccessResult, ReplayWorker, ReplayWorkerConfig};
use clientkey_domain::Config;
use tracing::info;

use crate::database::{RelationalBackend, SqliteLocalStore};
use crate::http::DocumentBackend;

/// Build a [`DataAccess`] over the backends `config` enables
///
/// Candidates are registered in preference order: relational, then
/// document. The local SQLite store always backs the fallback path. Nothing
/// is connected until the first call or an explicit `initialize`.
///
/// # Errors
///
/// Returns an error if the local store cannot be opened or the resilience
/// settings are invalid.
pub fn build_data_access(config: &Config) -> DataAccessResult<DataAccess> {
    let local = SqliteLocalStore::open(&config.local)?;
    let mut builder = DataAccess::builder(Arc::new(local)).with_resilience(config.resilience.clone());

    if config.relational.enabled {
        builder = builder.with_backend(Arc::new(RelationalBackend::new(config.relational.clone())));
    }
    if config.document.is_configured() {
        builder = builder.with_backend(Arc::new(DocumentBackend::new(config.document.clone())?));
    }

    info!(
        relational = config.relational.enabled,
        document = config.document.is_configured(),
        local_path = %config.local.path,
        "Data access configured"
    );
    builder.build()
}

/// A replay worker that drains `access` on the configured interval
///
/// The worker is returned stopped; call `start` to run it.
pub fn replay_worker(access: &DataAccess, config: &Config) -> ReplayWorker {
    ReplayWorker::new(
        Arc::new(access.clone()),
        ReplayWorkerConfig { interval: config.resilience.replay_interval(), ..ReplayWorkerConfig::default() },
    )
}
