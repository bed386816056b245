//! SQLite-backed local key/value storage
//!
//! Implements the [`LocalStore`] port on top of an r2d2 pool. Every key lives
//! in one `local_items` table; the local backend and the replay queue store
//! their JSON documents there.

use std::time::Duration;

use clientkey_common::error::{CommonError, CommonResult};
use clientkey_core::LocalStore;
use clientkey_domain::LocalConfig;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info, instrument};

use crate::errors::InfraError;

const MEMORY_PATH: &str = ":memory:";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS local_items (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
)";

#[derive(Debug, Clone)]
pub struct SqliteLocalStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteLocalStore {
    /// Open (or create) the store described by `config`
    ///
    /// `:memory:` gives a private in-memory database held by a single pooled
    /// connection.
    #[instrument(skip(config), fields(path = %config.path, pool_size = config.pool_size))]
    pub fn open(config: &LocalConfig) -> CommonResult<Self> {
        if config.path == MEMORY_PATH {
            return Self::in_memory();
        }

        let manager = SqliteConnectionManager::file(&config.path).with_init(|conn| {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            conn.busy_timeout(BUSY_TIMEOUT)
        });
        let store = Self::with_manager(manager, config.pool_size.max(1))?;
        info!("Local sqlite store opened");
        Ok(store)
    }

    pub fn in_memory() -> CommonResult<Self> {
        Self::with_manager(SqliteConnectionManager::memory(), 1)
    }

    fn with_manager(manager: SqliteConnectionManager, max_size: u32) -> CommonResult<Self> {
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(CHECKOUT_TIMEOUT)
            // an in-memory database lives only as long as its connection
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)
            .map_err(InfraError::from)?;

        let store = Self { pool };
        store.conn()?.execute_batch(SCHEMA_SQL).map_err(InfraError::from)?;
        Ok(store)
    }

    fn conn(&self) -> CommonResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get().map_err(InfraError::from)?)
    }

    /// Number of stored keys
    pub fn len(&self) -> CommonResult<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM local_items", [], |row| row.get(0))
            .map_err(InfraError::from)?;
        usize::try_from(count).map_err(|e| CommonError::internal(e.to_string()))
    }

    pub fn is_empty(&self) -> CommonResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl LocalStore for SqliteLocalStore {
    fn get_item(&self, key: &str) -> CommonResult<Option<String>> {
        let value = self
            .conn()?
            .query_row("SELECT value FROM local_items WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .map_err(InfraError::from)?;
        Ok(value)
    }

    fn set_item(&self, key: &str, value: &str) -> CommonResult<()> {
        self.conn()?
            .execute(
                "INSERT INTO local_items (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![key, value],
            )
            .map_err(InfraError::from)?;
        debug!(key, bytes = value.len(), "Local item written");
        Ok(())
    }

    fn remove_item(&self, key: &str) -> CommonResult<()> {
        self.conn()?
            .execute("DELETE FROM local_items WHERE key = ?1", params![key])
            .map_err(InfraError::from)?;
        Ok(())
    }
}
