//! Relational backend over PostgreSQL
//!
//! Each resource is a table keyed by `id` holding the whole record as JSONB.
//! Tables are created on first use. Writes are upserts keyed by `id`, so a
//! replayed insert that already landed is harmless.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use clientkey_core::StorageBackend;
use clientkey_domain::{generate_id, BackendError, ProviderKind, Query, QueryOp, Record, RelationalConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, instrument, warn};

use crate::errors::IntoBackendError;

static RESOURCE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]*$").expect("RESOURCE_NAME pattern is valid and well-formed")
});

/// Table name for `resource`, rejecting anything that is not a plain
/// identifier
fn table_name(resource: &str) -> Result<&str, BackendError> {
    if RESOURCE_NAME.is_match(resource) {
        Ok(resource)
    } else {
        Err(BackendError::validation(format!("invalid resource name: {resource:?}")))
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY,
            data JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )"
    )
}

struct Session {
    client: Arc<Client>,
    driver: JoinHandle<()>,
}

pub struct RelationalBackend {
    config: RelationalConfig,
    session: RwLock<Option<Session>>,
    known_tables: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for RelationalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalBackend")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

impl RelationalBackend {
    pub fn new(config: RelationalConfig) -> Self {
        Self { config, session: RwLock::new(None), known_tables: Mutex::new(HashSet::new()) }
    }

    fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&self.config.host)
            .port(self.config.port)
            .user(&self.config.user)
            .dbname(&self.config.database)
            .connect_timeout(self.config.connect_timeout())
            .application_name("clientkey");
        if !self.config.password.is_empty() {
            pg.password(&self.config.password);
        }
        pg
    }

    async fn open_session(&self) -> Result<Session, BackendError> {
        let pg = self.pg_config();
        let connecting = async {
            if self.config.use_tls {
                let connector = native_tls::TlsConnector::new().map_err(|e| {
                    BackendError::new(format!("TLS setup failed: {e}")).with_code("TLS")
                })?;
                let tls = postgres_native_tls::MakeTlsConnector::new(connector);
                let (client, connection) = pg.connect(tls).await.map_err(IntoBackendError::into_backend)?;
                let driver = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!(error = %e, "Postgres connection ended with error");
                    }
                });
                Ok::<_, BackendError>(Session { client: Arc::new(client), driver })
            } else {
                let (client, connection) = pg.connect(NoTls).await.map_err(IntoBackendError::into_backend)?;
                let driver = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!(error = %e, "Postgres connection ended with error");
                    }
                });
                Ok::<_, BackendError>(Session { client: Arc::new(client), driver })
            }
        };

        match tokio::time::timeout(self.config.connect_timeout(), connecting).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::timed_out(format!(
                "connect to {}:{} timed out after {}ms",
                self.config.host, self.config.port, self.config.connect_timeout_ms
            ))),
        }
    }

    /// The live client, reconnecting once if the previous connection dropped
    async fn client(&self) -> Result<Arc<Client>, BackendError> {
        {
            let session = self.session.read().await;
            match session.as_ref() {
                Some(s) if !s.client.is_closed() => return Ok(s.client.clone()),
                Some(_) => debug!("Postgres connection closed, reconnecting"),
                None => {
                    return Err(BackendError::connection_refused("relational backend is not connected"))
                }
            }
        }

        let mut session = self.session.write().await;
        if let Some(s) = session.as_ref().filter(|s| !s.client.is_closed()) {
            return Ok(s.client.clone());
        }
        let fresh = self.open_session().await?;
        let client = fresh.client.clone();
        if let Some(stale) = session.replace(fresh) {
            stale.driver.abort();
        }
        self.known_tables.lock().await.clear();
        Ok(client)
    }

    async fn ensure_table(&self, client: &Client, table: &str) -> Result<(), BackendError> {
        let mut known = self.known_tables.lock().await;
        if known.contains(table) {
            return Ok(());
        }
        client.batch_execute(&create_table_sql(table)).await.map_err(IntoBackendError::into_backend)?;
        debug!(table, "Ensured resource table");
        known.insert(table.to_string());
        Ok(())
    }

    async fn select(&self, client: &Client, table: &str) -> Result<Value, BackendError> {
        let rows = client
            .query(&format!("SELECT data FROM {table} ORDER BY created_at, id"), &[])
            .await
            .map_err(IntoBackendError::into_backend)?;
        let records = rows
            .iter()
            .map(|row| row.try_get::<_, Value>(0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(IntoBackendError::into_backend)?;
        Ok(Value::Array(records))
    }

    async fn insert(&self, client: &Client, table: &str, mut record: Record) -> Result<Value, BackendError> {
        let now = Value::String(Utc::now().to_rfc3339());
        let id = match record.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = generate_id();
                record.insert("id".into(), Value::String(id.clone()));
                id
            }
        };
        record.entry("created_at").or_insert_with(|| now.clone());
        record.entry("updated_at").or_insert(now);

        let row = client
            .query_one(
                &format!(
                    "INSERT INTO {table} (id, data) VALUES ($1, $2::jsonb)
                     ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, updated_at = now()
                     RETURNING data"
                ),
                &[&id, &Value::Object(record)],
            )
            .await
            .map_err(IntoBackendError::into_backend)?;
        row.try_get::<_, Value>(0).map_err(IntoBackendError::into_backend)
    }

    async fn update(&self, client: &Client, table: &str, id: &str, mut changes: Record) -> Result<Value, BackendError> {
        changes.remove("id");
        changes
            .entry("updated_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        let row = client
            .query_opt(
                &format!(
                    "UPDATE {table} SET data = data || $2::jsonb, updated_at = now()
                     WHERE id = $1 RETURNING data"
                ),
                &[&id, &Value::Object(changes)],
            )
            .await
            .map_err(IntoBackendError::into_backend)?;
        match row {
            Some(row) => row.try_get::<_, Value>(0).map_err(IntoBackendError::into_backend),
            None => Err(BackendError::validation(format!("record not found: {table}/{id}"))),
        }
    }

    async fn delete(&self, client: &Client, table: &str, id: &str) -> Result<Value, BackendError> {
        let deleted = client
            .execute(&format!("DELETE FROM {table} WHERE id = $1"), &[&id])
            .await
            .map_err(IntoBackendError::into_backend)?;
        Ok(json!({ "id": id, "deleted": deleted > 0 }))
    }
}

fn required_id(query: &Query) -> Result<&str, BackendError> {
    query
        .record_id()
        .ok_or_else(|| BackendError::validation(format!("{} requires an id", query.op)))
}

#[async_trait]
impl StorageBackend for RelationalBackend {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Primary
    }

    #[instrument(skip(self), fields(host = %self.config.host, port = self.config.port))]
    async fn connect(&self) -> Result<(), BackendError> {
        let session = self.open_session().await?;
        session.client.simple_query("SELECT 1").await.map_err(IntoBackendError::into_backend)?;

        if let Some(stale) = self.session.write().await.replace(session) {
            stale.driver.abort();
        }
        self.known_tables.lock().await.clear();
        info!(database = %self.config.database, "Connected to relational backend");
        Ok(())
    }

    #[instrument(skip(self, query), fields(op = %query.op, resource = %query.resource))]
    async fn execute(&self, query: &Query) -> Result<Value, BackendError> {
        let table = table_name(&query.resource)?;
        let client = self.client().await?;
        self.ensure_table(&client, table).await?;

        match query.op {
            QueryOp::Select => self.select(&client, table).await,
            QueryOp::Insert => {
                let record = query
                    .payload
                    .clone()
                    .ok_or_else(|| BackendError::validation("INSERT requires a payload"))?;
                self.insert(&client, table, record).await
            }
            QueryOp::Update => {
                let id = required_id(query)?;
                let changes = query.payload.clone().unwrap_or_default();
                self.update(&client, table, id, changes).await
            }
            QueryOp::Delete => {
                let id = required_id(query)?;
                self.delete(&client, table, id).await
            }
        }
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let client = self.client().await?;
        client.simple_query("SELECT 1").await.map_err(IntoBackendError::into_backend)?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(session) = self.session.write().await.take() {
            session.driver.abort();
            info!("Relational backend connection closed");
        }
        self.known_tables.lock().await.clear();
    }
}
