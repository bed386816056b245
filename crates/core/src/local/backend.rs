use async_trait::async_trait;
use chrono::Utc;
use clientkey_common::CommonError;
use clientkey_domain::{BackendError, ProviderKind, Query, QueryOp, Record};
use serde_json::{json, Value};
use tracing::instrument;

use super::LocalTables;
use crate::ports::StorageBackend;

/// [`StorageBackend`] served entirely from local storage
#[derive(Debug, Clone)]
pub struct LocalBackend {
    tables: LocalTables,
}

impl LocalBackend {
    pub fn new(tables: LocalTables) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &LocalTables {
        &self.tables
    }
}

fn local_failure(err: CommonError) -> BackendError {
    match err {
        CommonError::NotFound { resource_type, identifier } => BackendError::validation(format!(
            "record not found: {resource_type}/{}",
            identifier.unwrap_or_default()
        )),
        other => BackendError::new(other.to_string()).with_code("LOCAL_STORAGE"),
    }
}

fn required_id(query: &Query) -> Result<&str, BackendError> {
    query
        .record_id()
        .ok_or_else(|| BackendError::validation(format!("{} requires an id", query.op)))
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.health_check().await
    }

    #[instrument(skip(self, query), fields(op = %query.op, resource = %query.resource))]
    async fn execute(&self, query: &Query) -> Result<Value, BackendError> {
        let resource = query.resource.as_str();
        let now = Utc::now();

        match query.op {
            QueryOp::Select => {
                let records = self.tables.load(resource).map_err(local_failure)?;
                Ok(Value::Array(records.into_iter().map(Value::Object).collect()))
            }
            QueryOp::Insert => {
                let payload = query
                    .payload
                    .clone()
                    .ok_or_else(|| BackendError::validation("INSERT requires a payload"))?;
                let stored = self.tables.insert(resource, payload, now).map_err(local_failure)?;
                Ok(Value::Object(stored))
            }
            QueryOp::Update => {
                let id = required_id(query)?;
                let changes = query.payload.clone().unwrap_or_else(Record::new);
                let stored =
                    self.tables.update(resource, id, &changes, now).map_err(local_failure)?;
                Ok(Value::Object(stored))
            }
            QueryOp::Delete => {
                let id = required_id(query)?;
                let deleted = self.tables.delete(resource, id).map_err(local_failure)?;
                Ok(json!({ "id": id, "deleted": deleted }))
            }
        }
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        self.tables.store().get_item("health").map(|_| ()).map_err(local_failure)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::classifier::{classify, ErrorKind};
    use crate::local::MemoryLocalStore;

    fn backend() -> LocalBackend {
        LocalBackend::new(LocalTables::new(Arc::new(MemoryLocalStore::new())))
    }

    #[tokio::test]
    async fn crud_through_queries() {
        let backend = backend();
        let mut payload = Record::new();
        payload.insert("name".into(), json!("Ana"));

        let inserted = backend.execute(&Query::insert("clients", payload)).await.unwrap();
        let id = inserted["id"].as_str().unwrap().to_string();

        let mut changes = Record::new();
        changes.insert("name".into(), json!("Ana Maria"));
        let updated = backend.execute(&Query::update("clients", &id, changes)).await.unwrap();
        assert_eq!(updated["name"], json!("Ana Maria"));

        let listed = backend.execute(&Query::select("clients")).await.unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let deleted = backend.execute(&Query::delete("clients", &id)).await.unwrap();
        assert_eq!(deleted, json!({"id": id, "deleted": true}));
        assert_eq!(backend.execute(&Query::select("clients")).await.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn update_of_missing_record_fails_fast() {
        let err = backend()
            .execute(&Query::update("clients", "ghost", Record::new()))
            .await
            .unwrap_err();
        assert!(err.message.contains("record not found"));
        assert_eq!(classify(Some(&err)), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn delete_without_id_is_rejected() {
        let query = Query::new(QueryOp::Delete, "clients", None);
        let err = backend().execute(&query).await.unwrap_err();
        assert!(err.validation);
    }

    #[tokio::test]
    async fn always_connects() {
        let backend = backend();
        assert!(backend.connect().await.is_ok());
        assert_eq!(backend.provider(), ProviderKind::Local);
    }
}
