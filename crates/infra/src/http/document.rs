//! Document backend over a JSON REST API
//!
//! Collections live under `{base}/v1/projects/{project}/collections/{resource}`
//! and every request is authenticated with the `key` query parameter.
//! Retries are not done here; the data-access layer owns the retry policy.

use async_trait::async_trait;
use chrono::Utc;
use clientkey_common::error::CommonError;
use clientkey_core::StorageBackend;
use clientkey_domain::{generate_id, BackendError, DocumentConfig, ProviderKind, Query, QueryOp, Record};
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use crate::errors::{status_error, IntoBackendError};

const HEALTH_COLLECTION: &str = "health";

/// Secondary storage backend reached over HTTP
#[derive(Clone)]
pub struct DocumentBackend {
    client: ReqwestClient,
    config: DocumentConfig,
}

impl std::fmt::Debug for DocumentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentBackend")
            .field("base_url", &self.config.base_url)
            .field("project_id", &self.config.project_id)
            .finish_non_exhaustive()
    }
}

impl DocumentBackend {
    /// Build the backend and its HTTP client
    ///
    /// # Errors
    ///
    /// Returns a config error if the HTTP client cannot be built
    pub fn new(config: DocumentConfig) -> Result<Self, CommonError> {
        let client = ReqwestClient::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .user_agent(concat!("clientkey/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CommonError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn credentials(&self) -> Result<(&str, &str), BackendError> {
        match (self.config.project_id.as_deref(), self.config.api_key.as_deref()) {
            (Some(project), Some(key)) if !project.is_empty() && !key.is_empty() => Ok((project, key)),
            _ => Err(BackendError::connection_refused("document backend is not configured")),
        }
    }

    fn collection_url(&self, resource: &str) -> Result<String, BackendError> {
        if resource.is_empty()
            || !resource.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(BackendError::validation(format!("invalid resource name: {resource:?}")));
        }
        let (project, _) = self.credentials()?;
        Ok(format!(
            "{}/v1/projects/{project}/collections/{resource}",
            self.config.base_url.trim_end_matches('/')
        ))
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, BackendError> {
        let (_, key) = self.credentials()?;
        Ok(self.client.request(method, url).query(&[("key", key)]))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, BackendError> {
        let response = builder.send().await.map_err(IntoBackendError::into_backend)?;
        debug!(status = %response.status(), "Document API responded");
        Ok(response)
    }

    async fn list(&self, resource: &str) -> Result<Value, BackendError> {
        let url = self.collection_url(resource)?;
        let response = ensure_success(self.send(self.request(Method::GET, &url)?).await?).await?;
        match read_body(response).await? {
            Some(Value::Array(items)) => Ok(Value::Array(items)),
            Some(Value::Object(mut body)) => match body.remove("documents") {
                Some(Value::Array(items)) => Ok(Value::Array(items)),
                _ => Err(malformed("expected a list of documents")),
            },
            None => Ok(Value::Array(Vec::new())),
            Some(_) => Err(malformed("expected a list of documents")),
        }
    }

    async fn create(&self, resource: &str, mut record: Record) -> Result<Value, BackendError> {
        let now = Value::String(Utc::now().to_rfc3339());
        record.entry("id").or_insert_with(|| Value::String(generate_id()));
        record.entry("created_at").or_insert_with(|| now.clone());
        record.entry("updated_at").or_insert(now);

        let url = self.collection_url(resource)?;
        let body = Value::Object(record);
        let response =
            ensure_success(self.send(self.request(Method::POST, &url)?.json(&body)).await?).await?;
        Ok(read_body(response).await?.unwrap_or(body))
    }

    async fn patch(&self, resource: &str, id: &str, mut changes: Record) -> Result<Value, BackendError> {
        changes.remove("id");
        changes
            .entry("updated_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        let url = format!("{}/{id}", self.collection_url(resource)?);
        let response = self.send(self.request(Method::PATCH, &url)?.json(&changes)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::validation(format!("record not found: {resource}/{id}")));
        }
        let response = ensure_success(response).await?;

        match read_body(response).await? {
            Some(updated) => Ok(updated),
            None => {
                changes.insert("id".into(), Value::String(id.to_string()));
                Ok(Value::Object(changes))
            }
        }
    }

    async fn remove(&self, resource: &str, id: &str) -> Result<Value, BackendError> {
        let url = format!("{}/{id}", self.collection_url(resource)?);
        let response = self.send(self.request(Method::DELETE, &url)?).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(json!({ "id": id, "deleted": false }));
        }
        ensure_success(response).await?;
        Ok(json!({ "id": id, "deleted": true }))
    }
}

async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response.text().await.unwrap_or_default();
    Err(status_error(status, &detail))
}

/// Parsed JSON body, or `None` when the server sent nothing
async fn read_body(response: Response) -> Result<Option<Value>, BackendError> {
    let bytes = response.bytes().await.map_err(IntoBackendError::into_backend)?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&bytes).map(Some).map_err(|e| malformed(&e.to_string()))
}

fn malformed(detail: &str) -> BackendError {
    BackendError::new(format!("malformed response body: {detail}")).with_code("HTTP_DECODE")
}

#[async_trait]
impl StorageBackend for DocumentBackend {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Secondary
    }

    #[instrument(skip(self), fields(base_url = %self.config.base_url))]
    async fn connect(&self) -> Result<(), BackendError> {
        self.health_check().await?;
        info!("Connected to document backend");
        Ok(())
    }

    #[instrument(skip(self, query), fields(op = %query.op, resource = %query.resource))]
    async fn execute(&self, query: &Query) -> Result<Value, BackendError> {
        match query.op {
            QueryOp::Select => self.list(&query.resource).await,
            QueryOp::Insert => {
                let record = query
                    .payload
                    .clone()
                    .ok_or_else(|| BackendError::validation("INSERT requires a payload"))?;
                self.create(&query.resource, record).await
            }
            QueryOp::Update => {
                let id = query
                    .record_id()
                    .ok_or_else(|| BackendError::validation("UPDATE requires an id"))?;
                self.patch(&query.resource, id, query.payload.clone().unwrap_or_default()).await
            }
            QueryOp::Delete => {
                let id = query
                    .record_id()
                    .ok_or_else(|| BackendError::validation("DELETE requires an id"))?;
                self.remove(&query.resource, id).await
            }
        }
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let url = self.collection_url(HEALTH_COLLECTION)?;
        let request = self.request(Method::GET, &url)?.query(&[("limit", "1")]);
        ensure_success(self.send(request).await?).await?;
        Ok(())
    }
}
