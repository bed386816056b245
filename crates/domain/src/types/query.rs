//! Storage-agnostic query surface
//!
//! Every backend understands the same four verbs over a named resource. A
//! payload is a flat JSON object; its `id` key identifies the record for
//! UPDATE and DELETE.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A record as stored by any backend
pub type Record = serde_json::Map<String, Value>;

/// Generate a new record identifier (time-ordered UUID v7)
pub fn generate_id() -> String {
    Uuid::now_v7().to_string()
}

/// Query verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryOp {
    Select,
    Insert,
    Update,
    Delete,
}

crate::impl_domain_status_conversions!(QueryOp {
    Select => "SELECT",
    Insert => "INSERT",
    Update => "UPDATE",
    Delete => "DELETE",
});

impl QueryOp {
    pub fn is_write(&self) -> bool {
        !matches!(self, QueryOp::Select)
    }
}

/// One backend call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub op: QueryOp,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Record>,
}

impl Query {
    pub fn new(op: QueryOp, resource: impl Into<String>, payload: Option<Record>) -> Self {
        Self { op, resource: resource.into(), payload }
    }

    pub fn select(resource: impl Into<String>) -> Self {
        Self::new(QueryOp::Select, resource, None)
    }

    pub fn insert(resource: impl Into<String>, record: Record) -> Self {
        Self::new(QueryOp::Insert, resource, Some(record))
    }

    /// UPDATE carries the id inside the payload next to the changed fields
    pub fn update(resource: impl Into<String>, id: &str, mut changes: Record) -> Self {
        changes.insert("id".to_string(), Value::String(id.to_string()));
        Self::new(QueryOp::Update, resource, Some(changes))
    }

    pub fn delete(resource: impl Into<String>, id: &str) -> Self {
        let mut payload = Record::new();
        payload.insert("id".to_string(), Value::String(id.to_string()));
        Self::new(QueryOp::Delete, resource, Some(payload))
    }

    /// The `id` field of the payload, if present and a string
    pub fn record_id(&self) -> Option<&str> {
        self.payload.as_ref()?.get("id")?.as_str()
    }

    /// Look up a string field of the payload
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.as_ref()?.get(key)?.as_str()
    }
}

/// Uniform answer of the generic `query` entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, data: Value::Null, error: Some(error.into()) }
    }
}
