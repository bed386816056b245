//! Logical operations
//!
//! `OperationKind` is the closed set of things callers ask the data-access
//! layer to do. Fallback handlers are registered per kind, and the replay
//! queue remembers the kind of every write it holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::query::{Query, QueryOp, Record};
use crate::constants::{
    ACTIVITIES_RESOURCE, CLIENTS_RESOURCE, DEFAULT_ACTIVITY_LIMIT, OPERATION_ID_PREFIX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    GetClients,
    AddClient,
    UpdateClient,
    DeleteClient,
    AddActivity,
    GetActivities,
    FindClient,
}

crate::impl_domain_status_conversions!(OperationKind {
    GetClients => "getClients",
    AddClient => "addClient",
    UpdateClient => "updateClient",
    DeleteClient => "deleteClient",
    AddActivity => "addActivity",
    GetActivities => "getActivities",
    FindClient => "findClient",
});

impl OperationKind {
    pub const ALL: [OperationKind; 7] = [
        OperationKind::GetClients,
        OperationKind::AddClient,
        OperationKind::UpdateClient,
        OperationKind::DeleteClient,
        OperationKind::AddActivity,
        OperationKind::GetActivities,
        OperationKind::FindClient,
    ];

    /// Writes are queued for replay when served locally
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            OperationKind::AddClient
                | OperationKind::UpdateClient
                | OperationKind::DeleteClient
                | OperationKind::AddActivity
        )
    }

    /// Map a generic query onto the logical operation it performs
    pub fn from_query(op: QueryOp, resource: &str) -> Option<Self> {
        match (op, resource) {
            (QueryOp::Insert, CLIENTS_RESOURCE) => Some(OperationKind::AddClient),
            (QueryOp::Select, CLIENTS_RESOURCE) => Some(OperationKind::GetClients),
            (QueryOp::Update, CLIENTS_RESOURCE) => Some(OperationKind::UpdateClient),
            (QueryOp::Delete, CLIENTS_RESOURCE) => Some(OperationKind::DeleteClient),
            (QueryOp::Insert, ACTIVITIES_RESOURCE) => Some(OperationKind::AddActivity),
            (QueryOp::Select, ACTIVITIES_RESOURCE) => Some(OperationKind::GetActivities),
            _ => None,
        }
    }
}

/// A typed, already-validated request
///
/// Records inside have been normalized and carry their identity, so the same
/// payload can be written locally and later replayed remotely.
#[derive(Debug, Clone, PartialEq)]
pub enum DataRequest {
    GetClients,
    AddClient(Record),
    UpdateClient { id: String, changes: Record },
    DeleteClient { id: String },
    AddActivity(Record),
    GetActivities { client_id: Option<String>, limit: usize },
    FindClient { term: String },
}

impl DataRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            DataRequest::GetClients => OperationKind::GetClients,
            DataRequest::AddClient(_) => OperationKind::AddClient,
            DataRequest::UpdateClient { .. } => OperationKind::UpdateClient,
            DataRequest::DeleteClient { .. } => OperationKind::DeleteClient,
            DataRequest::AddActivity(_) => OperationKind::AddActivity,
            DataRequest::GetActivities { .. } => OperationKind::GetActivities,
            DataRequest::FindClient { .. } => OperationKind::FindClient,
        }
    }

    /// The backend call that carries out this request
    pub fn to_query(&self) -> Query {
        match self {
            DataRequest::GetClients | DataRequest::FindClient { .. } => {
                Query::select(CLIENTS_RESOURCE)
            }
            DataRequest::AddClient(record) => Query::insert(CLIENTS_RESOURCE, record.clone()),
            DataRequest::UpdateClient { id, changes } => {
                Query::update(CLIENTS_RESOURCE, id, changes.clone())
            }
            DataRequest::DeleteClient { id } => Query::delete(CLIENTS_RESOURCE, id),
            DataRequest::AddActivity(record) => Query::insert(ACTIVITIES_RESOURCE, record.clone()),
            DataRequest::GetActivities { .. } => Query::select(ACTIVITIES_RESOURCE),
        }
    }

    /// Recognize a generic query as a logical operation
    ///
    /// Returns `None` for resources without a logical counterpart, and for
    /// UPDATE/DELETE queries that do not name a record.
    pub fn from_query(query: &Query) -> Option<Self> {
        let kind = OperationKind::from_query(query.op, &query.resource)?;
        let payload = query.payload.clone().unwrap_or_default();
        let request = match kind {
            OperationKind::GetClients => DataRequest::GetClients,
            OperationKind::AddClient => DataRequest::AddClient(payload),
            OperationKind::UpdateClient => {
                let id = query.record_id()?.to_string();
                let mut changes = payload;
                changes.remove("id");
                DataRequest::UpdateClient { id, changes }
            }
            OperationKind::DeleteClient => {
                DataRequest::DeleteClient { id: query.record_id()?.to_string() }
            }
            OperationKind::AddActivity => DataRequest::AddActivity(payload),
            OperationKind::GetActivities => DataRequest::GetActivities {
                client_id: query.payload_str("client_id").map(str::to_string),
                limit: payload
                    .get("limit")
                    .and_then(serde_json::Value::as_u64)
                    .and_then(|l| usize::try_from(l).ok())
                    .unwrap_or(DEFAULT_ACTIVITY_LIMIT),
            },
            OperationKind::FindClient => return None,
        };
        Some(request)
    }
}

/// A write waiting to be re-applied to the remote backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayOperation {
    pub id: String,
    pub kind: OperationKind,
    pub query: Query,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempt_count: u32,
}

impl ReplayOperation {
    pub fn new(kind: OperationKind, query: Query, created_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("{OPERATION_ID_PREFIX}{}", uuid::Uuid::now_v7().simple()),
            kind,
            query,
            created_at,
            attempt_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn query_mapping_table() {
        use OperationKind as K;
        use QueryOp as Op;

        assert_eq!(K::from_query(Op::Insert, "clients"), Some(K::AddClient));
        assert_eq!(K::from_query(Op::Select, "clients"), Some(K::GetClients));
        assert_eq!(K::from_query(Op::Update, "clients"), Some(K::UpdateClient));
        assert_eq!(K::from_query(Op::Delete, "clients"), Some(K::DeleteClient));
        assert_eq!(K::from_query(Op::Insert, "client_activities"), Some(K::AddActivity));
        assert_eq!(K::from_query(Op::Select, "client_activities"), Some(K::GetActivities));
        assert_eq!(K::from_query(Op::Delete, "client_activities"), None);
        assert_eq!(K::from_query(Op::Select, "audit_log"), None);
    }

    #[test]
    fn write_kinds() {
        let writes: Vec<_> = OperationKind::ALL.iter().filter(|k| k.is_write()).collect();
        assert_eq!(writes.len(), 4);
        assert!(!OperationKind::FindClient.is_write());
    }

    #[test]
    fn update_request_round_trips_through_query() {
        let mut changes = Record::new();
        changes.insert("name".into(), json!("Bia"));
        let request = DataRequest::UpdateClient { id: "c1".into(), changes };

        let query = request.to_query();
        assert_eq!(query.op, QueryOp::Update);
        assert_eq!(DataRequest::from_query(&query), Some(request));
    }

    #[test]
    fn delete_without_id_is_not_recognized() {
        let query = Query::new(QueryOp::Delete, "clients", None);
        assert_eq!(DataRequest::from_query(&query), None);
    }

    #[test]
    fn activities_query_reads_filter_from_payload() {
        let mut payload = Record::new();
        payload.insert("client_id".into(), json!("c9"));
        payload.insert("limit".into(), json!(5));
        let query = Query::new(QueryOp::Select, "client_activities", Some(payload));

        assert_eq!(
            DataRequest::from_query(&query),
            Some(DataRequest::GetActivities { client_id: Some("c9".into()), limit: 5 })
        );
    }

    #[test]
    fn replay_operation_ids_are_prefixed_and_serialize_kind() {
        let op = ReplayOperation::new(
            OperationKind::AddClient,
            Query::select("clients"),
            Utc::now(),
        );
        assert!(op.id.starts_with("op_"));
        assert_eq!(op.attempt_count, 0);

        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], json!("addClient"));
    }
}
