//! Registered clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::query::Record;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    #[default]
    Active,
    Inactive,
}

crate::impl_domain_status_conversions!(ClientStatus {
    Active => "active",
    Inactive => "inactive",
});

/// A client as stored by any backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub whatsapp: Option<String>,
    #[serde(default)]
    pub status: ClientStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Client {
    /// Case-insensitive substring match on email or name
    pub fn matches_term(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        !term.is_empty()
            && (self.email.to_lowercase().contains(&term) || self.name.to_lowercase().contains(&term))
    }
}

/// Register a new client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddClientRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub whatsapp: Option<String>,
    #[serde(default)]
    pub status: Option<ClientStatus>,
}

impl AddClientRequest {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self { name: name.into(), email: email.into(), whatsapp: None, status: None }
    }

    pub fn with_whatsapp(mut self, whatsapp: impl Into<String>) -> Self {
        self.whatsapp = Some(whatsapp.into());
        self
    }

    /// Email as it is stored: trimmed and lowercased
    pub fn normalized_email(&self) -> String {
        self.email.trim().to_lowercase()
    }

    /// Build the stored record, assigning identity and timestamps
    pub fn into_record(self, id: &str, now: DateTime<Utc>) -> Record {
        let email = self.normalized_email();
        let mut record = Record::new();
        record.insert("id".into(), Value::String(id.to_string()));
        record.insert("name".into(), Value::String(self.name.trim().to_string()));
        record.insert("email".into(), Value::String(email));
        record.insert(
            "whatsapp".into(),
            self.whatsapp.map(|w| Value::String(w.trim().to_string())).unwrap_or(Value::Null),
        );
        record.insert(
            "status".into(),
            Value::String(self.status.unwrap_or_default().as_str().to_string()),
        );
        let stamp = Value::String(now.to_rfc3339());
        record.insert("created_at".into(), stamp.clone());
        record.insert("updated_at".into(), stamp);
        record
    }
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateClientRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub whatsapp: Option<String>,
    #[serde(default)]
    pub status: Option<ClientStatus>,
}

impl UpdateClientRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.whatsapp.is_none() && self.status.is_none()
    }

    pub fn into_changes(self, now: DateTime<Utc>) -> Record {
        let mut changes = Record::new();
        if let Some(name) = self.name {
            changes.insert("name".into(), Value::String(name.trim().to_string()));
        }
        if let Some(email) = self.email {
            changes.insert("email".into(), Value::String(email.trim().to_lowercase()));
        }
        if let Some(whatsapp) = self.whatsapp {
            changes.insert("whatsapp".into(), Value::String(whatsapp.trim().to_string()));
        }
        if let Some(status) = self.status {
            changes.insert("status".into(), Value::String(status.as_str().to_string()));
        }
        changes.insert("updated_at".into(), Value::String(now.to_rfc3339()));
        changes
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn add_request_normalizes_and_defaults_status() {
        let request = AddClientRequest::new("  Ana  ", " Ana@X.com ");
        let record = request.into_record("c1", fixed_now());

        assert_eq!(record["id"], json!("c1"));
        assert_eq!(record["name"], json!("Ana"));
        assert_eq!(record["email"], json!("ana@x.com"));
        assert_eq!(record["status"], json!("active"));
        assert_eq!(record["whatsapp"], Value::Null);
        assert_eq!(record["created_at"], record["updated_at"]);
    }

    #[test]
    fn stored_record_reads_back_as_client() {
        let record = AddClientRequest::new("Ana", "ana@x.com")
            .with_whatsapp("11 98765-4321")
            .into_record("c1", fixed_now());

        let client: Client = serde_json::from_value(Value::Object(record)).unwrap();
        assert_eq!(client.id, "c1");
        assert_eq!(client.whatsapp.as_deref(), Some("11 98765-4321"));
        assert_eq!(client.status, ClientStatus::Active);
        assert_eq!(client.created_at, Some(fixed_now()));
    }

    #[test]
    fn update_changes_only_set_fields() {
        let changes = UpdateClientRequest {
            status: Some(ClientStatus::Inactive),
            ..Default::default()
        }
        .into_changes(fixed_now());

        assert_eq!(changes.len(), 2);
        assert_eq!(changes["status"], json!("inactive"));
        assert!(changes.contains_key("updated_at"));
        assert!(UpdateClientRequest::default().is_empty());
    }

    #[test]
    fn term_matching() {
        let client = Client {
            id: "c1".into(),
            name: "Ana Souza".into(),
            email: "ana@x.com".into(),
            whatsapp: None,
            status: ClientStatus::Active,
            created_at: None,
            updated_at: None,
        };

        assert!(client.matches_term("SOUZA"));
        assert!(client.matches_term("@x.com"));
        assert!(!client.matches_term("bruno"));
        assert!(!client.matches_term("  "));
    }
}
