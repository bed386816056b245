//! Participation history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::query::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Participation,
    CorrectAnswer,
    IncorrectAnswer,
    Login,
    Logout,
}

crate::impl_domain_status_conversions!(ActivityType {
    Participation => "participation",
    CorrectAnswer => "correct_answer",
    IncorrectAnswer => "incorrect_answer",
    Login => "login",
    Logout => "logout",
});

/// A recorded activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub client_id: String,
    pub client_name: String,
    pub client_email: String,
    pub activity_type: ActivityType,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub details: Option<Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Record a new activity for a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddActivityRequest {
    pub client_id: String,
    pub client_name: String,
    pub client_email: String,
    pub activity_type: ActivityType,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub details: Option<Value>,
}

impl AddActivityRequest {
    pub fn new(
        client_id: impl Into<String>,
        client_name: impl Into<String>,
        client_email: impl Into<String>,
        activity_type: ActivityType,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_name: client_name.into(),
            client_email: client_email.into(),
            activity_type,
            points: 0,
            details: None,
        }
    }

    pub fn with_points(mut self, points: i64) -> Self {
        self.points = points;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn into_record(self, id: &str, now: DateTime<Utc>) -> Record {
        let mut record = Record::new();
        record.insert("id".into(), Value::String(id.to_string()));
        record.insert("client_id".into(), Value::String(self.client_id));
        record.insert("client_name".into(), Value::String(self.client_name.trim().to_string()));
        record.insert("client_email".into(), Value::String(self.client_email.trim().to_lowercase()));
        record.insert("activity_type".into(), Value::String(self.activity_type.as_str().to_string()));
        record.insert("points".into(), Value::from(self.points));
        record.insert("details".into(), self.details.unwrap_or(Value::Null));
        record.insert("timestamp".into(), Value::String(now.to_rfc3339()));
        record
    }
}
