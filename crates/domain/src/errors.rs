//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for ClientKey
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum ClientKeyError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for ClientKey operations
pub type Result<T> = std::result::Result<T, ClientKeyError>;

/// Failure raised by a storage backend
///
/// Backends speak very different error dialects. They are all reduced to a
/// message, an optional machine code (`ECONNREFUSED`, a SQLSTATE, `HTTP_503`)
/// and a marker for rejected input, which is what failure classification
/// inspects.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub validation: bool,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None, validation: false }
    }

    /// Input rejected by the backend
    pub fn validation(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None, validation: true }
    }

    /// The backend could not be reached
    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::new(message).with_code("ECONNREFUSED")
    }

    /// The backend did not answer in time
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(message).with_code("ETIMEDOUT")
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl From<BackendError> for ClientKeyError {
    fn from(err: BackendError) -> Self {
        if err.validation {
            ClientKeyError::InvalidInput(err.message)
        } else {
            ClientKeyError::Database(err.message)
        }
    }
}
