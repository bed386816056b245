//! Failure classification and the retry policy table
//!
//! Backends report failures in their own words. Classification looks at the
//! message and code, case-insensitively, and settles on one [`ErrorKind`]
//! using a fixed priority: connection, then timeout, then validation.

use std::time::Duration;

use clientkey_common::resilience::{PolicyTable, RetryPolicy};
use clientkey_domain::BackendError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Connection,
    Timeout,
    Validation,
    Unknown,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const CONNECTION_MARKERS: &[&str] = &["connection", "network", "connect", "enotfound", "econnrefused"];
const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out"];
const VALIDATION_MARKERS: &[&str] = &["validation", "invalid", "required"];

/// Classify a failure; no failure at all is `Unknown`
pub fn classify(error: Option<&BackendError>) -> ErrorKind {
    let Some(error) = error else {
        return ErrorKind::Unknown;
    };

    let message = error.message.to_lowercase();
    let code = error.code.as_deref().unwrap_or_default().to_lowercase();
    let mentions = |markers: &[&str]| {
        markers.iter().any(|marker| message.contains(marker) || code.contains(marker))
    };

    if mentions(CONNECTION_MARKERS) {
        ErrorKind::Connection
    } else if mentions(TIMEOUT_MARKERS) || code == "etimedout" {
        ErrorKind::Timeout
    } else if error.validation || mentions(VALIDATION_MARKERS) {
        ErrorKind::Validation
    } else {
        ErrorKind::Unknown
    }
}

/// Retry policy per error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicies {
    pub connection: RetryPolicy,
    pub timeout: RetryPolicy,
    pub validation: RetryPolicy,
    pub unknown: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            connection: RetryPolicy::new(5, Duration::from_millis(2_000), true),
            timeout: RetryPolicy::new(3, Duration::from_millis(1_000), true),
            validation: RetryPolicy::no_retry(),
            unknown: RetryPolicy::new(2, Duration::from_millis(1_500), true),
        }
    }
}

impl RetryPolicies {
    pub fn for_kind(&self, kind: ErrorKind) -> RetryPolicy {
        match kind {
            ErrorKind::Connection => self.connection,
            ErrorKind::Timeout => self.timeout,
            ErrorKind::Validation => self.validation,
            ErrorKind::Unknown => self.unknown,
        }
    }
}

impl PolicyTable<BackendError> for RetryPolicies {
    fn policy_for(&self, error: &BackendError) -> RetryPolicy {
        self.for_kind(classify(Some(error)))
    }

    fn label(&self, error: &BackendError) -> &'static str {
        classify(Some(error)).as_str()
    }
}
