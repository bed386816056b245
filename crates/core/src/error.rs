//! Errors surfaced by the data-access layer

use std::time::Duration;

use clientkey_common::error::{CommonError, ErrorSeverity};
use clientkey_common::impl_error_classification;
use clientkey_common::validation::ValidationError;
use clientkey_domain::BackendError;
use thiserror::Error;

use crate::classifier::{classify, ErrorKind};

#[derive(Debug, Error)]
pub enum DataAccessError {
    #[error("Connection error: {0}")]
    Connection(#[source] BackendError),

    #[error("Timeout error: {0}")]
    Timeout(#[source] BackendError),

    #[error("Validation error: {0}")]
    Validation(#[source] BackendError),

    #[error("Unknown error: {0}")]
    Unknown(#[source] BackendError),

    /// Short-circuited by the breaker; the backend was not called
    #[error("Circuit breaker is open")]
    CircuitOpen { retry_after: Option<Duration> },

    /// Rejected at the boundary before any backend was touched
    #[error("{0}")]
    InvalidRequest(#[from] ValidationError),

    #[error("Data access is not initialized: {0}")]
    NotInitialized(String),

    #[error(transparent)]
    Common(#[from] CommonError),
}

pub type DataAccessResult<T> = Result<T, DataAccessError>;

impl DataAccessError {
    /// Wrap a backend failure under the kind it was classified as
    pub fn from_backend(kind: ErrorKind, error: BackendError) -> Self {
        match kind {
            ErrorKind::Connection => Self::Connection(error),
            ErrorKind::Timeout => Self::Timeout(error),
            ErrorKind::Validation => Self::Validation(error),
            ErrorKind::Unknown => Self::Unknown(error),
        }
    }

    /// The backend failure behind this error, if there is one
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Self::Connection(e) | Self::Timeout(e) | Self::Validation(e) | Self::Unknown(e) => {
                Some(e)
            }
            _ => None,
        }
    }

    /// Classified kind, for statistics
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Validation(_) | Self::InvalidRequest(_) => ErrorKind::Validation,
            Self::Unknown(_) => ErrorKind::Unknown,
            Self::CircuitOpen { .. } | Self::NotInitialized(_) => ErrorKind::Connection,
            Self::Common(CommonError::Validation { .. }) => ErrorKind::Validation,
            Self::Common(_) => ErrorKind::Unknown,
        }
    }

    /// Whether local fallback may stand in for the failed call
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Unknown(_) | Self::CircuitOpen { .. }
        )
    }
}

impl From<BackendError> for DataAccessError {
    fn from(error: BackendError) -> Self {
        let kind = classify(Some(&error));
        Self::from_backend(kind, error)
    }
}

impl_error_classification!(
    DataAccessError,
    Common,
    Self::Connection(_) | Self::Timeout(_) => {
        retryable: true,
        severity: ErrorSeverity::Warning,
        critical: false,
    },
    Self::Validation(_) | Self::InvalidRequest(_) => {
        retryable: false,
        severity: ErrorSeverity::Info,
        critical: false,
    },
    Self::Unknown(_) => {
        retryable: true,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::CircuitOpen { retry_after } => {
        retryable: true,
        severity: ErrorSeverity::Warning,
        critical: false,
        retry_after: *retry_after,
    },
    Self::NotInitialized(_) => {
        retryable: false,
        severity: ErrorSeverity::Critical,
        critical: true,
    },
);
