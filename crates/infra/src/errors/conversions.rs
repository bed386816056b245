//! Conversions from external infrastructure errors into ClientKey errors
//!
//! Remote backend failures become [`BackendError`]s carrying the codes and
//! markers the classifier looks for. Local storage failures become
//! [`CommonError`]s through the [`InfraError`] newtype.

use clientkey_common::error::CommonError;
use clientkey_domain::BackendError;
use reqwest::{Error as HttpError, StatusCode};
use rusqlite::Error as SqlError;
use tokio_postgres::Error as PgError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the shared error.
#[derive(Debug)]
pub struct InfraError(pub CommonError);

impl From<InfraError> for CommonError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<CommonError> for InfraError {
    fn from(value: CommonError) -> Self {
        InfraError(value)
    }
}

/// Failures of a remote backend, expressed the way the classifier reads them
pub trait IntoBackendError {
    fn into_backend(self) -> BackendError;
}

/* -------------------------------------------------------------------------- */
/* tokio_postgres::Error → BackendError */
/* -------------------------------------------------------------------------- */

impl IntoBackendError for PgError {
    fn into_backend(self) -> BackendError {
        if let Some(db) = self.as_db_error() {
            let code = db.code().code().to_string();
            let message = db.message().to_string();
            return match code.get(..2) {
                // data exception, integrity constraint violation
                Some("22" | "23") => BackendError::validation(message).with_code(code),
                // connection exception
                Some("08") => BackendError::connection_refused(message),
                _ if code == "57014" => BackendError::timed_out(message),
                _ => BackendError::new(message).with_code(code),
            };
        }

        if self.is_closed() {
            return BackendError::connection_refused(format!("connection closed: {self}"));
        }

        let io_failure = std::error::Error::source(&self)
            .is_some_and(|source| source.is::<std::io::Error>());
        if io_failure {
            return BackendError::connection_refused(format!("connection failure: {self}"));
        }

        BackendError::new(self.to_string())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → BackendError */
/* -------------------------------------------------------------------------- */

impl IntoBackendError for HttpError {
    fn into_backend(self) -> BackendError {
        // The URL carries the API key
        let error = self.without_url();

        if error.is_timeout() {
            return BackendError::timed_out(format!("HTTP request timed out: {error}"));
        }

        if error.is_connect() {
            return BackendError::connection_refused(format!("HTTP connection failure: {error}"));
        }

        if let Some(status) = error.status() {
            return status_error(status, "");
        }

        if error.is_decode() {
            return BackendError::new(format!("malformed response body: {error}"))
                .with_code("HTTP_DECODE");
        }

        BackendError::new(error.to_string())
    }
}

/// Map a non-success HTTP status to a backend failure
///
/// 400/422 are validation failures, 408/504 are timeouts, and everything else
/// is tagged `HTTP_<status>` and left for the classifier.
pub fn status_error(status: StatusCode, detail: &str) -> BackendError {
    let code = status.as_u16();
    let reason = status.canonical_reason().unwrap_or("unknown status");
    let message = if detail.trim().is_empty() {
        format!("HTTP {code} {reason}")
    } else {
        format!("HTTP {code} {reason}: {}", detail.trim())
    };

    match code {
        400 | 422 => BackendError::validation(message).with_code(format!("HTTP_{code}")),
        408 | 504 => BackendError::timed_out(message),
        _ => BackendError::new(message).with_code(format!("HTTP_{code}")),
    }
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → CommonError */
/* -------------------------------------------------------------------------- */

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        let mapped = match value {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match err.code {
                    ErrorCode::DatabaseBusy => CommonError::lock_resource("sqlite", "database is busy"),
                    ErrorCode::DatabaseLocked => {
                        CommonError::lock_resource("sqlite", "database is locked")
                    }
                    ErrorCode::CannotOpen => CommonError::persistence_op(
                        "open",
                        format!("unable to open database file: {message}"),
                    ),
                    _ => CommonError::persistence_op(
                        "sqlite",
                        format!("sqlite failure {:?} (code {}): {}", err.code, err.extended_code, message),
                    ),
                }
            }
            RE::QueryReturnedNoRows => CommonError::not_found("sqlite row"),
            RE::FromSqlConversionFailure(_, _, cause) => {
                CommonError::serialization(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidPath(path) => CommonError::config_field(
                "local.path",
                format!("invalid database path: {}", path.to_string_lossy()),
            ),
            other => CommonError::persistence_op("sqlite", other.to_string()),
        };
        InfraError(mapped)
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → CommonError */
/* -------------------------------------------------------------------------- */

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        InfraError(CommonError::persistence_op(
            "pool",
            format!("failed to check out a sqlite connection: {value}"),
        ))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
