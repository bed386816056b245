//! Common error types shared by the ClientKey crates
//!
//! Three pieces make up the error handling infrastructure:
//!
//! 1. **`CommonError`**: reusable error shapes (configuration, persistence,
//!    serialization, lock contention, timeouts, validation, lookups).
//! 2. **`ErrorClassification`**: the interface every error type implements so
//!    callers can ask whether a failure is retryable and how severe it is.
//! 3. **`ErrorSeverity`**: a single severity scale used when logging.
//!
//! Module-specific errors compose with `CommonError` instead of duplicating
//! its variants:
//!
//! ```rust,ignore
//! #[derive(Debug, thiserror::Error)]
//! pub enum StoreError {
//!     #[error("record {0} is missing")]
//!     Missing(String),
//!
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//! }
//!
//! impl_error_classification!(StoreError, Common,
//!     Self::Missing(_) => {
//!         retryable: false,
//!         severity: ErrorSeverity::Info,
//!         critical: false,
//!     }
//! );
//! ```

use std::fmt;
use std::time::Duration;

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Common error variants that appear across multiple modules
#[derive(Debug, Clone, PartialEq)]
pub enum CommonError {
    /// Configuration-related errors
    Config { message: String, field: Option<String> },

    /// Lock acquisition or poisoning
    Lock { message: String, resource: Option<String> },

    /// Serialization or deserialization errors
    Serialization { message: String, format: Option<String> },

    /// Data persistence errors (file I/O, local storage)
    Persistence { message: String, operation: Option<String> },

    /// Timeout errors
    Timeout { operation: String, duration: Duration },

    /// Validation errors
    Validation { field: String, message: String },

    /// Resource not found errors
    NotFound { resource_type: String, identifier: Option<String> },

    /// Internal errors that shouldn't normally occur
    Internal { message: String, context: Option<String> },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message, field } => match field {
                Some(field) => write!(f, "Configuration error in field '{}': {}", field, message),
                None => write!(f, "Configuration error: {}", message),
            },
            Self::Lock { message, resource } => match resource {
                Some(resource) => write!(f, "Lock error for '{}': {}", resource, message),
                None => write!(f, "Lock error: {}", message),
            },
            Self::Serialization { message, format } => match format {
                Some(format) => write!(f, "Serialization error ({}): {}", format, message),
                None => write!(f, "Serialization error: {}", message),
            },
            Self::Persistence { message, operation } => match operation {
                Some(op) => write!(f, "Persistence error during '{}': {}", op, message),
                None => write!(f, "Persistence error: {}", message),
            },
            Self::Timeout { operation, duration } => {
                write!(f, "Operation '{}' timed out after {:?}", operation, duration)
            }
            Self::Validation { field, message } => {
                write!(f, "Validation error for field '{}': {}", field, message)
            }
            Self::NotFound { resource_type, identifier } => match identifier {
                Some(id) => write!(f, "{} not found: '{}'", resource_type, id),
                None => write!(f, "{} not found", resource_type),
            },
            Self::Internal { message, context } => match context {
                Some(ctx) => write!(f, "Internal error in '{}': {}", ctx, message),
                None => write!(f, "Internal error: {}", message),
            },
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Lock { .. } | Self::Timeout { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Lock { .. } | Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::NotFound { .. } => ErrorSeverity::Info,
            Self::Internal { .. } => ErrorSeverity::Critical,
            Self::Config { .. }
            | Self::Serialization { .. }
            | Self::Persistence { .. }
            | Self::Validation { .. } => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl CommonError {
    /// Create a simple configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), field: None }
    }

    /// Create a configuration error for a specific field
    pub fn config_field<S: Into<String>, F: Into<String>>(field: F, message: S) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    /// Create a simple lock error
    pub fn lock<S: Into<String>>(message: S) -> Self {
        Self::Lock { message: message.into(), resource: None }
    }

    /// Create a lock error for a specific resource
    pub fn lock_resource<S: Into<String>, R: Into<String>>(resource: R, message: S) -> Self {
        Self::Lock { message: message.into(), resource: Some(resource.into()) }
    }

    /// Create a simple serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization { message: message.into(), format: None }
    }

    /// Create a serialization error with format information
    pub fn serialization_format<S: Into<String>, F: Into<String>>(format: F, message: S) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }

    /// Create a simple persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence { message: message.into(), operation: None }
    }

    /// Create a persistence error for a specific operation
    pub fn persistence_op<S: Into<String>, O: Into<String>>(operation: O, message: S) -> Self {
        Self::Persistence { message: message.into(), operation: Some(operation.into()) }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    /// Create a validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Create a not found error
    pub fn not_found<T: Into<String>>(resource_type: T) -> Self {
        Self::NotFound { resource_type: resource_type.into(), identifier: None }
    }

    /// Create a not found error with identifier
    pub fn not_found_with_id<T: Into<String>, I: Into<String>>(
        resource_type: T,
        identifier: I,
    ) -> Self {
        Self::NotFound { resource_type: resource_type.into(), identifier: Some(identifier.into()) }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), context: None }
    }

    /// Create an internal error with context
    pub fn internal_with_context<S: Into<String>, C: Into<String>>(message: S, context: C) -> Self {
        Self::Internal { message: message.into(), context: Some(context.into()) }
    }

    /// Short machine-friendly name of the variant, used as a log field
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Lock { .. } => "lock",
            Self::Serialization { .. } => "serialization",
            Self::Persistence { .. } => "persistence",
            Self::Timeout { .. } => "timeout",
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Standard interface for classifying errors by their characteristics
pub trait ErrorClassification {
    /// Whether the failed operation may succeed if attempted again
    fn is_retryable(&self) -> bool;

    /// Severity used for logging decisions
    fn severity(&self) -> ErrorSeverity;

    /// Whether the error points at a broken invariant rather than a
    /// transient condition
    fn is_critical(&self) -> bool;

    /// Suggested retry delay, if the error carries one
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Degraded but operational
    Warning,
    /// Requires attention
    Error,
    /// Immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

// Standard conversions from common error types
impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_format("JSON", err.to_string())
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization_format("TOML", err.to_string())
    }
}

/// Utility macro for creating error conversions from std types
///
/// Generates `From<serde_json::Error>` and `From<std::io::Error>` for an error
/// enum whose `$variant` wraps a `CommonError`.
///
/// ```rust,ignore
/// #[derive(Debug, thiserror::Error)]
/// pub enum MyError {
///     #[error(transparent)]
///     Common(#[from] CommonError),
/// }
///
/// impl_error_conversion!(MyError, Common);
/// ```
#[macro_export]
macro_rules! impl_error_conversion {
    ($error_type:ty, $variant:ident) => {
        impl From<serde_json::Error> for $error_type {
            fn from(err: serde_json::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }

        impl From<std::io::Error> for $error_type {
            fn from(err: std::io::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }
    };
}

/// Macro to implement ErrorClassification by delegating to CommonError
///
/// Variants other than the embedded `CommonError` one are listed with their
/// classification; `retry_after` is optional per arm.
#[macro_export]
macro_rules! impl_error_classification {
    (
        $error_type:ty,
        $common_variant:ident
        $(,
            $variant:pat => {
                retryable: $retryable:expr,
                severity: $severity:expr,
                critical: $critical:expr
                $(, retry_after: $retry_after:expr)?
                $(,)?
            }
        )*
        $(,)?
    ) => {
        impl $crate::error::ErrorClassification for $error_type {
            fn is_retryable(&self) -> bool {
                match self {
                    Self::$common_variant(e) => e.is_retryable(),
                    $(
                        #[allow(unused_variables)]
                        $variant => $retryable,
                    )*
                }
            }

            fn severity(&self) -> $crate::error::ErrorSeverity {
                match self {
                    Self::$common_variant(e) => e.severity(),
                    $(
                        #[allow(unused_variables)]
                        $variant => $severity,
                    )*
                }
            }

            fn is_critical(&self) -> bool {
                match self {
                    Self::$common_variant(e) => e.is_critical(),
                    $(
                        #[allow(unused_variables)]
                        $variant => $critical,
                    )*
                }
            }

            fn retry_after(&self) -> Option<std::time::Duration> {
                match self {
                    Self::$common_variant(e) => e.retry_after(),
                    $(
                        $(
                            $variant => $retry_after,
                        )?
                    )*
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}
