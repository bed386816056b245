//! Common utilities shared across ClientKey crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: errors and field validation
//! - `runtime`: async resilience primitives (circuit breaker, retry, clocks)
//! - `observability`: tracing (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
#[macro_use]
pub mod error;
#[cfg(feature = "foundation")]
pub mod validation;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "runtime")]
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, MockClock, PolicyTable,
    ResilienceError, RetryConfig, RetryExecutor, RetryPolicy, Sleeper, SystemClock, TokioSleeper,
};
#[cfg(feature = "foundation")]
pub use validation::{
    EmailValidator, FieldValidator, StringValidator, ValidationError,
    ValidationResult, Validator,
};
