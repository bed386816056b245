//! Resilience patterns for fault tolerance
//!
//! - **Circuit Breaker**: stops calling a dependency after repeated failures
//!   and probes it again once a cooldown has passed
//! - **Retry Executor**: re-runs a failed operation under a policy chosen per
//!   failure, with exponential backoff and jitter
//!
//! Both are generic over the operation's error type. Time is injected through
//! [`Clock`] and [`Sleeper`], so tests drive them with [`MockClock`] instead
//! of waiting.

pub mod circuit_breaker;
pub mod clock;
pub mod retry;

// Re-export circuit breaker types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilderWithClock, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitBreakerMetrics, CircuitState, ConfigError, ConfigResult,
    ResilienceError, ResilienceResult,
};
pub use clock::{Clock, MockClock, Sleeper, SystemClock, TokioSleeper};
// Re-export retry types
pub use retry::{
    Jitter, PolicyTable, RetryConfig, RetryConfigBuilder, RetryExecutor, RetryOutcome, RetryPolicy,
};
