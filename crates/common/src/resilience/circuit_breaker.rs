//! Circuit breaker guarding a single backend
//!
//! The breaker counts failed logical calls. Once `failure_threshold` failures
//! accumulate it opens and every call is rejected without touching the
//! backend. After `cooldown` has passed since the last failure, the next
//! state query moves it to half-open and exactly `half_open_max_calls` probes
//! are let through: a success closes it again, a failure re-opens it.
//!
//! Any recorded success resets the failure count, whatever the state.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};

//==============================================================================
// Error Types
//==============================================================================

/// Simple configuration error for validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Errors produced by an operation run through the breaker
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open, rejecting calls
    #[error("Circuit breaker is open, rejecting calls")]
    CircuitOpen { retry_after: Option<Duration> },

    /// The underlying operation failed
    #[error("Operation failed: {source}")]
    OperationFailed {
        #[source]
        source: E,
    },
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Cooldown elapsed, a limited number of probes may run
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

//==============================================================================
// Configuration
//==============================================================================

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit
    pub failure_threshold: u64,
    /// Time since the last failure before the circuit may half-open
    pub cooldown: Duration,
    /// Probes admitted while half-open
    pub half_open_max_calls: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_secs(30), half_open_max_calls: 1 }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }
        if self.cooldown.is_zero() {
            return Err(ConfigError::Invalid {
                message: "cooldown must be greater than 0".to_string(),
            });
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::Invalid {
                message: "half_open_max_calls must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for circuit breaker configuration
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u64) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    /// Switch to building a breaker bound to `clock`
    pub fn clock<C: Clock>(self, clock: C) -> CircuitBreakerBuilderWithClock<C> {
        CircuitBreakerBuilderWithClock { config: self.config, clock }
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder variant that produces a breaker with a custom clock
#[derive(Debug)]
pub struct CircuitBreakerBuilderWithClock<C: Clock> {
    config: CircuitBreakerConfig,
    clock: C,
}

impl<C: Clock> CircuitBreakerBuilderWithClock<C> {
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown = cooldown;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u64) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreaker<C>> {
        CircuitBreaker::with_clock(self.config, self.clock)
    }
}

//==============================================================================
// Circuit Breaker
//==============================================================================

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    pub half_open_calls: u64,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub last_failure_time: Option<Instant>,
    pub state_change_time: Instant,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    half_open_calls: u64,
    total_calls: u64,
    rejected_calls: u64,
    last_failure_time: Option<Instant>,
    state_change_time: Instant,
}

/// Generic circuit breaker implementation
///
/// Cloned handles share state. The clock is injectable so cooldown behavior
/// can be tested with [`MockClock`](super::MockClock).
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerState>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a circuit breaker using the builder pattern
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        let now = clock.now();

        Ok(Self {
            config,
            inner: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_calls: 0,
                total_calls: 0,
                rejected_calls: 0,
                last_failure_time: None,
                state_change_time: now,
            })),
            clock: Arc::new(clock),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            warn!("Circuit breaker state lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Move Open to HalfOpen once the cooldown has elapsed
    fn refresh(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }
        let now = self.clock.now();
        let cooled_down = inner
            .last_failure_time
            .map_or(true, |failed_at| now.duration_since(failed_at) >= self.config.cooldown);
        if cooled_down {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_calls = 0;
            inner.state_change_time = now;
            info!(failure_count = inner.failure_count, "Circuit breaker half-open, allowing probe");
        }
    }

    /// Whether the circuit is currently rejecting calls
    ///
    /// Performs the Open to HalfOpen transition when the cooldown has passed,
    /// so repeated calls at the same instant always agree.
    pub fn is_open(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state == CircuitState::Open
    }

    /// Check if the circuit breaker would admit a call right now
    pub fn can_execute(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => inner.half_open_calls < self.config.half_open_max_calls,
        }
    }

    /// Admit a call, claiming a probe slot when half-open
    ///
    /// Returns `false` (and counts a rejection) when the call must be
    /// short-circuited.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        let admitted = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        };
        if admitted {
            inner.total_calls += 1;
        } else {
            inner.rejected_calls += 1;
        }
        admitted
    }

    /// Give back a probe slot claimed by `try_acquire` without recording an
    /// outcome
    pub fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
        }
    }

    /// Time left before an open circuit may half-open
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let inner = self.lock();
        if inner.state != CircuitState::Open {
            return None;
        }
        let failed_at = inner.last_failure_time?;
        let elapsed = self.clock.now().duration_since(failed_at);
        Some(self.config.cooldown.saturating_sub(elapsed))
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Every error counts as a failure. Use
    /// [`execute_classified`](Self::execute_classified) when some errors say
    /// nothing about the health of the dependency.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_classified(operation, |_| true).await
    }

    /// Execute an operation, recording failures only for errors where
    /// `counts_as_failure` returns true
    ///
    /// Errors that do not count neither trip nor reset the breaker. If such an
    /// error ends a half-open probe, the probe slot is released.
    #[instrument(skip(self, operation, counts_as_failure), fields(state = %self.get_state()))]
    pub async fn execute_classified<F, Fut, T, E, P>(
        &self,
        operation: F,
        counts_as_failure: P,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
        P: FnOnce(&E) -> bool,
    {
        if !self.try_acquire() {
            debug!("Circuit breaker rejecting call - state: {}", self.get_state());
            return Err(ResilienceError::CircuitOpen { retry_after: self.cooldown_remaining() });
        }

        match operation().await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(error) => {
                if counts_as_failure(&error) {
                    self.record_failure();
                } else {
                    self.release_probe();
                }
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Record a successful operation
    ///
    /// Resets the failure count and closes the circuit from any state.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        let previous = inner.state;
        inner.success_count += 1;
        inner.failure_count = 0;
        inner.half_open_calls = 0;
        inner.state = CircuitState::Closed;
        if previous != CircuitState::Closed {
            inner.state_change_time = self.clock.now();
            info!(previous = %previous, "Circuit breaker closed after successful call");
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = self.clock.now();
        inner.failure_count += 1;
        inner.last_failure_time = Some(now);

        let should_open = match inner.state {
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if should_open {
            let previous = inner.state;
            inner.state = CircuitState::Open;
            inner.half_open_calls = 0;
            inner.state_change_time = now;
            warn!(
                failure_count = inner.failure_count,
                previous = %previous,
                cooldown_ms = u64::try_from(self.config.cooldown.as_millis()).unwrap_or(u64::MAX),
                "Circuit breaker opened"
            );
        }
    }

    /// Get the recorded state without applying the cooldown transition
    pub fn get_state(&self) -> CircuitState {
        self.lock().state
    }

    /// Failures recorded since the last success
    pub fn failure_count(&self) -> u64 {
        self.lock().failure_count
    }

    /// Get circuit breaker metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            half_open_calls: inner.half_open_calls,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            last_failure_time: inner.last_failure_time,
            state_change_time: inner.state_change_time,
        }
    }

    /// The configuration this breaker was built with
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_calls = 0;
        inner.last_failure_time = None;
        inner.state_change_time = self.clock.now();
        info!("Circuit breaker manually reset to closed state");
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the circuit breaker
    //!
    //! Tests cover state transitions, configuration validation, the
    //! cooldown-driven half-open transition, and probe admission.

    use std::fmt;

    use super::*;
    use crate::resilience::MockClock;

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }

    impl std::error::Error for Boom {}

    fn breaker(threshold: u64, clock: &MockClock) -> CircuitBreaker<MockClock> {
        CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .cooldown(Duration::from_secs(30))
            .clock(clock.clone())
            .build()
            .expect("valid config")
    }

    /// Validates the default configuration values.
    ///
    /// Assertions:
    /// - Confirms the threshold is 5, the cooldown 30s and one probe.
    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown, Duration::from_secs(30));
        assert_eq!(config.half_open_max_calls, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_values() {
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().cooldown(Duration::ZERO).build().is_err());
        assert!(CircuitBreakerConfig::builder().half_open_max_calls(0).build().is_err());
    }

    /// Tests that circuit opens when failure threshold is reached
    #[test]
    fn test_opens_after_threshold_failures() {
        let clock = MockClock::new();
        let cb = breaker(5, &clock);

        for _ in 0..4 {
            cb.record_failure();
        }
        assert!(!cb.is_open(), "Should remain closed below threshold");

        cb.record_failure();
        assert!(cb.is_open(), "Should open at threshold");
        assert!(!cb.can_execute());
    }

    /// Validates the cooldown transition without an explicit reset.
    ///
    /// Assertions:
    /// - Ensures `cb.is_open()` is true just before the cooldown.
    /// - Ensures `cb.is_open()` is false once the cooldown elapsed.
    /// - Confirms the failure count is retained in half-open.
    #[test]
    fn test_half_opens_after_cooldown() {
        let clock = MockClock::new();
        let cb = breaker(5, &clock);
        for _ in 0..5 {
            cb.record_failure();
        }

        clock.advance(Duration::from_millis(29_999));
        assert!(cb.is_open());

        clock.advance_millis(1);
        assert!(!cb.is_open());
        assert!(!cb.is_open(), "Repeated queries must agree");
        assert_eq!(cb.get_state(), CircuitState::HalfOpen);
        assert_eq!(cb.failure_count(), 5);
    }

    #[test]
    fn test_half_open_admits_exactly_one_probe() {
        let clock = MockClock::new();
        let cb = breaker(1, &clock);
        cb.record_failure();
        clock.advance(Duration::from_secs(30));

        assert!(cb.try_acquire());
        assert!(!cb.try_acquire(), "Second probe must be rejected");
        assert_eq!(cb.metrics().rejected_calls, 1);
    }

    #[test]
    fn test_probe_failure_reopens() {
        let clock = MockClock::new();
        let cb = breaker(5, &clock);
        for _ in 0..5 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(31));
        assert!(cb.try_acquire());

        cb.record_failure();
        assert!(cb.is_open());
        assert_eq!(cb.cooldown_remaining(), Some(Duration::from_secs(30)));
    }

    /// Validates `record_success` resets from every state.
    ///
    /// Assertions:
    /// - Confirms `failure_count()` equals 0 after success from closed, open
    ///   and half-open.
    #[test]
    fn test_record_success_resets_from_any_state() {
        let clock = MockClock::new();
        let cb = breaker(3, &clock);

        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);

        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.get_state(), CircuitState::Open);
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.get_state(), CircuitState::Closed);

        for _ in 0..3 {
            cb.record_failure();
        }
        clock.advance(Duration::from_secs(30));
        assert!(!cb.is_open());
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.get_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_execute_rejects_while_open() {
        let clock = MockClock::new();
        let cb = breaker(1, &clock);
        cb.record_failure();

        let result: ResilienceResult<u32, Boom> = cb.execute(|| async { Ok(1) }).await;
        match result {
            Err(ResilienceError::CircuitOpen { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(30)));
            }
            other => panic!("expected circuit open, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_records_outcomes() {
        let clock = MockClock::new();
        let cb = breaker(2, &clock);

        let failed: ResilienceResult<u32, Boom> = cb.execute(|| async { Err(Boom) }).await;
        assert!(matches!(failed, Err(ResilienceError::OperationFailed { .. })));
        assert_eq!(cb.failure_count(), 1);

        let ok: ResilienceResult<u32, Boom> = cb.execute(|| async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.metrics().total_calls, 2);
    }

    #[tokio::test]
    async fn test_execute_classified_ignores_uncounted_errors() {
        let clock = MockClock::new();
        let cb = breaker(1, &clock);
        cb.record_failure();
        clock.advance(Duration::from_secs(30));

        let result: ResilienceResult<u32, Boom> =
            cb.execute_classified(|| async { Err(Boom) }, |_| false).await;
        assert!(result.is_err());
        assert_eq!(cb.get_state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire(), "Probe slot must be released");
    }

    #[test]
    fn test_reset_closes_circuit() {
        let clock = MockClock::new();
        let cb = breaker(1, &clock);
        cb.record_failure();
        cb.reset();
        assert_eq!(cb.get_state(), CircuitState::Closed);
        assert!(cb.metrics().last_failure_time.is_none());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }
}
