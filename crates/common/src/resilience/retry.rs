//! Retry executor driven by a per-error policy table
//!
//! Each failure is mapped to a [`RetryPolicy`] by a [`PolicyTable`]. The
//! policy is looked up again after every failed attempt, so a call whose
//! failures change character midway (a timeout followed by a refused
//! connection, say) is governed by the policy of its most recent failure.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use super::clock::{Sleeper, TokioSleeper};

/// Retry parameters for one class of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Double the delay on every attempt and add jitter
    pub exponential_backoff: bool,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, exponential_backoff: bool) -> Self {
        Self { max_attempts, base_delay, exponential_backoff }
    }

    /// A policy that never retries
    pub const fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, false)
    }

    /// Whether a failure under this policy may be retried at all
    pub const fn is_retryable(&self) -> bool {
        self.max_attempts > 1
    }
}

/// Maps a failure to the policy that governs what happens next
pub trait PolicyTable<E> {
    /// Policy for `error`
    fn policy_for(&self, error: &E) -> RetryPolicy;

    /// Short label for `error`, used in log fields
    fn label(&self, _error: &E) -> &'static str {
        "error"
    }
}

impl<E, F> PolicyTable<E> for F
where
    F: Fn(&E) -> RetryPolicy,
{
    fn policy_for(&self, error: &E) -> RetryPolicy {
        self(error)
    }
}

/// Random delay added on top of exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    max: Duration,
}

impl Jitter {
    /// No jitter
    pub const fn none() -> Self {
        Self { max: Duration::ZERO }
    }

    /// Uniform jitter in `[0, max)`
    pub const fn up_to(max: Duration) -> Self {
        Self { max }
    }

    pub fn sample(&self) -> Duration {
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

/// Configuration shared by every policy the executor applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Jitter added when a policy uses exponential backoff
    pub jitter: Jitter,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { jitter: Jitter::up_to(Duration::from_secs(1)), max_delay: Duration::from_secs(30) }
    }
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed)
    ///
    /// `base` without backoff, otherwise `base * 2^(attempt-1) + jitter`;
    /// capped at `max_delay` either way.
    pub fn delay_for(&self, attempt: u32, policy: &RetryPolicy) -> Duration {
        let delay = if policy.exponential_backoff {
            let exponent = attempt.saturating_sub(1).min(31);
            policy.base_delay.saturating_mul(1u32 << exponent) + self.jitter.sample()
        } else {
            policy.base_delay
        };
        delay.min(self.max_delay)
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn no_jitter(self) -> Self {
        self.jitter(Jitter::none())
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.config.max_delay = max_delay;
        self
    }

    pub fn build(self) -> RetryConfig {
        self.config
    }
}

/// Outcome of a retry execution including summary statistics
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    /// Consume the outcome and return only the result
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// The main retry executor
pub struct RetryExecutor<P, S = TokioSleeper> {
    config: RetryConfig,
    table: P,
    sleeper: S,
}

impl<P: fmt::Debug, S> fmt::Debug for RetryExecutor<P, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl<P> RetryExecutor<P, TokioSleeper> {
    /// Create a retry executor that sleeps on the tokio timer
    pub fn new(config: RetryConfig, table: P) -> Self {
        Self::with_sleeper(config, table, TokioSleeper)
    }
}

impl<P, S: Sleeper> RetryExecutor<P, S> {
    /// Create a retry executor with a custom sleeper (useful for testing)
    pub fn with_sleeper(config: RetryConfig, table: P, sleeper: S) -> Self {
        Self { config, table, sleeper }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn table(&self) -> &P {
        &self.table
    }

    /// Run `operation` until it succeeds or its latest failure's policy says
    /// stop; the last failure is returned unchanged
    pub async fn execute<F, Fut, T, E>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        P: PolicyTable<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_outcome(operation_name, operation).await.into_result()
    }

    /// Like [`execute`](Self::execute), also reporting attempts and delay
    #[instrument(skip(self, operation), fields(operation = operation_name))]
    pub async fn execute_with_outcome<F, Fut, T, E>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        P: PolicyTable<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 1;
        let mut total_delay = Duration::ZERO;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retrying");
                    }
                    return RetryOutcome { result: Ok(value), attempts: attempt, total_delay };
                }
                Err(error) => {
                    let policy = self.table.policy_for(&error);
                    let kind = self.table.label(&error);

                    if !policy.is_retryable() {
                        debug!(attempt, kind, error = %error, "Failure is not retryable");
                        return RetryOutcome { result: Err(error), attempts: attempt, total_delay };
                    }

                    if attempt >= policy.max_attempts {
                        warn!(
                            attempt,
                            max_attempts = policy.max_attempts,
                            kind,
                            error = %error,
                            "Retry attempts exhausted"
                        );
                        return RetryOutcome { result: Err(error), attempts: attempt, total_delay };
                    }

                    let delay = self.config.delay_for(attempt, &policy);
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        kind,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                    total_delay += delay;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the policy-driven retry executor
    //!
    //! Tests cover delay computation, the no-retry fast path, exhaustion, and
    //! per-attempt re-policying.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::resilience::MockClock;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Failure {
        Flaky,
        Fatal,
        Slow,
    }

    impl fmt::Display for Failure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn table(error: &Failure) -> RetryPolicy {
        match error {
            Failure::Flaky => RetryPolicy::new(5, Duration::from_millis(2000), true),
            Failure::Fatal => RetryPolicy::no_retry(),
            Failure::Slow => RetryPolicy::new(3, Duration::from_millis(1000), false),
        }
    }

    fn executor(clock: &MockClock) -> RetryExecutor<fn(&Failure) -> RetryPolicy, MockClock> {
        RetryExecutor::with_sleeper(
            RetryConfig::builder().no_jitter().build(),
            table as fn(&Failure) -> RetryPolicy,
            clock.clone(),
        )
    }

    /// Validates the backoff formula and the 30s ceiling.
    ///
    /// Assertions:
    /// - Confirms doubling from the base delay.
    /// - Confirms the cap applies.
    /// - Confirms fixed policies ignore the attempt number.
    #[test]
    fn test_delay_for_exponential_and_fixed() {
        let config = RetryConfig::builder().no_jitter().build();
        let backoff = RetryPolicy::new(5, Duration::from_millis(2000), true);
        assert_eq!(config.delay_for(1, &backoff), Duration::from_millis(2000));
        assert_eq!(config.delay_for(2, &backoff), Duration::from_millis(4000));
        assert_eq!(config.delay_for(4, &backoff), Duration::from_millis(16000));
        assert_eq!(config.delay_for(5, &backoff), Duration::from_secs(30));
        assert_eq!(config.delay_for(40, &backoff), Duration::from_secs(30));

        let fixed = RetryPolicy::new(3, Duration::from_millis(1000), false);
        assert_eq!(config.delay_for(3, &fixed), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig::default();
        let policy = RetryPolicy::new(2, Duration::from_millis(1500), true);
        for _ in 0..100 {
            let delay = config.delay_for(1, &policy);
            assert!(delay >= Duration::from_millis(1500));
            assert!(delay < Duration::from_millis(2500));
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success_never_sleeps() {
        let clock = MockClock::new();
        let outcome = executor(&clock)
            .execute_with_outcome("get_clients", || async { Ok::<_, Failure>(42) })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(clock.sleep_count(), 0);
    }

    /// Validates non-retryable failures are raised after one attempt.
    ///
    /// Assertions:
    /// - Confirms the operation ran exactly once.
    /// - Confirms no sleep was requested.
    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let clock = MockClock::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), Failure> = executor(&clock)
            .execute("add_client", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(Failure::Fatal) }
            })
            .await;

        assert_eq!(result.unwrap_err(), Failure::Fatal);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(clock.sleep_count(), 0);
    }

    #[tokio::test]
    async fn test_exhausts_policy_attempts() {
        let clock = MockClock::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let outcome = executor(&clock)
            .execute_with_outcome("add_client", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Failure::Flaky) }
            })
            .await;

        assert_eq!(outcome.attempts, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(8000),
                Duration::from_millis(16000),
            ]
        );
        assert_eq!(outcome.total_delay, Duration::from_millis(30000));
    }

    #[tokio::test]
    async fn test_recovers_after_retry() {
        let clock = MockClock::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = executor(&clock)
            .execute("update_client", move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Failure::Slow)
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(1000); 2]);
    }

    /// Validates the policy is re-read after every failure.
    ///
    /// Assertions:
    /// - A slow failure followed by a fatal one stops at the fatal one.
    /// - A flaky failure at attempt 3 stops once the slow policy's 3 attempts
    ///   are reached.
    #[tokio::test]
    async fn test_policy_is_reselected_per_attempt() {
        let clock = MockClock::new();
        let script = Arc::new(std::sync::Mutex::new(vec![Failure::Fatal, Failure::Slow]));
        let pending = Arc::clone(&script);

        let outcome = executor(&clock)
            .execute_with_outcome("add_activity", move || {
                let next = pending.lock().unwrap().pop();
                async move { Err::<(), _>(next.unwrap_or(Failure::Fatal)) }
            })
            .await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result.unwrap_err(), Failure::Fatal);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(1000)]);

        let clock = MockClock::new();
        let script = Arc::new(std::sync::Mutex::new(vec![
            Failure::Slow,
            Failure::Flaky,
            Failure::Flaky,
        ]));
        let pending = Arc::clone(&script);
        let outcome = executor(&clock)
            .execute_with_outcome("add_activity", move || {
                let next = pending.lock().unwrap().pop();
                async move { Err::<(), _>(next.unwrap_or(Failure::Fatal)) }
            })
            .await;
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap_err(), Failure::Slow);
    }
}
