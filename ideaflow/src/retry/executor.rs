//! Retry executor.

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::backoff::{backoff_delay, sample_jitter};
use super::circuit::CircuitBreaker;
use crate::config::{CircuitBreakerConfig, RetrySettings};
use crate::errors::{RetryError, Retryable};
use crate::events::{names, EventSink, NoOpEventSink};

/// Predicate deciding whether an error is worth another attempt.
pub type RetryCondition<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Options for one retried call.
pub struct RetryOptions<E> {
    /// Total attempts, including the first.
    pub max_retries: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Names the call in errors, events and the circuit map.
    pub context: String,
    /// Overrides [`Retryable::is_retryable`] when set.
    pub retry_condition: Option<RetryCondition<E>>,
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            context: self.context.clone(),
            retry_condition: self.retry_condition.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("context", &self.context)
            .field("retry_condition", &self.retry_condition.is_some())
            .finish()
    }
}

impl<E> RetryOptions<E> {
    /// Creates options from retry settings.
    #[must_use]
    pub fn new(context: impl Into<String>, settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
            context: context.into(),
            retry_condition: None,
        }
    }

    /// Sets the total attempt count.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base and maximum delays.
    #[must_use]
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Sets a custom retry condition.
    #[must_use]
    pub fn with_retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(condition));
        self
    }
}

impl<E: Retryable> RetryOptions<E> {
    fn should_retry(&self, error: &E) -> bool {
        match &self.retry_condition {
            Some(condition) => condition(error),
            None => error.is_retryable(),
        }
    }
}

/// Executes operations with retries and an optional circuit breaker.
///
/// The circuit map is owned by the executor; share one executor (behind an
/// `Arc`) between every caller that should see the same circuits.
#[derive(Debug)]
pub struct RetryExecutor {
    breaker: CircuitBreaker,
    events: Arc<dyn EventSink>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl RetryExecutor {
    /// Creates an executor that emits no events.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(config),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink for retry and circuit events.
    #[must_use]
    pub fn with_events(self, events: Arc<dyn EventSink>) -> Self {
        Self {
            breaker: self.breaker.with_events(Arc::clone(&events)),
            events,
        }
    }

    /// Returns the circuit breaker.
    #[must_use]
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Runs `op` until it succeeds, the retry condition rejects an error, or
    /// `max_retries` attempts have been made.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        mut op: F,
        options: &RetryOptions<E>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Retryable + 'static,
    {
        let max_attempts = options.max_retries.max(1);
        let context = options.context.as_str();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(context = %context, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !options.should_retry(&error) {
                warn!(context = %context, attempt, error = %error, "non-retryable failure");
                self.events.emit(
                    names::RETRY_ABORTED,
                    Some(json!({
                        "context": context,
                        "attempt": attempt,
                        "error": error.to_string(),
                    })),
                );
                return Err(RetryError::NotRetryable {
                    context: context.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            if attempt >= max_attempts {
                warn!(context = %context, attempts = attempt, error = %error, "retries exhausted");
                self.events.emit(
                    names::RETRY_EXHAUSTED,
                    Some(json!({
                        "context": context,
                        "attempts": attempt,
                        "error": error.to_string(),
                    })),
                );
                return Err(RetryError::Exhausted {
                    context: context.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = backoff_delay(attempt, options.base_delay, options.max_delay, sample_jitter());
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            debug!(
                context = %context,
                attempt,
                delay_ms,
                error = %error,
                "retrying after failure"
            );
            self.events.emit(
                names::RETRY_SCHEDULED,
                Some(json!({
                    "context": context,
                    "attempt": attempt,
                    "delay_ms": delay_ms,
                    "error": error.to_string(),
                })),
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Like [`Self::execute_with_retry`], guarded by the circuit for
    /// `options.context`.
    ///
    /// An open circuit fails fast without invoking `op`. The circuit is
    /// updated once with the outcome of the whole retry loop.
    pub async fn execute_with_circuit_breaker<T, E, F, Fut>(
        &self,
        op: F,
        options: &RetryOptions<E>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Retryable + 'static,
    {
        if let Err(retry_after) = self.breaker.try_acquire(&options.context) {
            debug!(context = %options.context, ?retry_after, "circuit open, failing fast");
            return Err(RetryError::CircuitOpen {
                context: options.context.clone(),
                retry_after,
            });
        }

        let result = self.execute_with_retry(op, options).await;
        match &result {
            Ok(_) => self.breaker.record_success(&options.context),
            Err(_) => self.breaker.record_failure(&options.context),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GatewayError;
    use crate::events::CollectingEventSink;
    use crate::retry::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn options(context: &str, max_retries: u32) -> RetryOptions<GatewayError> {
        RetryOptions::new(context, &RetrySettings::default()).with_max_retries(max_retries)
    }

    fn executor() -> (RetryExecutor, Arc<CollectingEventSink>) {
        let events = Arc::new(CollectingEventSink::new());
        let executor = RetryExecutor::new(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        })
        .with_events(events.clone());
        (executor, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let (executor, events) = executor();
        let calls = &AtomicU32::new(0);

        let result = executor
            .execute_with_retry(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, GatewayError>(42)
                },
                &options("ctx", 3),
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let (executor, events) = executor();
        let calls = &AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = executor
            .execute_with_retry(
                move || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(GatewayError::http(503, "unavailable"))
                    } else {
                        Ok("done")
                    }
                },
                &options("planning", 3),
            )
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(events.count(names::RETRY_SCHEDULED), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(3300), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_wraps_last_error() {
        let (executor, events) = executor();
        let calls = &AtomicU32::new(0);

        let err = executor
            .execute_with_retry(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(GatewayError::http(429, "slow down"))
                },
                &options("analysis", 3),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
        assert_eq!(err.context(), "analysis");
        assert_eq!(err.last_error().and_then(GatewayError::status), Some(429));
        assert_eq!(events.count(names::RETRY_EXHAUSTED), 1);
        assert_eq!(events.count(names::RETRY_SCHEDULED), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let (executor, events) = executor();
        let calls = &AtomicU32::new(0);

        let err = executor
            .execute_with_retry(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(GatewayError::http(401, "bad key"))
                },
                &options("ctx", 5),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RetryError::NotRetryable { attempts: 1, .. }));
        assert_eq!(events.count(names::RETRY_ABORTED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_retry_condition() {
        let (executor, _) = executor();
        let calls = &AtomicU32::new(0);
        let opts = options("ctx", 4).with_retry_condition(|e: &GatewayError| e.status() == Some(404));

        let err = executor
            .execute_with_retry(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(GatewayError::http(404, "not yet"))
                },
                &opts,
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_fails_fast_then_probes() {
        let (executor, events) = executor();
        let calls = &AtomicU32::new(0);
        let opts = options("design", 1);

        for _ in 0..2 {
            let _ = executor
                .execute_with_circuit_breaker(
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(GatewayError::http(500, "boom"))
                    },
                    &opts,
                )
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(executor.circuit_breaker().state("design"), CircuitState::Open);

        let err = executor
            .execute_with_circuit_breaker(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, GatewayError>(())
                },
                &opts,
            )
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(60)).await;

        let ok = executor
            .execute_with_circuit_breaker(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, GatewayError>("probe")
                },
                &opts,
            )
            .await;
        assert_eq!(ok.unwrap(), "probe");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.circuit_breaker().state("design"), CircuitState::Closed);
        assert_eq!(events.count(names::CIRCUIT_OPENED), 1);
        assert_eq!(events.count(names::CIRCUIT_CLOSED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_counts_whole_call_once() {
        let (executor, _) = executor();
        let opts = options("business", 3);

        let _ = executor
            .execute_with_circuit_breaker(
                move || async move { Err::<(), _>(GatewayError::http(502, "bad gateway")) },
                &opts,
            )
            .await;

        assert_eq!(executor.circuit_breaker().consecutive_failures("business"), 1);
        assert_eq!(executor.circuit_breaker().state("business"), CircuitState::Closed);
    }
}
