//! Retry and circuit-breaker wrapper for outbound calls.
//!
//! [`RetryExecutor::execute_with_retry`] runs a fallible async operation with
//! exponential backoff and jitter. [`RetryExecutor::execute_with_circuit_breaker`]
//! adds a per-context circuit breaker on top: once a context has failed
//! `failure_threshold` times in a row, further calls fail fast until
//! `recovery_timeout` has elapsed since the last failure.

mod backoff;
mod circuit;
mod classify;
mod executor;

pub use backoff::{backoff_delay, sample_jitter, MAX_JITTER};
pub use circuit::{CircuitBreaker, CircuitState};
pub use classify::{is_retryable_status, message_indicates_transient};
pub use executor::{RetryCondition, RetryExecutor, RetryOptions};
