//! Per-context circuit breaker.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CircuitBreakerConfig;
use crate::events::{names, EventSink, NoOpEventSink};

/// Observable circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    #[default]
    Closed,
    /// Calls fail fast.
    Open,
    /// The cool-down elapsed; a single trial call is admitted.
    HalfOpen,
}

#[derive(Debug, Clone)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Instant,
    /// Start of the outstanding half-open trial call, if any.
    trial_started: Option<Instant>,
}

/// Tracks consecutive failures per context string.
///
/// Entries are created on the first failure and dropped on success.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, Circuit>>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("circuits", &self.circuits.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Creates a breaker that emits no events.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decides whether a call for `context` may proceed.
    ///
    /// Returns the remaining cool-down when the circuit is open. An open
    /// circuit whose cool-down has elapsed moves to half-open and admits one
    /// trial call; others are rejected until that call is recorded. A trial
    /// that is never recorded is replaced after another cool-down.
    pub fn try_acquire(&self, context: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let recovery = self.config.recovery_timeout;
        let mut circuits = self.circuits.lock();
        let Some(circuit) = circuits.get_mut(context) else {
            return Ok(());
        };

        let rejection = match circuit.state {
            CircuitState::Closed => return Ok(()),
            CircuitState::Open => {
                let elapsed = now.duration_since(circuit.last_failure);
                (elapsed < recovery).then(|| recovery - elapsed)
            }
            CircuitState::HalfOpen => circuit.trial_started.and_then(|started| {
                let elapsed = now.duration_since(started);
                (elapsed < recovery).then(|| recovery - elapsed)
            }),
        };

        if let Some(retry_after) = rejection {
            drop(circuits);
            self.events.emit(
                names::CIRCUIT_REJECTED,
                Some(json!({
                    "context": context,
                    "retry_after_ms": duration_ms(retry_after),
                })),
            );
            return Err(retry_after);
        }

        circuit.state = CircuitState::HalfOpen;
        circuit.trial_started = Some(now);
        drop(circuits);
        info!(context = %context, "circuit half-open, allowing probe");
        self.events
            .emit(names::CIRCUIT_HALF_OPEN, Some(json!({ "context": context })));
        Ok(())
    }

    /// Records a successful call, closing and forgetting the circuit.
    pub fn record_success(&self, context: &str) {
        let previous = self.circuits.lock().remove(context);
        if let Some(circuit) = previous {
            if circuit.state != CircuitState::Closed {
                info!(context = %context, "circuit closed");
                self.events
                    .emit(names::CIRCUIT_CLOSED, Some(json!({ "context": context })));
            }
        }
    }

    /// Records a failed call, opening the circuit at the threshold or when a
    /// half-open probe fails.
    pub fn record_failure(&self, context: &str) {
        let now = Instant::now();
        let mut circuits = self.circuits.lock();
        let circuit = circuits.entry(context.to_string()).or_insert(Circuit {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: now,
            trial_started: None,
        });
        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
        circuit.last_failure = now;
        circuit.trial_started = None;

        let opens = match circuit.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => circuit.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if !opens {
            return;
        }

        circuit.state = CircuitState::Open;
        let failures = circuit.consecutive_failures;
        drop(circuits);

        warn!(
            context = %context,
            failures,
            recovery_ms = duration_ms(self.config.recovery_timeout),
            "circuit opened"
        );
        self.events.emit(
            names::CIRCUIT_OPENED,
            Some(json!({
                "context": context,
                "consecutive_failures": failures,
                "recovery_timeout_ms": duration_ms(self.config.recovery_timeout),
            })),
        );
    }

    /// Returns the state a call for `context` would observe now.
    #[must_use]
    pub fn state(&self, context: &str) -> CircuitState {
        let circuits = self.circuits.lock();
        match circuits.get(context) {
            None => CircuitState::Closed,
            Some(c) if c.state == CircuitState::Open
                && c.last_failure.elapsed() >= self.config.recovery_timeout =>
            {
                CircuitState::HalfOpen
            }
            Some(c) => c.state,
        }
    }

    /// Returns the consecutive failure count for `context`.
    #[must_use]
    pub fn consecutive_failures(&self, context: &str) -> u32 {
        self.circuits
            .lock()
            .get(context)
            .map_or(0, |c| c.consecutive_failures)
    }

    /// Forgets the circuit for `context`.
    pub fn reset(&self, context: &str) {
        self.circuits.lock().remove(context);
    }

    /// Forgets every circuit.
    pub fn reset_all(&self) {
        self.circuits.lock().clear();
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
