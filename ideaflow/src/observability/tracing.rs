//! Span helpers for pipeline runs and stages.

use tokio::time::Instant;
use tracing::{info_span, Span};

/// Creates the span that wraps a whole run.
#[must_use]
pub fn run_span(run_id: &str, language: &str) -> Span {
    info_span!("ideaflow.run", run_id = %run_id, language = %language)
}

/// Creates the span that wraps one stage of a run.
#[must_use]
pub fn stage_span(run_id: &str, stage: &str) -> Span {
    info_span!("ideaflow.stage", run_id = %run_id, stage = %stage)
}

/// Measures elapsed time on the tokio clock.
#[derive(Debug, Clone)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Returns the timer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and returns the elapsed milliseconds.
    #[must_use]
    pub fn finish(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::trace!(span = %self.name, elapsed_ms = elapsed, "timer finished");
        elapsed
    }
}
