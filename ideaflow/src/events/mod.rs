//! Event sink system for observability.
//!
//! Components receive an `Arc<dyn EventSink>` at construction time; there is
//! no global sink. Event types used across the crate are collected in
//! [`names`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, NoOpEventSink, TracingEventSink};

use std::sync::Arc;

/// Returns a shared no-op sink.
#[must_use]
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}

/// Event type names.
pub mod names {
    /// A failed attempt will be retried after a delay.
    pub const RETRY_SCHEDULED: &str = "retry.scheduled";
    /// Every attempt failed.
    pub const RETRY_EXHAUSTED: &str = "retry.exhausted";
    /// The retry condition rejected an error.
    pub const RETRY_ABORTED: &str = "retry.aborted";
    /// A circuit tripped open.
    pub const CIRCUIT_OPENED: &str = "circuit.opened";
    /// An open circuit allowed a probe.
    pub const CIRCUIT_HALF_OPEN: &str = "circuit.half_open";
    /// A circuit recovered.
    pub const CIRCUIT_CLOSED: &str = "circuit.closed";
    /// A call was rejected by an open circuit.
    pub const CIRCUIT_REJECTED: &str = "circuit.rejected";
    /// A gateway call was served from cache.
    pub const CACHE_HIT: &str = "cache.hit";
    /// A gateway call missed the cache.
    pub const CACHE_MISS: &str = "cache.miss";
    /// An oversized prompt was split into chunks.
    pub const GATEWAY_CHUNKED: &str = "gateway.chunked";
    /// The parser needed a repair strategy.
    pub const PARSER_RECOVERED: &str = "parser.recovered";
    /// Every parser strategy failed.
    pub const PARSER_FALLBACK: &str = "parser.fallback";
    /// A stage started processing.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage completed.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage failed.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A run finished with every stage completed.
    pub const RUN_COMPLETED: &str = "run.completed";
    /// A run finished with a failed stage.
    pub const RUN_FAILED: &str = "run.failed";
}
