//! Observability utilities: subscriber setup, spans and timers.

mod subscriber;
mod tracing;

pub use self::subscriber::{init_tracing, LogFormat};
pub use self::tracing::{run_span, stage_span, SpanTimer};
