//! # Ideaflow
//!
//! A resilient multi-stage LLM pipeline that turns a free-form idea into a
//! structured deliverable.
//!
//! Ideaflow provides:
//!
//! - **Staged generation**: five dependent stages, with the technical and
//!   business stages running concurrently
//! - **Resilient gateway**: retries with jittered backoff, a circuit breaker,
//!   a bounded response cache and chunking of oversized prompts
//! - **Output recovery**: a layered parser that repairs malformed JSON
//! - **Progress tracking**: live run snapshots with completion estimates
//! - **Event-driven observability**: structured events and tracing spans
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ideaflow::prelude::*;
//!
//! let config = IdeaflowConfig::from_env()?;
//! let orchestrator = Orchestrator::from_config(&config)?;
//!
//! let outcome = orchestrator.run("A shared grocery list app", "en").await;
//! if let Some(deliverable) = outcome.data {
//!     println!("{}", deliverable.validation.verdict);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod config;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod observability;
pub mod parser;
pub mod pipeline;
pub mod retry;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{IdeaflowConfig, PipelineSettings};
    pub use crate::errors::{FailureKind, GatewayError, IdeaflowError};
    pub use crate::events::{CollectingEventSink, EventSink, NoOpEventSink, TracingEventSink};
    pub use crate::gateway::{AiGateway, CompletionClient, HttpCompletionClient};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::parser::RecoveryParser;
    pub use crate::pipeline::{
        Deliverable, Orchestrator, PipelineRun, RunFailure, RunOutcome, Stage, StageInput,
        StageName, StageResult, StageStatus, TimeEstimate,
    };
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn library_compiles() {
        let config = IdeaflowConfig::new("sk-test");
        assert!(config.validate().is_ok());
        assert_eq!(StageName::ALL.len(), 5);
    }
}
