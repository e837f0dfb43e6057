//! The five-stage pipeline.
//!
//! ```text
//! idea_analysis -> requirements_planning -> technical_design  \
//!                                        -> business_strategy -> validation
//! ```
//!
//! The [`Orchestrator`] drives the graph, a [`RunTracker`] owns the
//! [`PipelineRun`] of each execution and streams snapshots, and each node is
//! a [`Stage`] calling the shared [`AiGateway`](crate::gateway::AiGateway).

mod estimate;
mod history;
mod messages;
mod orchestrator;
mod prompts;
mod results;
mod run;
mod scoring;
mod stage;
mod stages;
mod tracker;

#[cfg(test)]
mod integration_tests;

pub use estimate::{estimate, StageTiming, TimeEstimate};
pub use history::{DurationHistory, HISTORY_CAPACITY};
pub use messages::{
    failure_text, language_name, normalize_language, stage_failure_message, stage_label,
    SUPPORTED_LANGUAGES,
};
pub use orchestrator::{Orchestrator, RunFailure, RunOutcome};
pub use prompts::{DefaultPromptTemplates, Prompt, PromptTemplates};
pub use results::{
    decode, BusinessStrategy, Deliverable, DeliverableMetadata, IdeaAnalysis, RequirementsPlan,
    StageResult, TechnicalDesign, UpstreamOutputs, ValidationReport,
};
pub use run::PipelineRun;
pub use scoring::{HeuristicScorer, QualityScorer};
pub use stage::{StageName, StageRecord, StageStatus};
pub use stages::{LlmStage, Stage, StageInput, ValidationStage};
pub use tracker::RunTracker;

#[cfg(test)]
pub use scoring::MockQualityScorer;
