//! Stage orchestrator: drives the fixed five-stage graph.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn, Instrument};

use super::history::DurationHistory;
use super::messages::{failure_text, stage_failure_message};
use super::prompts::{DefaultPromptTemplates, PromptTemplates};
use super::results::Deliverable;
use super::run::PipelineRun;
use super::scoring::{HeuristicScorer, QualityScorer};
use super::stage::StageName;
use super::stages::{LlmStage, Stage, StageInput, ValidationStage};
use super::tracker::RunTracker;
use crate::config::{IdeaflowConfig, PipelineSettings};
use crate::errors::{FailureKind, IdeaflowError};
use crate::events::{names, noop_sink, EventSink};
use crate::gateway::AiGateway;
use crate::observability::{run_span, stage_span, SpanTimer};

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// The stage that failed first.
    pub stage: StageName,
    /// Failure category.
    pub kind: FailureKind,
    /// Localised, user-facing message.
    pub message: String,
}

/// Result of [`Orchestrator::run`].
///
/// Exactly one of `data` and `error` is set. The final run snapshot is
/// always included, so outputs of stages that completed before a failure
/// stay available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Whether the deliverable was produced.
    pub success: bool,
    /// The deliverable of a successful run.
    pub data: Option<Deliverable>,
    /// The failure of an unsuccessful run.
    pub error: Option<RunFailure>,
    /// Final state of the run.
    pub run: PipelineRun,
}

/// Runs stage 1, then stage 2, then stages 3 and 4 concurrently, then
/// stage 5 once both have completed.
///
/// The gateway, and with it the response cache and circuit map, and the
/// duration history are shared by every run of one orchestrator.
#[derive(Debug)]
pub struct Orchestrator {
    gateway: Arc<AiGateway>,
    prompts: Arc<dyn PromptTemplates>,
    scorer: Arc<dyn QualityScorer>,
    overrides: HashMap<StageName, Arc<dyn Stage>>,
    history: Arc<DurationHistory>,
    events: Arc<dyn EventSink>,
    settings: PipelineSettings,
}

impl Orchestrator {
    /// Creates an orchestrator over an existing gateway.
    #[must_use]
    pub fn new(settings: PipelineSettings, gateway: Arc<AiGateway>) -> Self {
        Self {
            gateway,
            prompts: Arc::new(DefaultPromptTemplates),
            scorer: Arc::new(HeuristicScorer::default()),
            overrides: HashMap::new(),
            history: Arc::new(DurationHistory::new()),
            events: noop_sink(),
            settings,
        }
    }

    /// Validates the configuration and builds the HTTP-backed gateway.
    ///
    /// A missing API key fails here, before any stage runs.
    pub fn from_config(config: &IdeaflowConfig) -> Result<Self, IdeaflowError> {
        let gateway = AiGateway::from_config(config)?;
        Ok(Self::new(config.pipeline, Arc::new(gateway)))
    }

    /// Routes stage and run events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the prompt templates.
    #[must_use]
    pub fn with_prompts(mut self, prompts: Arc<dyn PromptTemplates>) -> Self {
        self.prompts = prompts;
        self
    }

    /// Replaces the quality scorer used by stage 5.
    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn QualityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Replaces the implementation of one stage.
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.overrides.insert(stage.name(), stage);
        self
    }

    /// Shares a duration history with other orchestrators.
    #[must_use]
    pub fn with_history(mut self, history: Arc<DurationHistory>) -> Self {
        self.history = history;
        self
    }

    /// Returns the gateway.
    #[must_use]
    pub fn gateway(&self) -> &AiGateway {
        &self.gateway
    }

    /// Returns the duration history.
    #[must_use]
    pub fn history(&self) -> &DurationHistory {
        &self.history
    }

    /// Runs the pipeline for one idea.
    pub async fn run(&self, idea: &str, language: &str) -> RunOutcome {
        self.execute(idea, language, None).await
    }

    /// Runs the pipeline, sending a snapshot after every stage mutation.
    pub async fn run_with_updates(
        &self,
        idea: &str,
        language: &str,
        updates: UnboundedSender<PipelineRun>,
    ) -> RunOutcome {
        self.execute(idea, language, Some(updates)).await
    }

    async fn execute(
        &self,
        idea: &str,
        language: &str,
        updates: Option<UnboundedSender<PipelineRun>>,
    ) -> RunOutcome {
        let tracker = RunTracker::new(language, Arc::clone(&self.history), updates);
        let run_id = tracker.snapshot().id.to_string();
        let timer = SpanTimer::start("run");
        info!(run_id = %run_id, language, idea_len = idea.len(), "run started");

        let flow = self.drive(&tracker, &run_id, idea, language);
        let result = match tokio::time::timeout(self.settings.run_timeout, flow)
            .instrument(run_span(&run_id, language))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(self.abort_on_timeout(&tracker, language)),
        };

        let duration_ms = timer.finish();
        let run = tracker.snapshot();
        match result {
            Ok(deliverable) => {
                info!(run_id = %run_id, duration_ms, score = deliverable.metadata.quality_score, "run completed");
                self.events.emit(
                    names::RUN_COMPLETED,
                    Some(json!({
                        "run_id": run_id,
                        "duration_ms": duration_ms,
                        "quality_score": deliverable.metadata.quality_score,
                        "accepted": deliverable.validation.accepted,
                    })),
                );
                RunOutcome {
                    success: true,
                    data: Some(deliverable),
                    error: None,
                    run,
                }
            }
            Err(failure) => {
                error!(run_id = %run_id, stage = %failure.stage, kind = %failure.kind, duration_ms, "run failed");
                self.events.emit(
                    names::RUN_FAILED,
                    Some(json!({
                        "run_id": run_id,
                        "stage": failure.stage,
                        "kind": failure.kind,
                        "duration_ms": duration_ms,
                    })),
                );
                RunOutcome {
                    success: false,
                    data: None,
                    error: Some(failure),
                    run,
                }
            }
        }
    }

    async fn drive(
        &self,
        tracker: &RunTracker,
        run_id: &str,
        idea: &str,
        language: &str,
    ) -> Result<Deliverable, RunFailure> {
        self.run_stage(tracker, run_id, StageName::IdeaAnalysis, idea, language)
            .await?;
        self.run_stage(tracker, run_id, StageName::RequirementsPlanning, idea, language)
            .await?;

        let (design, strategy) = tokio::join!(
            self.run_stage(tracker, run_id, StageName::TechnicalDesign, idea, language),
            self.run_stage(tracker, run_id, StageName::BusinessStrategy, idea, language),
        );
        design?;
        strategy?;

        self.run_stage(tracker, run_id, StageName::Validation, idea, language)
            .await?;

        let processing_time_ms = u64::try_from(tracker.elapsed().as_millis()).unwrap_or(u64::MAX);
        Deliverable::assemble(idea, language, &tracker.snapshot().results, processing_time_ms)
            .map_err(|e| RunFailure {
                stage: StageName::Validation,
                kind: e.failure_kind(),
                message: stage_failure_message(StageName::Validation, e.failure_kind(), language),
            })
    }

    async fn run_stage(
        &self,
        tracker: &RunTracker,
        run_id: &str,
        name: StageName,
        idea: &str,
        language: &str,
    ) -> Result<(), RunFailure> {
        let stage = self.stage(name);
        if !tracker.start_stage(name) {
            warn!(stage = %name, "stage already started");
        }
        self.events.emit(
            names::STAGE_STARTED,
            Some(json!({ "run_id": run_id, "stage": name })),
        );

        let prior = tracker.snapshot().results;
        let input = StageInput::tracked(idea, language, &prior, tracker);
        let timer = SpanTimer::start(name.as_str());
        let outcome = stage
            .execute(&input)
            .instrument(stage_span(run_id, name.as_str()))
            .await;
        let duration_ms = timer.finish();

        match outcome {
            Ok(result) => {
                tracker.complete_stage(name, result);
                info!(stage = %name, duration_ms, "stage completed");
                self.events.emit(
                    names::STAGE_COMPLETED,
                    Some(json!({ "run_id": run_id, "stage": name, "duration_ms": duration_ms })),
                );
                Ok(())
            }
            Err(err) => {
                let kind = err.failure_kind();
                let message = stage_failure_message(name, kind, language);
                warn!(stage = %name, kind = %kind, error = %err, duration_ms, "stage failed");
                tracker.fail_stage(name, message.clone());
                self.events.emit(
                    names::STAGE_FAILED,
                    Some(json!({
                        "run_id": run_id,
                        "stage": name,
                        "kind": kind,
                        "error": err.to_string(),
                        "duration_ms": duration_ms,
                    })),
                );
                Err(RunFailure {
                    stage: name,
                    kind,
                    message,
                })
            }
        }
    }

    fn abort_on_timeout(&self, tracker: &RunTracker, language: &str) -> RunFailure {
        let current = tracker.snapshot().current_stage_index;
        let text = failure_text(FailureKind::Timeout, language);
        let failed = tracker.fail_in_flight(text);
        let stage = failed
            .first()
            .copied()
            .unwrap_or(StageName::ALL[current.min(StageName::COUNT - 1)]);
        warn!(
            stage = %stage,
            timeout_ms = u64::try_from(self.settings.run_timeout.as_millis()).unwrap_or(u64::MAX),
            in_flight = failed.len(),
            "run deadline exceeded"
        );
        for name in &failed {
            self.events.emit(
                names::STAGE_FAILED,
                Some(json!({ "stage": name, "kind": FailureKind::Timeout })),
            );
        }

        RunFailure {
            stage,
            kind: FailureKind::Timeout,
            message: stage_failure_message(stage, FailureKind::Timeout, language),
        }
    }

    fn stage(&self, name: StageName) -> Arc<dyn Stage> {
        if let Some(stage) = self.overrides.get(&name) {
            return Arc::clone(stage);
        }
        match name {
            StageName::Validation => Arc::new(ValidationStage::new(
                Arc::clone(&self.gateway),
                Arc::clone(&self.prompts),
                Arc::clone(&self.scorer),
                self.settings.min_quality_score,
            )),
            _ => Arc::new(LlmStage::new(
                name,
                Arc::clone(&self.gateway),
                Arc::clone(&self.prompts),
            )),
        }
    }
}
