//! Stage trait and the built-in stage implementations.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::prompts::PromptTemplates;
use super::results::{decode, StageResult, UpstreamOutputs, ValidationReport};
use super::scoring::QualityScorer;
use super::stage::StageName;
use super::tracker::RunTracker;
use crate::errors::IdeaflowError;
use crate::gateway::AiGateway;

/// Progress reported once the model reply has arrived.
const PROGRESS_REPLIED: u8 = 60;
/// Progress reported once the reply has been decoded.
const PROGRESS_DECODED: u8 = 90;

/// Everything a stage sees when it runs.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    /// The idea as submitted.
    pub idea: &'a str,
    /// Requested output language.
    pub language: &'a str,
    /// Outputs of the stages completed so far.
    pub prior: &'a BTreeMap<StageName, StageResult>,
    tracker: Option<&'a RunTracker>,
}

impl<'a> StageInput<'a> {
    /// Creates an input whose progress reports go nowhere.
    #[must_use]
    pub fn detached(
        idea: &'a str,
        language: &'a str,
        prior: &'a BTreeMap<StageName, StageResult>,
    ) -> Self {
        Self {
            idea,
            language,
            prior,
            tracker: None,
        }
    }

    pub(crate) fn tracked(
        idea: &'a str,
        language: &'a str,
        prior: &'a BTreeMap<StageName, StageResult>,
        tracker: &'a RunTracker,
    ) -> Self {
        Self {
            idea,
            language,
            prior,
            tracker: Some(tracker),
        }
    }

    /// Reports stage-local progress to the run, if tracked.
    pub fn report_progress(&self, stage: StageName, progress: u8) {
        if let Some(tracker) = self.tracker {
            tracker.set_progress(stage, progress);
        }
    }

    /// Tells the run that `stage` was answered from the response cache.
    pub fn report_cache_hit(&self, stage: StageName) {
        if let Some(tracker) = self.tracker {
            tracker.mark_cached(stage);
        }
    }
}

/// One node of the pipeline graph.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Which node this implements.
    fn name(&self) -> StageName;

    /// Runs the stage. Errors are turned into a failed stage by the caller.
    async fn execute(&self, input: &StageInput<'_>) -> Result<StageResult, IdeaflowError>;
}

/// Renders the stage prompt, calls the gateway and recovers a JSON value.
///
/// Unrecoverable replies yield the parser's marker object rather than an
/// error, so the stage still completes.
async fn request_value(
    gateway: &AiGateway,
    prompts: &dyn PromptTemplates,
    stage: StageName,
    input: &StageInput<'_>,
) -> Result<Value, IdeaflowError> {
    let prompt = prompts.render(stage, input);
    let reply = gateway
        .call_detailed(&prompt.user, Some(prompt.system.as_str()), true, Some(stage.as_str()))
        .await?;
    if reply.cached {
        input.report_cache_hit(stage);
    }
    input.report_progress(stage, PROGRESS_REPLIED);
    let raw = reply.text;

    let outcome = gateway
        .parser()
        .parse_detailed(&raw, None, Some(stage.as_str()));
    if outcome.is_fallback() {
        warn!(stage = %stage, reply_len = raw.len(), "no structured data in reply, continuing with marker");
    } else {
        debug!(stage = %stage, strategy = %outcome.strategy, "reply decoded");
    }
    Ok(outcome.value)
}

/// Stages 1 to 4: one gateway call decoded into the stage's output type.
#[derive(Debug, Clone)]
pub struct LlmStage {
    name: StageName,
    gateway: Arc<AiGateway>,
    prompts: Arc<dyn PromptTemplates>,
}

impl LlmStage {
    /// Creates a stage backed by the gateway.
    #[must_use]
    pub fn new(name: StageName, gateway: Arc<AiGateway>, prompts: Arc<dyn PromptTemplates>) -> Self {
        Self {
            name,
            gateway,
            prompts,
        }
    }
}

#[async_trait]
impl Stage for LlmStage {
    fn name(&self) -> StageName {
        self.name
    }

    async fn execute(&self, input: &StageInput<'_>) -> Result<StageResult, IdeaflowError> {
        let value = request_value(&self.gateway, self.prompts.as_ref(), self.name, input).await?;
        let result = StageResult::from_value(self.name, value)?;
        input.report_progress(self.name, PROGRESS_DECODED);
        Ok(result)
    }
}

/// Stage 5: reviews the four upstream outputs and scores them.
#[derive(Debug, Clone)]
pub struct ValidationStage {
    gateway: Arc<AiGateway>,
    prompts: Arc<dyn PromptTemplates>,
    scorer: Arc<dyn QualityScorer>,
    min_quality_score: f64,
}

impl ValidationStage {
    /// Creates the validation stage.
    #[must_use]
    pub fn new(
        gateway: Arc<AiGateway>,
        prompts: Arc<dyn PromptTemplates>,
        scorer: Arc<dyn QualityScorer>,
        min_quality_score: f64,
    ) -> Self {
        Self {
            gateway,
            prompts,
            scorer,
            min_quality_score,
        }
    }
}

#[async_trait]
impl Stage for ValidationStage {
    fn name(&self) -> StageName {
        StageName::Validation
    }

    async fn execute(&self, input: &StageInput<'_>) -> Result<StageResult, IdeaflowError> {
        let upstream = UpstreamOutputs::narrow(input.prior)?;
        let value =
            request_value(&self.gateway, self.prompts.as_ref(), StageName::Validation, input).await?;
        let report: ValidationReport = decode(value)?;

        let score = self.scorer.score(&upstream.scoring_text());
        let report = report.scored(score, self.min_quality_score);
        info!(
            score = report.quality_score,
            threshold = self.min_quality_score,
            accepted = report.accepted,
            "deliverable scored"
        );
        input.report_progress(StageName::Validation, PROGRESS_DECODED);
        Ok(StageResult::Validation(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdeaflowConfig;
    use crate::pipeline::prompts::DefaultPromptTemplates;
    use crate::pipeline::scoring::MockQualityScorer;
    use crate::testing::{fixtures, ScriptedCompletionClient, ScriptedReply};

    fn gateway(client: Arc<ScriptedCompletionClient>) -> Arc<AiGateway> {
        Arc::new(AiGateway::new(&IdeaflowConfig::new("sk-test"), client))
    }

    #[tokio::test(start_paused = true)]
    async fn test_llm_stage_decodes_fenced_reply() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.always(
            "idea_analysis",
            ScriptedReply::text("Sure!\n```json\n{\"summary\": \"Lists\", \"core_features\": [\"share\",],}\n```"),
        );
        let stage = LlmStage::new(StageName::IdeaAnalysis, gateway(client.clone()), Arc::new(DefaultPromptTemplates));

        let prior = BTreeMap::new();
        let result = stage
            .execute(&StageInput::detached("groceries", "en", &prior))
            .await
            .unwrap();

        match result {
            StageResult::IdeaAnalysis(analysis) => {
                assert_eq!(analysis.summary, "Lists");
                assert_eq!(analysis.core_features, vec!["share"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(client.calls_for("idea_analysis"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_llm_stage_survives_prose_reply() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.always("business_strategy", ScriptedReply::text("I cannot help with that."));
        let stage = LlmStage::new(
            StageName::BusinessStrategy,
            gateway(client),
            Arc::new(DefaultPromptTemplates),
        );

        let prior = BTreeMap::new();
        let result = stage
            .execute(&StageInput::detached("idea", "en", &prior))
            .await
            .unwrap();
        match result {
            StageResult::BusinessStrategy(strategy) => {
                assert_eq!(strategy.extra.get("fallback"), Some(&Value::Bool(true)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_llm_stage_propagates_gateway_failure() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.always("technical_design", ScriptedReply::Status(401));
        let stage = LlmStage::new(
            StageName::TechnicalDesign,
            gateway(client.clone()),
            Arc::new(DefaultPromptTemplates),
        );

        let prior = BTreeMap::new();
        let err = stage
            .execute(&StageInput::detached("idea", "en", &prior))
            .await
            .unwrap_err();
        assert!(matches!(err, IdeaflowError::Retry(_)));
        assert_eq!(client.calls_for("technical_design"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_stage_scores_and_accepts() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.always("validation", ScriptedReply::text(fixtures::reply(StageName::Validation)));

        let mut scorer = MockQualityScorer::new();
        scorer
            .expect_score()
            .withf(|text: &str| text.contains("Offline-first"))
            .times(1)
            .return_const(72.5);

        let stage = ValidationStage::new(
            gateway(client),
            Arc::new(DefaultPromptTemplates),
            Arc::new(scorer),
            40.0,
        );
        let prior = fixtures::upstream_results();
        let result = stage
            .execute(&StageInput::detached("idea", "en", &prior))
            .await
            .unwrap();

        match result {
            StageResult::Validation(report) => {
                assert_eq!(report.quality_score, 72.5);
                assert!(report.accepted);
                assert!(!report.strengths.is_empty());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_stage_low_score_is_not_accepted() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.always("validation", ScriptedReply::text(fixtures::reply(StageName::Validation)));
        let mut scorer = MockQualityScorer::new();
        scorer.expect_score().return_const(12.0);

        let stage = ValidationStage::new(
            gateway(client),
            Arc::new(DefaultPromptTemplates),
            Arc::new(scorer),
            40.0,
        );
        let prior = fixtures::upstream_results();
        let result = stage
            .execute(&StageInput::detached("idea", "en", &prior))
            .await
            .unwrap();
        let StageResult::Validation(report) = result else {
            panic!("expected validation output");
        };
        assert!(!report.accepted);
    }

    #[tokio::test]
    async fn test_validation_stage_requires_upstream() {
        let client = Arc::new(ScriptedCompletionClient::new());
        let stage = ValidationStage::new(
            gateway(client.clone()),
            Arc::new(DefaultPromptTemplates),
            Arc::new(MockQualityScorer::new()),
            40.0,
        );
        let prior = BTreeMap::new();
        let err = stage
            .execute(&StageInput::detached("idea", "en", &prior))
            .await
            .unwrap_err();
        assert!(matches!(err, IdeaflowError::Stage { .. }));
        assert_eq!(client.calls_for("validation"), 0);
    }
}
