//! End-to-end pipeline scenarios over a scripted completion client.

#[cfg(test)]
mod tests {
    use crate::config::{IdeaflowConfig, PipelineSettings};
    use crate::errors::{FailureKind, IdeaflowError};
    use crate::events::{names, CollectingEventSink};
    use crate::gateway::AiGateway;
    use crate::pipeline::{
        MockQualityScorer, Orchestrator, PipelineRun, Stage, StageInput, StageName, StageResult,
        StageStatus,
    };
    use crate::testing::{
        assert_run_failed_at, assert_run_succeeded, assert_stage_status, fixtures,
        ScriptedCompletionClient, ScriptedReply,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config() -> IdeaflowConfig {
        IdeaflowConfig::new("sk-test")
    }

    fn orchestrator(
        config: &IdeaflowConfig,
        client: Arc<ScriptedCompletionClient>,
    ) -> (Orchestrator, Arc<CollectingEventSink>) {
        let events = Arc::new(CollectingEventSink::new());
        let gateway = AiGateway::new(config, client).with_events(events.clone());
        let orchestrator =
            Orchestrator::new(config.pipeline, Arc::new(gateway)).with_events(events.clone());
        (orchestrator, events)
    }

    fn scripted() -> Arc<ScriptedCompletionClient> {
        let client = Arc::new(ScriptedCompletionClient::new());
        fixtures::script_success(&client);
        client
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_succeeds() {
        assert_eq!(fixtures::IDEA.chars().count(), 120);
        let client = scripted();
        let (orchestrator, events) = orchestrator(&config(), client.clone());

        let outcome = orchestrator.run(fixtures::IDEA, "en").await;

        assert_run_succeeded(&outcome);
        let data = outcome.data.as_ref().unwrap();
        assert_eq!(data.idea, fixtures::IDEA);
        assert!(data.analysis.summary.starts_with("Offline-first"));
        assert_eq!(data.plan.milestones.len(), 3);
        assert_eq!(data.design.tech_stack.len(), 4);
        assert_eq!(data.strategy.revenue_model, "Freemium with a household subscription.");
        assert_eq!(data.validation.risks.len(), 2);
        assert_eq!(data.metadata.quality_score, data.validation.quality_score);
        assert!((0.0..=100.0).contains(&data.metadata.quality_score));

        assert_eq!(outcome.run.results.len(), 5);
        for stage in StageName::ALL {
            assert_stage_status(&outcome.run, stage, StageStatus::Completed);
            assert_eq!(client.calls_for(stage.as_str()), 1);
        }
        assert_eq!(events.count(names::STAGE_STARTED), 5);
        assert_eq!(events.count(names::STAGE_COMPLETED), 5);
        assert_eq!(events.count(names::RUN_COMPLETED), 1);
        assert_eq!(events.count(names::RUN_FAILED), 0);

        let estimate = outcome.run.estimate.as_ref().unwrap();
        assert_eq!(estimate.remaining_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_503_is_retried() {
        let client = scripted();
        client.reply("requirements_planning", ScriptedReply::Status(503));
        client.reply("requirements_planning", ScriptedReply::Status(503));
        let (orchestrator, events) = orchestrator(&config(), client.clone());

        let outcome = orchestrator.run(fixtures::IDEA, "en").await;

        assert_run_succeeded(&outcome);
        assert_eq!(client.calls_for("requirements_planning"), 3);
        assert_eq!(events.count(names::RETRY_SCHEDULED), 2);
        assert_eq!(events.count(names::RETRY_EXHAUSTED), 0);
        assert_stage_status(&outcome.run, StageName::RequirementsPlanning, StageStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fenced_trailing_comma_is_recovered() {
        let client = scripted();
        client.reply("idea_analysis", ScriptedReply::text("```json\n{\"a\":1,}\n```"));
        let (orchestrator, _) = orchestrator(&config(), client);

        assert_eq!(
            orchestrator
                .gateway()
                .parser()
                .parse("```json\n{\"a\":1,}\n```", None, None),
            json!({"a": 1})
        );

        let outcome = orchestrator.run(fixtures::IDEA, "en").await;
        assert_run_succeeded(&outcome);
        match outcome.run.results.get(&StageName::IdeaAnalysis) {
            Some(StageResult::IdeaAnalysis(analysis)) => {
                assert_eq!(analysis.extra.get("a"), Some(&json!(1)));
                assert!(analysis.summary.is_empty());
            }
            other => panic!("unexpected stage 1 result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage1_failure_stops_run() {
        let client = scripted();
        client.always("idea_analysis", ScriptedReply::Status(400));
        let (orchestrator, events) = orchestrator(&config(), client.clone());

        let outcome = orchestrator.run(fixtures::IDEA, "en").await;

        assert_run_failed_at(&outcome, StageName::IdeaAnalysis);
        for stage in &StageName::ALL[1..] {
            assert_stage_status(&outcome.run, *stage, StageStatus::Pending);
            assert_eq!(client.calls_for(stage.as_str()), 0);
        }
        assert!(outcome.run.results.is_empty());
        assert_eq!(events.count(names::STAGE_STARTED), 1);
        assert_eq!(events.count(names::RUN_FAILED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_failure_skips_validation() {
        let client = scripted();
        client.always("technical_design", ScriptedReply::Status(401));
        let (orchestrator, events) = orchestrator(&config(), client.clone());

        let outcome = orchestrator.run(fixtures::IDEA, "en").await;

        assert_run_failed_at(&outcome, StageName::TechnicalDesign);
        assert_stage_status(&outcome.run, StageName::BusinessStrategy, StageStatus::Completed);
        assert_stage_status(&outcome.run, StageName::Validation, StageStatus::Pending);
        assert_eq!(client.calls_for("validation"), 0);
        assert_eq!(events.count(names::STAGE_STARTED), 4);
        assert_eq!(events.count(names::STAGE_FAILED), 1);

        // Earlier outputs stay available for diagnostics.
        assert!(outcome.run.results.contains_key(&StageName::IdeaAnalysis));
        assert!(outcome.run.results.contains_key(&StageName::RequirementsPlanning));
        assert!(outcome.run.results.contains_key(&StageName::BusinessStrategy));

        let message = outcome.run.stage(StageName::TechnicalDesign).error.clone().unwrap();
        assert_eq!(Some(message), outcome.error.map(|e| e.message));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_stage_with_localised_message() {
        let client = scripted();
        client.always("business_strategy", ScriptedReply::Status(503));
        let (orchestrator, events) = orchestrator(&config(), client.clone());

        let outcome = orchestrator.run(fixtures::IDEA, "es").await;

        assert_run_failed_at(&outcome, StageName::BusinessStrategy);
        assert_eq!(client.calls_for("business_strategy"), 3);
        assert_eq!(events.count(names::RETRY_EXHAUSTED), 1);

        let failure = outcome.error.unwrap();
        assert_eq!(failure.kind, FailureKind::ServiceUnavailable);
        assert_eq!(
            failure.message,
            "Estrategia de negocio: El servicio de IA no está disponible en este momento."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timeout_fails_in_flight_stages() {
        let config = config().with_pipeline(PipelineSettings {
            run_timeout: Duration::from_secs(30),
            ..PipelineSettings::default()
        });
        let client = scripted();
        client.always("technical_design", ScriptedReply::Hang);
        let (orchestrator, _) = orchestrator(&config, client);

        let outcome = orchestrator.run(fixtures::IDEA, "en").await;

        assert_run_failed_at(&outcome, StageName::TechnicalDesign);
        assert_eq!(outcome.error.as_ref().map(|e| e.kind), Some(FailureKind::Timeout));
        assert_stage_status(&outcome.run, StageName::BusinessStrategy, StageStatus::Completed);
        assert_stage_status(&outcome.run, StageName::Validation, StageStatus::Pending);
        assert!(!outcome.run.is_complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_follow_stage_order() {
        let client = scripted();
        let (orchestrator, _) = orchestrator(&config(), client);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = orchestrator.run_with_updates(fixtures::IDEA, "en", tx).await;
        assert_run_succeeded(&outcome);

        let mut snapshots: Vec<PipelineRun> = Vec::new();
        while let Ok(snapshot) = rx.try_recv() {
            snapshots.push(snapshot);
        }
        assert!(snapshots.len() >= 10, "only {} snapshots", snapshots.len());

        let first = &snapshots[0];
        assert_eq!(first.stage(StageName::IdeaAnalysis).status, StageStatus::Processing);
        assert_eq!(first.overall_progress, 10);

        for pair in snapshots.windows(2) {
            assert!(pair[0].overall_progress <= pair[1].overall_progress);
            assert!(pair[0].current_stage_index <= pair[1].current_stage_index);
        }

        let validation_start = snapshots
            .iter()
            .find(|s| s.stage(StageName::Validation).status != StageStatus::Pending)
            .unwrap();
        assert_eq!(
            validation_start.stage(StageName::TechnicalDesign).status,
            StageStatus::Completed
        );
        assert_eq!(
            validation_start.stage(StageName::BusinessStrategy).status,
            StageStatus::Completed
        );

        let last = snapshots.last().unwrap();
        assert!(last.is_complete);
        assert_eq!(last.overall_progress, 100);
        assert_eq!(last, &outcome.run);
    }

    #[tokio::test(start_paused = true)]
    async fn test_durations_feed_history() {
        let client = scripted();
        for stage in StageName::ALL {
            client.with_latency(stage.as_str(), Duration::from_secs(2));
        }
        let (orchestrator, _) = orchestrator(&config(), client);

        let outcome = orchestrator.run(fixtures::IDEA, "en").await;
        assert_run_succeeded(&outcome);

        for stage in StageName::ALL {
            assert_eq!(orchestrator.history().sample_count(stage), 1);
            assert_eq!(orchestrator.history().average(stage), Duration::from_secs(2));
        }
        // Stages 3 and 4 overlap, so four sequential steps of two seconds.
        assert_eq!(outcome.data.unwrap().metadata.processing_time_ms, 8_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_served_from_cache() {
        let client = scripted();
        for stage in StageName::ALL {
            client.with_latency(stage.as_str(), Duration::from_secs(2));
        }
        let (orchestrator, events) = orchestrator(&config(), client.clone());

        assert_run_succeeded(&orchestrator.run(fixtures::IDEA, "en").await);
        let calls = client.total_calls();
        assert_run_succeeded(&orchestrator.run(fixtures::IDEA, "en").await);

        assert_eq!(client.total_calls(), calls);
        assert_eq!(events.count(names::CACHE_HIT), 5);
        for stage in StageName::ALL {
            assert_eq!(orchestrator.history().sample_count(stage), 1);
            assert_eq!(orchestrator.history().average(stage), Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_score_is_reported_not_failed() {
        let mut scorer = MockQualityScorer::new();
        scorer.expect_score().return_const(12.5);
        let (orchestrator, _) = orchestrator(&config(), scripted());
        let orchestrator = orchestrator.with_scorer(Arc::new(scorer));

        let outcome = orchestrator.run(fixtures::IDEA, "en").await;

        assert_run_succeeded(&outcome);
        let data = outcome.data.unwrap();
        assert_eq!(data.metadata.quality_score, 12.5);
        assert!(!data.validation.accepted);
    }

    #[derive(Debug)]
    struct JoinProbe {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Stage for JoinProbe {
        fn name(&self) -> StageName {
            StageName::Validation
        }

        async fn execute(&self, input: &StageInput<'_>) -> Result<StageResult, IdeaflowError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(input.prior.contains_key(&StageName::TechnicalDesign));
            assert!(input.prior.contains_key(&StageName::BusinessStrategy));
            Ok(fixtures::all_results()
                .remove(&StageName::Validation)
                .unwrap())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_stage_sees_joined_outputs() {
        let client = scripted();
        client.with_latency("business_strategy", Duration::from_secs(5));
        let probe = Arc::new(JoinProbe {
            calls: AtomicUsize::new(0),
        });
        let (orchestrator, _) = orchestrator(&config(), client.clone());
        let orchestrator = orchestrator.with_stage(probe.clone());

        let outcome = orchestrator.run(fixtures::IDEA, "en").await;

        assert_run_succeeded(&outcome);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.calls_for("validation"), 0);
        assert_eq!(outcome.data.unwrap().metadata.quality_score, 80.0);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_fatal() {
        let err = IdeaflowConfig::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, IdeaflowError::Config(_)));

        let err = Orchestrator::from_config(&IdeaflowConfig::default()).unwrap_err();
        assert!(matches!(err, IdeaflowError::Config(_)));
    }
}
