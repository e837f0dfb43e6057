//! Assertions over run outcomes.

use crate::pipeline::{PipelineRun, RunOutcome, StageName, StageStatus};

/// Asserts that a run succeeded and every stage completed.
///
/// # Panics
///
/// Panics with the failure message if the run did not succeed.
pub fn assert_run_succeeded(outcome: &RunOutcome) {
    assert!(
        outcome.success,
        "run failed: {:?}",
        outcome.error.as_ref().map(|e| &e.message)
    );
    assert!(outcome.data.is_some(), "successful run without data");
    assert!(outcome.run.is_complete, "successful run not complete");
    assert!(!outcome.run.has_error, "successful run has errors");
    assert_eq!(outcome.run.overall_progress, 100);
}

/// Asserts that a run failed at `stage`.
///
/// # Panics
///
/// Panics if the run succeeded or failed elsewhere.
pub fn assert_run_failed_at(outcome: &RunOutcome, stage: StageName) {
    assert!(!outcome.success, "run unexpectedly succeeded");
    assert!(outcome.data.is_none(), "failed run carries data");
    assert!(outcome.run.has_error, "failed run without has_error");
    let failure = outcome.error.as_ref().map(|e| e.stage);
    assert_eq!(failure, Some(stage), "run failed at the wrong stage");
    assert_stage_status(&outcome.run, stage, StageStatus::Failed);
}

/// Asserts the status of one stage.
///
/// # Panics
///
/// Panics if the status differs.
pub fn assert_stage_status(run: &PipelineRun, stage: StageName, expected: StageStatus) {
    let actual = run.stage(stage).status;
    assert_eq!(actual, expected, "stage {stage} is {actual}, expected {expected}");
}
