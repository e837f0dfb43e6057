//! The run record shared with callers as snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::estimate::TimeEstimate;
use super::results::StageResult;
use super::stage::{StageName, StageRecord, StageStatus};

/// One execution of the five-stage graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run id.
    pub id: Uuid,
    /// Requested output language.
    pub language: String,
    /// Per-stage state, in index order.
    pub stages: [StageRecord; StageName::COUNT],
    /// Index of the furthest stage started so far.
    pub current_stage_index: usize,
    /// Overall progress, 0 to 100.
    pub overall_progress: u8,
    /// All five stages completed.
    pub is_complete: bool,
    /// At least one stage failed.
    pub has_error: bool,
    /// Outputs of completed stages.
    pub results: BTreeMap<StageName, StageResult>,
    /// Latest time estimate.
    pub estimate: Option<TimeEstimate>,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
}

impl PipelineRun {
    /// Creates a run with every stage pending.
    #[must_use]
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            language: language.into(),
            stages: StageName::ALL.map(StageRecord::new),
            current_stage_index: 0,
            overall_progress: 0,
            is_complete: false,
            has_error: false,
            results: BTreeMap::new(),
            estimate: None,
            created_at: Utc::now(),
        }
    }

    /// Returns the record of `stage`.
    #[must_use]
    pub fn stage(&self, stage: StageName) -> &StageRecord {
        &self.stages[stage.index()]
    }

    pub(crate) fn stage_mut(&mut self, stage: StageName) -> &mut StageRecord {
        &mut self.stages[stage.index()]
    }

    /// Number of stages with the given status.
    #[must_use]
    pub fn count(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|s| s.status == status).count()
    }

    /// The first failed stage, if any.
    #[must_use]
    pub fn failed_stage(&self) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }

    /// Stages currently processing.
    #[must_use]
    pub fn in_flight(&self) -> Vec<StageName> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Processing)
            .map(|s| s.name)
            .collect()
    }

    /// Recomputes progress and the completion flags from the stage records.
    pub(crate) fn refresh(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let weighted = self.count(StageStatus::Completed) as f64
            + 0.5 * self.count(StageStatus::Processing) as f64;
        #[allow(clippy::cast_precision_loss)]
        let total = StageName::COUNT as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let progress = (100.0 * weighted / total).round().clamp(0.0, 100.0) as u8;

        self.overall_progress = progress;
        self.is_complete = self.count(StageStatus::Completed) == StageName::COUNT;
        self.has_error = self.count(StageStatus::Failed) > 0;
        if let Some(furthest) = self
            .stages
            .iter()
            .rposition(|s| s.status != StageStatus::Pending)
        {
            self.current_stage_index = self.current_stage_index.max(furthest);
        }
    }
}
