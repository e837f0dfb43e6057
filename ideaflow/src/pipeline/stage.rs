//! Stage names, statuses and per-stage records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::results::StageResult;

/// The five nodes of the pipeline graph, in index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Stage 1: understand the idea.
    IdeaAnalysis,
    /// Stage 2: turn the analysis into requirements and milestones.
    RequirementsPlanning,
    /// Stage 3: technical design (runs alongside stage 4).
    TechnicalDesign,
    /// Stage 4: business strategy (runs alongside stage 3).
    BusinessStrategy,
    /// Stage 5: review everything and score it.
    Validation,
}

impl StageName {
    /// Every stage in index order.
    pub const ALL: [Self; 5] = [
        Self::IdeaAnalysis,
        Self::RequirementsPlanning,
        Self::TechnicalDesign,
        Self::BusinessStrategy,
        Self::Validation,
    ];

    /// Number of stages in a run.
    pub const COUNT: usize = Self::ALL.len();

    /// Position of the stage in [`StageName::ALL`].
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::IdeaAnalysis => 0,
            Self::RequirementsPlanning => 1,
            Self::TechnicalDesign => 2,
            Self::BusinessStrategy => 3,
            Self::Validation => 4,
        }
    }

    /// Snake-case name, also used as the gateway call context.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IdeaAnalysis => "idea_analysis",
            Self::RequirementsPlanning => "requirements_planning",
            Self::TechnicalDesign => "technical_design",
            Self::BusinessStrategy => "business_strategy",
            Self::Validation => "validation",
        }
    }

    /// Stages whose outputs this stage consumes.
    #[must_use]
    pub fn dependencies(self) -> &'static [StageName] {
        match self {
            Self::IdeaAnalysis => &[],
            Self::RequirementsPlanning => &[Self::IdeaAnalysis],
            Self::TechnicalDesign | Self::BusinessStrategy => {
                &[Self::IdeaAnalysis, Self::RequirementsPlanning]
            }
            Self::Validation => &[
                Self::IdeaAnalysis,
                Self::RequirementsPlanning,
                Self::TechnicalDesign,
                Self::BusinessStrategy,
            ],
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not started yet.
    #[default]
    Pending,
    /// Currently running.
    Processing,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl StageStatus {
    /// Returns true for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// State of one stage inside a [`PipelineRun`](super::PipelineRun).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Which stage this is.
    pub name: StageName,
    /// Current status.
    pub status: StageStatus,
    /// Stage-local progress, 0 to 100.
    pub progress: u8,
    /// When the stage entered `Processing`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
    /// Output of a completed stage.
    pub result: Option<StageResult>,
    /// User-facing message of a failed stage.
    pub error: Option<String>,
}

impl StageRecord {
    /// Creates a pending record.
    #[must_use]
    pub fn new(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Pending,
            progress: 0,
            started_at: None,
            ended_at: None,
            result: None,
            error: None,
        }
    }
}
