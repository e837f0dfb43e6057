//! Per-stage duration history used for time estimates.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::stage::StageName;

/// Samples kept per stage.
pub const HISTORY_CAPACITY: usize = 50;

/// Bounded ring of recent stage durations, shared across runs.
#[derive(Debug, Default)]
pub struct DurationHistory {
    samples: Mutex<HashMap<StageName, VecDeque<Duration>>>,
}

impl DurationHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Expected duration of a stage before any sample exists.
    #[must_use]
    pub fn default_duration(stage: StageName) -> Duration {
        match stage {
            StageName::IdeaAnalysis | StageName::Validation => Duration::from_secs(15),
            StageName::RequirementsPlanning => Duration::from_secs(20),
            StageName::TechnicalDesign | StageName::BusinessStrategy => Duration::from_secs(25),
        }
    }

    /// Records one completed stage, dropping the oldest sample when full.
    pub fn record(&self, stage: StageName, duration: Duration) {
        let mut samples = self.samples.lock();
        let ring = samples.entry(stage).or_default();
        if ring.len() == HISTORY_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(duration);
    }

    /// Mean of the recorded samples, or the default when there are none.
    #[must_use]
    pub fn average(&self, stage: StageName) -> Duration {
        let samples = self.samples.lock();
        match samples.get(&stage) {
            Some(ring) if !ring.is_empty() => {
                let total: Duration = ring.iter().sum();
                // Bounded by HISTORY_CAPACITY.
                #[allow(clippy::cast_possible_truncation)]
                let count = ring.len() as u32;
                total / count
            }
            _ => Self::default_duration(stage),
        }
    }

    /// Number of samples recorded for a stage.
    #[must_use]
    pub fn sample_count(&self, stage: StageName) -> usize {
        self.samples.lock().get(&stage).map_or(0, VecDeque::len)
    }

    /// Drops every sample.
    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}
