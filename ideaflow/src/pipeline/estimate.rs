//! Time-to-completion estimate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::history::DurationHistory;
use super::stage::{StageName, StageStatus};

/// Stage progress above which the live extrapolation replaces the average.
const LIVE_PROGRESS_THRESHOLD: u8 = 10;

/// Samples at which history is considered fully trustworthy.
const CONFIDENT_SAMPLES: usize = 10;

/// Projected remaining time of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEstimate {
    /// Milliseconds until every stage is expected to finish.
    pub remaining_ms: u64,
    /// Wall-clock time the run is expected to finish.
    pub estimated_completion: DateTime<Utc>,
    /// How much to trust the estimate, 0 to 1.
    pub confidence: f64,
}

/// Input to [`estimate`] for one stage.
#[derive(Debug, Clone, Copy)]
pub struct StageTiming {
    /// The stage.
    pub stage: StageName,
    /// Its status.
    pub status: StageStatus,
    /// Its stage-local progress.
    pub progress: u8,
    /// Time spent so far when processing.
    pub elapsed: Duration,
}

/// Sums the expected remaining time of every unfinished stage.
///
/// A processing stage past 10% progress is extrapolated from its own
/// elapsed time; everything else uses the historical average. Confidence
/// grows with the number of samples behind the averages and shrinks while
/// the remaining time dwarfs the time already spent.
#[must_use]
pub fn estimate(stages: &[StageTiming], history: &DurationHistory, run_elapsed: Duration) -> TimeEstimate {
    let unfinished: Vec<&StageTiming> = stages.iter().filter(|s| !s.status.is_terminal()).collect();
    if unfinished.is_empty() {
        return TimeEstimate {
            remaining_ms: 0,
            estimated_completion: Utc::now(),
            confidence: 1.0,
        };
    }

    let remaining: Duration = unfinished
        .iter()
        .map(|timing| remaining_for(timing, history))
        .sum();

    #[allow(clippy::cast_precision_loss)]
    let sample_factor = unfinished
        .iter()
        .map(|t| history.sample_count(t.stage).min(CONFIDENT_SAMPLES) as f64 / CONFIDENT_SAMPLES as f64)
        .sum::<f64>()
        / unfinished.len() as f64;

    let spent = run_elapsed.as_secs_f64();
    let left = remaining.as_secs_f64();
    let time_factor = if spent + left > 0.0 { spent / (spent + left) } else { 0.0 };
    let confidence = (0.2 + 0.5 * sample_factor + 0.3 * time_factor).clamp(0.0, 1.0);

    let remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX);
    let estimated_completion = chrono::Duration::from_std(remaining)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
        .unwrap_or_else(Utc::now);

    TimeEstimate {
        remaining_ms,
        estimated_completion,
        confidence: (confidence * 100.0).round() / 100.0,
    }
}

fn remaining_for(timing: &StageTiming, history: &DurationHistory) -> Duration {
    let average = history.average(timing.stage);
    match timing.status {
        StageStatus::Processing if timing.progress > LIVE_PROGRESS_THRESHOLD => {
            let projected = timing.elapsed.mul_f64(100.0 / f64::from(timing.progress));
            projected.saturating_sub(timing.elapsed)
        }
        StageStatus::Processing => average.saturating_sub(timing.elapsed),
        _ => average,
    }
}
