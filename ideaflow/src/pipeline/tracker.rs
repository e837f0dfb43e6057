//! Run state tracking and snapshot delivery.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::estimate::{estimate, StageTiming};
use super::history::DurationHistory;
use super::results::StageResult;
use super::run::PipelineRun;
use super::stage::{StageName, StageStatus};

struct TrackerState {
    run: PipelineRun,
    clocks: [Option<Instant>; StageName::COUNT],
    /// Stages answered from the response cache; their durations are not
    /// representative.
    cached: [bool; StageName::COUNT],
}

/// Owns the [`PipelineRun`] of one execution.
///
/// Every mutation refreshes progress, flags and the time estimate, then
/// sends a snapshot to the subscriber while still holding the lock, so
/// subscribers observe mutations in the order they happened. Transitions
/// only move forward: a terminal stage never changes again.
pub struct RunTracker {
    state: Mutex<TrackerState>,
    started: Instant,
    history: Arc<DurationHistory>,
    updates: Option<UnboundedSender<PipelineRun>>,
}

impl std::fmt::Debug for RunTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RunTracker")
            .field("run_id", &state.run.id)
            .field("overall_progress", &state.run.overall_progress)
            .finish_non_exhaustive()
    }
}

impl RunTracker {
    /// Creates a tracker for a fresh run.
    #[must_use]
    pub fn new(
        language: &str,
        history: Arc<DurationHistory>,
        updates: Option<UnboundedSender<PipelineRun>>,
    ) -> Self {
        let started = Instant::now();
        let mut run = PipelineRun::new(language);
        let clocks = [None; StageName::COUNT];
        let cached = [false; StageName::COUNT];
        run.estimate = Some(estimate(&timings(&run, &clocks), &history, started.elapsed()));

        Self {
            state: Mutex::new(TrackerState { run, clocks, cached }),
            started,
            history,
            updates,
        }
    }

    /// Returns a copy of the current run.
    #[must_use]
    pub fn snapshot(&self) -> PipelineRun {
        self.state.lock().run.clone()
    }

    /// Time since the tracker was created.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Moves a pending stage to `Processing`. Returns false otherwise.
    pub fn start_stage(&self, stage: StageName) -> bool {
        self.mutate(|state| {
            let record = state.run.stage_mut(stage);
            if record.status != StageStatus::Pending {
                return false;
            }
            record.status = StageStatus::Processing;
            record.progress = 0;
            record.started_at = Some(Utc::now());
            state.clocks[stage.index()] = Some(Instant::now());
            true
        })
    }

    /// Raises the progress of a processing stage. Lower values are ignored.
    pub fn set_progress(&self, stage: StageName, progress: u8) -> bool {
        self.mutate(|state| {
            let record = state.run.stage_mut(stage);
            let progress = progress.min(99);
            if record.status != StageStatus::Processing || progress <= record.progress {
                return false;
            }
            record.progress = progress;
            true
        })
    }

    /// Marks a stage as served from the response cache, so its duration is
    /// kept out of the history.
    pub fn mark_cached(&self, stage: StageName) {
        self.state.lock().cached[stage.index()] = true;
    }

    /// Completes a processing stage and records its duration unless it was
    /// served from the cache.
    pub fn complete_stage(&self, stage: StageName, result: StageResult) -> bool {
        let history = Arc::clone(&self.history);
        self.mutate(|state| {
            if state.run.stage(stage).status != StageStatus::Processing {
                return false;
            }
            match state.clocks[stage.index()] {
                Some(_) if state.cached[stage.index()] => {
                    debug!(stage = %stage, "cached stage, duration not recorded");
                }
                Some(clock) => history.record(stage, clock.elapsed()),
                None => {}
            }

            let record = state.run.stage_mut(stage);
            record.status = StageStatus::Completed;
            record.progress = 100;
            record.ended_at = Some(Utc::now());
            record.result = Some(result.clone());
            record.error = None;
            state.run.results.insert(stage, result);
            true
        })
    }

    /// Fails a stage that has not reached a terminal status.
    pub fn fail_stage(&self, stage: StageName, message: impl Into<String>) -> bool {
        let message = message.into();
        self.mutate(|state| {
            let record = state.run.stage_mut(stage);
            if record.status.is_terminal() {
                return false;
            }
            record.status = StageStatus::Failed;
            record.ended_at = Some(Utc::now());
            record.error = Some(message);
            true
        })
    }

    /// Fails every processing stage with the same message and returns them.
    pub fn fail_in_flight(&self, message: &str) -> Vec<StageName> {
        let in_flight = self.state.lock().run.in_flight();
        in_flight
            .into_iter()
            .filter(|&stage| self.fail_stage(stage, message))
            .collect()
    }

    fn mutate(&self, change: impl FnOnce(&mut TrackerState) -> bool) -> bool {
        let mut state = self.state.lock();
        if !change(&mut state) {
            return false;
        }

        let state = &mut *state;
        state.run.refresh();
        let timings = timings(&state.run, &state.clocks);
        state.run.estimate = Some(estimate(&timings, &self.history, self.started.elapsed()));

        debug!(
            run_id = %state.run.id,
            progress = state.run.overall_progress,
            complete = state.run.is_complete,
            has_error = state.run.has_error,
            "run updated"
        );
        if let Some(updates) = &self.updates {
            if updates.send(state.run.clone()).is_err() {
                trace!(run_id = %state.run.id, "snapshot subscriber dropped");
            }
        }
        true
    }
}

fn timings(run: &PipelineRun, clocks: &[Option<Instant>; StageName::COUNT]) -> Vec<StageTiming> {
    run.stages
        .iter()
        .map(|record| StageTiming {
            stage: record.name,
            status: record.status,
            progress: record.progress,
            elapsed: clocks[record.name.index()]
                .map_or(std::time::Duration::ZERO, |clock| clock.elapsed()),
        })
        .collect()
}
