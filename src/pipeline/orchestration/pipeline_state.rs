use crate::error::EnhancementError;
use indexmap::IndexMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Where a request currently is in the enhancement state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Received,
    Staged,
    Decoded,
    Inferred,
    Encoded,
    StagedOutput,
    Delivered,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Received => "Received",
            PipelineState::Staged => "Staged",
            PipelineState::Decoded => "Decoded",
            PipelineState::Inferred => "Inferred",
            PipelineState::Encoded => "Encoded",
            PipelineState::StagedOutput => "StagedOutput",
            PipelineState::Delivered => "Delivered",
            PipelineState::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Delivered | PipelineState::Failed)
    }
}

/// Time spent reaching each state, in transition order.
#[derive(Debug, Clone, Default)]
pub struct StageTimings {
    stage_durations: IndexMap<PipelineState, Duration>,
    total: Duration,
}

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, state: PipelineState, duration: Duration) {
        let entry = self.stage_durations.entry(state).or_default();
        *entry += duration;
    }

    pub fn get(&self, state: PipelineState) -> Option<Duration> {
        self.stage_durations.get(&state).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PipelineState, Duration)> + '_ {
        self.stage_durations.iter().map(|(state, duration)| (*state, *duration))
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    fn finalize(&mut self, started: Instant) {
        self.total = started.elapsed();
    }
}

/// Bookkeeping for one pass through the pipeline. Dropping a run that never
/// reached a hand-off point means the caller went away mid-request.
#[derive(Debug)]
pub struct PipelineRun {
    request_id: Uuid,
    state: PipelineState,
    started: Instant,
    stage_start: Instant,
    timings: StageTimings,
    handed_off: bool,
}

impl PipelineRun {
    pub fn new(request_id: Uuid) -> Self {
        let now = Instant::now();
        Self {
            request_id,
            state: PipelineState::Received,
            started: now,
            stage_start: now,
            timings: StageTimings::new(),
            handed_off: false,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn advance(&mut self, next: PipelineState) {
        let elapsed = self.stage_start.elapsed();
        self.timings.record(next, elapsed);
        debug!(
            request_id = %self.request_id,
            from = self.state.as_str(),
            to = next.as_str(),
            elapsed_us = elapsed.as_micros() as u64,
            "Pipeline transition"
        );
        self.state = next;
        self.stage_start = Instant::now();
    }

    pub fn fail(&mut self, failure: &EnhancementError) {
        let failed_in = self.state.as_str();
        if failure.kind().is_client_error() {
            warn!(
                request_id = %self.request_id,
                state = failed_in,
                kind = %failure.kind(),
                "Rejected upload: {}",
                failure.message()
            );
        } else {
            error!(
                request_id = %self.request_id,
                state = failed_in,
                kind = %failure.kind(),
                "Enhancement failed: {}",
                failure.message()
            );
        }
        self.state = PipelineState::Failed;
        self.handed_off = true;
    }

    /// Output is staged and about to be owned by the caller.
    pub fn hand_off(&mut self) -> StageTimings {
        self.handed_off = true;
        self.timings.finalize(self.started);
        debug!(
            request_id = %self.request_id,
            total_ms = self.timings.total().as_millis() as u64,
            "Output staged for delivery"
        );
        std::mem::take(&mut self.timings)
    }
}

impl Drop for PipelineRun {
    fn drop(&mut self) {
        if !self.handed_off {
            warn!(
                request_id = %self.request_id,
                state = self.state.as_str(),
                "Request abandoned before completion, releasing its artifacts"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn transitions_are_timed_in_order() {
        let mut run = PipelineRun::new(Uuid::new_v4());
        run.advance(PipelineState::Staged);
        run.advance(PipelineState::Decoded);
        run.advance(PipelineState::Inferred);
        assert_eq!(run.state(), PipelineState::Inferred);

        let timings = run.hand_off();
        let order: Vec<_> = timings.iter().map(|(state, _)| state).collect();
        assert_eq!(
            order,
            vec![PipelineState::Staged, PipelineState::Decoded, PipelineState::Inferred]
        );
        assert!(timings.get(PipelineState::Encoded).is_none());
        assert!(timings.total() >= timings.get(PipelineState::Staged).unwrap());
    }

    #[test]
    fn failure_is_terminal() {
        let mut run = PipelineRun::new(Uuid::new_v4());
        run.advance(PipelineState::Staged);
        run.fail(&EnhancementError::new(ErrorKind::Inference, "device lost"));
        assert_eq!(run.state(), PipelineState::Failed);
        assert!(run.state().is_terminal());
    }
}
