use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::StageCopyId;
use crate::worker::{Counters, WorkerState, WorkerStatus};

/// Point in time view of a single stage copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub id: StageCopyId,
    pub status: WorkerStatus,
    pub counters: Counters,
    /// Buffered rows per input channel.
    pub input_sizes: Vec<usize>,
    /// Buffered rows per output channel.
    pub output_sizes: Vec<usize>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
}

impl StageSnapshot {
    /// Capture the current state of a copy without blocking it beyond the
    /// short counter and channel locks.
    pub fn capture(state: &WorkerState) -> Self {
        let (input_sizes, output_sizes) = state.channel_sizes();
        StageSnapshot {
            id: state.id().clone(),
            status: state.status(),
            counters: state.counters(),
            input_sizes,
            output_sizes,
            start_time: state.start_time(),
            stop_time: state.stop_time(),
        }
    }

    /// Time spent running, up to now if the copy is still running.
    pub fn runtime(&self) -> Option<chrono::Duration> {
        let start = self.start_time?;
        let end = self.stop_time.unwrap_or_else(Utc::now);
        Some(end - start)
    }

    /// Total rows buffered in the copy's channels.
    pub fn buffered(&self) -> usize {
        self.input_sizes.iter().chain(&self.output_sizes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_idle_copy() {
        let state = WorkerState::new(StageCopyId::new("a", 1));
        state.update_counters(|c| c.lines_read = 4);

        let snapshot = StageSnapshot::capture(&state);
        assert_eq!(StageCopyId::new("a", 1), snapshot.id);
        assert_eq!(WorkerStatus::Empty, snapshot.status);
        assert_eq!(4, snapshot.counters.lines_read);
        assert_eq!(0, snapshot.buffered());
        assert!(snapshot.runtime().is_none());
    }
}
