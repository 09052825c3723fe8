use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use super::counters::Counters;
use super::status::{AtomicStatus, WorkerStatus};
use crate::channel::RowChannel;
use crate::graph::StageCopyId;

/// State of a stage copy shared between its worker thread and the
/// orchestrator.
#[derive(Debug)]
pub struct WorkerState {
    id: StageCopyId,
    status: AtomicStatus,
    stopped: AtomicBool,
    paused: AtomicBool,
    counters: Mutex<Counters>,
    times: Mutex<Times>,
    channels: Mutex<ChannelRefs>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Times {
    start: Option<DateTime<Utc>>,
    stop: Option<DateTime<Utc>>,
}

/// Channels of a stage copy, kept for monitoring only.
#[derive(Debug, Default, Clone)]
struct ChannelRefs {
    inputs: Vec<Arc<RowChannel>>,
    outputs: Vec<Arc<RowChannel>>,
}

impl WorkerState {
    pub fn new(id: StageCopyId) -> Self {
        WorkerState {
            id,
            status: AtomicStatus::new(),
            stopped: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            counters: Mutex::new(Counters::default()),
            times: Mutex::new(Times::default()),
            channels: Mutex::new(ChannelRefs::default()),
        }
    }

    pub fn id(&self) -> &StageCopyId {
        &self.id
    }

    pub fn status(&self) -> WorkerStatus {
        self.status.get()
    }

    pub(crate) fn status_cell(&self) -> &AtomicStatus {
        &self.status
    }

    pub fn counters(&self) -> Counters {
        *self.counters.lock()
    }

    pub(crate) fn update_counters(&self, f: impl FnOnce(&mut Counters)) {
        f(&mut *self.counters.lock())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Ask the worker to stop at its next safe point.
    ///
    /// Also releases a paused worker.
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.paused.store(false, Ordering::Release);

        let halting = self
            .status
            .transition_from(WorkerStatus::Running, WorkerStatus::Halting)
            || self
                .status
                .transition_from(WorkerStatus::Paused, WorkerStatus::Halting);
        if halting {
            debug!(copy = %self.id, "stop requested");
        }
    }

    pub fn request_pause(&self) {
        self.paused.store(true, Ordering::Release);
        self.status
            .transition_from(WorkerStatus::Running, WorkerStatus::Paused);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.status
            .transition_from(WorkerStatus::Paused, WorkerStatus::Running);
    }

    pub(crate) fn mark_started(&self) {
        self.times.lock().start = Some(Utc::now());
    }

    pub(crate) fn mark_stopped(&self) {
        self.times.lock().stop = Some(Utc::now());
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.times.lock().start
    }

    pub fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.times.lock().stop
    }

    pub(crate) fn set_channels(&self, inputs: Vec<Arc<RowChannel>>, outputs: Vec<Arc<RowChannel>>) {
        *self.channels.lock() = ChannelRefs { inputs, outputs };
    }

    /// Current buffered row count of every input and output channel.
    pub fn channel_sizes(&self) -> (Vec<usize>, Vec<usize>) {
        let channels = self.channels.lock();
        (
            channels.inputs.iter().map(|c| c.size()).collect(),
            channels.outputs.iter().map(|c| c.size()).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_state() -> WorkerState {
        let state = WorkerState::new(StageCopyId::new("a", 0));
        state.status_cell().transition(WorkerStatus::Init).unwrap();
        state.status_cell().transition(WorkerStatus::Idle).unwrap();
        state.status_cell().transition(WorkerStatus::Running).unwrap();
        state
    }

    #[test]
    fn pause_resume_stop() {
        let state = running_state();

        state.request_pause();
        assert!(state.is_paused());
        assert_eq!(WorkerStatus::Paused, state.status());

        state.resume();
        assert!(!state.is_paused());
        assert_eq!(WorkerStatus::Running, state.status());

        state.request_pause();
        state.request_stop();
        assert!(state.is_stopped());
        assert!(!state.is_paused());
        assert_eq!(WorkerStatus::Halting, state.status());
    }

    #[test]
    fn stop_before_start_keeps_status() {
        let state = WorkerState::new(StageCopyId::new("a", 0));
        state.request_stop();
        assert!(state.is_stopped());
        assert_eq!(WorkerStatus::Empty, state.status());
    }

    #[test]
    fn counters_snapshot() {
        let state = running_state();
        state.update_counters(|c| c.lines_read += 3);
        state.update_counters(|c| c.lines_written += 1);

        let counters = state.counters();
        assert_eq!(3, counters.lines_read);
        assert_eq!(1, counters.lines_written);
    }
}
