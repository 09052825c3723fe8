use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rowpipe_error::RowpipeError;
use tracing::{debug, error};
use uuid::Uuid;

use crate::worker::WorkerState;

/// Pipeline wide flags and error slot shared by every worker.
#[derive(Debug)]
pub struct PipelineControl {
    run_id: Uuid,
    /// Set once every worker thread has been started.
    running: AtomicBool,
    stopped: AtomicBool,
    /// First fatal error. Later errors are logged but not kept.
    error: Mutex<Option<RowpipeError>>,
    workers: Mutex<Vec<Arc<WorkerState>>>,
}

impl PipelineControl {
    pub fn new(run_id: Uuid) -> Self {
        PipelineControl {
            run_id,
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            error: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub(crate) fn register_worker(&self, state: Arc<WorkerState>) {
        self.workers.lock().push(state);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Request every worker to stop.
    pub fn stop_all(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!(run_id = %self.run_id, "stopping all workers");
        }
        for worker in self.workers.lock().iter() {
            worker.request_stop();
        }
    }

    pub fn pause_all(&self) {
        for worker in self.workers.lock().iter() {
            worker.request_pause();
        }
    }

    pub fn resume_all(&self) {
        for worker in self.workers.lock().iter() {
            worker.resume();
        }
    }

    /// Record an error and stop the pipeline.
    ///
    /// Only the first fatal error is kept.
    pub fn set_error(&self, err: RowpipeError) {
        if err.is_fatal() {
            error!(run_id = %self.run_id, %err, "pipeline error");
            let mut slot = self.error.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        } else {
            debug!(run_id = %self.run_id, %err, "pipeline cancelled");
        }
        self.stop_all();
    }

    pub fn has_error(&self) -> bool {
        self.error.lock().is_some()
    }

    pub(crate) fn take_error(&self) -> Option<RowpipeError> {
        self.error.lock().take()
    }
}
