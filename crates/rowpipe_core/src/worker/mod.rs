pub mod counters;
pub mod listener;
pub mod rejection;
pub mod rows;
pub mod state;
pub mod status;

use std::sync::Arc;

use rowpipe_error::{ErrorKind, RowpipeError, Result};
use tracing::{debug, warn};

pub use counters::Counters;
pub use listener::RowListener;
pub use rejection::check_rejection_rates;
pub use rows::RowIo;
pub use state::WorkerState;
pub use status::WorkerStatus;

use crate::config::PipelineConfig;
use crate::dispatch::Binding;
use crate::graph::{StageCopyId, StageDefinition};
use crate::partition::PartitionDistribution;
use crate::pipeline::control::PipelineControl;
use crate::remote::PortPool;
use crate::stage::Stage;

/// Pipeline wide resources handed to every worker.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub config: Arc<PipelineConfig>,
    pub control: Arc<PipelineControl>,
    pub distribution: Option<Arc<PartitionDistribution>>,
    pub port_pool: Arc<PortPool>,
}

/// Drives the stage logic of a single stage copy.
#[derive(Debug)]
pub struct StageWorker {
    state: Arc<WorkerState>,
    control: Arc<PipelineControl>,
    stage: Box<dyn Stage>,
    io: RowIo,
}

impl StageWorker {
    pub fn new(
        def: Arc<StageDefinition>,
        copy: usize,
        binding: Binding,
        stage: Box<dyn Stage>,
        ctx: &WorkerContext,
    ) -> Self {
        let state = Arc::new(WorkerState::new(StageCopyId::new(&def.name, copy)));
        ctx.control.register_worker(state.clone());
        let io = RowIo::new(def, copy, binding, state.clone(), ctx);

        StageWorker {
            state,
            control: ctx.control.clone(),
            stage,
            io,
        }
    }

    pub fn id(&self) -> &StageCopyId {
        self.state.id()
    }

    pub fn state(&self) -> &Arc<WorkerState> {
        &self.state
    }

    pub fn status(&self) -> WorkerStatus {
        self.state.status()
    }

    pub fn add_listener(&mut self, listener: Box<dyn RowListener>) {
        self.io.add_listener(listener);
    }

    /// Initialize the stage copy.
    ///
    /// Binds the server sockets of remote outputs, then runs the stage's
    /// init. The copy ends up idle on success and failed otherwise.
    pub fn init(&mut self) -> Result<()> {
        let state = self.state.clone();
        let status = state.status_cell();
        status.transition(WorkerStatus::Init)?;

        let result = match self.io.open_remote_outputs() {
            Ok(()) => self.stage.init(&mut self.io),
            Err(e) => Err(e),
        };

        match result {
            Ok(true) => {
                status.transition(WorkerStatus::Idle)?;
                debug!(copy = %self.id(), "initialized");
                Ok(())
            }
            Ok(false) => {
                status.transition(WorkerStatus::Failed)?;
                self.io.close_remote(true);
                Err(RowpipeError::new("Stage copy failed to initialize")
                    .with_kind(ErrorKind::Initialization)
                    .with_field("stage", self.id()))
            }
            Err(e) => {
                status.transition(WorkerStatus::Failed)?;
                self.io.close_remote(true);
                Err(RowpipeError::with_source("Stage copy failed to initialize", Box::new(e))
                    .with_kind(ErrorKind::Initialization)
                    .with_field("stage", self.id()))
            }
        }
    }

    /// Run the row pump until the stage has no more work or a stop is
    /// observed.
    ///
    /// Errors are reported through the pipeline control, which stops every
    /// other copy.
    pub fn run(&mut self) {
        let state = self.state.clone();
        let status = state.status_cell();
        if self.state.is_stopped() {
            // Stopped before it ever ran.
            let _ = status.transition(WorkerStatus::Stopped);
            self.io.set_output_done();
            self.io.close_remote(true);
            self.state.mark_stopped();
            return;
        }

        if let Err(err) = status.transition(WorkerStatus::Running) {
            self.fail(err);
            return;
        }
        self.state.mark_started();
        debug!(copy = %self.id(), "running");

        loop {
            if self.state.is_stopped() {
                break;
            }
            match self.stage.process_row(&mut self.io) {
                Ok(true) => (),
                Ok(false) => break,
                Err(err) => {
                    self.fail(err);
                    break;
                }
            }
        }

        let stopped = self.state.is_stopped();
        if stopped {
            self.stage.stop_running(&mut self.io);
        }

        self.io.set_output_done();
        self.io.close_remote(stopped);

        let final_status = if stopped {
            // A stop that raced the end of the loop may not have moved the
            // status to halting yet.
            let _ = status.transition_from(WorkerStatus::Running, WorkerStatus::Halting)
                || status.transition_from(WorkerStatus::Paused, WorkerStatus::Halting);
            status.transition(WorkerStatus::Stopped)
        } else {
            self.finish()
        };
        if let Err(err) = final_status {
            warn!(copy = %self.id(), %err, "unexpected final status transition");
        }

        self.state.mark_stopped();
        let counters = self.state.counters();
        debug!(
            copy = %self.id(),
            status = %self.state.status(),
            read = counters.lines_read,
            written = counters.lines_written,
            rejected = counters.lines_rejected,
            "finished"
        );
    }

    /// Move a copy that ran out of work to finished.
    ///
    /// A pause requested after the last row has nothing left to hold, so it
    /// is released first.
    fn finish(&self) -> Result<WorkerStatus> {
        let status = self.state.status_cell();
        loop {
            self.state.resume();
            match status.transition(WorkerStatus::Finished) {
                Ok(next) => return Ok(next),
                Err(_) if status.get() == WorkerStatus::Paused => continue,
                // Stopped after the last row but before finishing.
                Err(_) => return status.transition(WorkerStatus::Stopped),
            }
        }
    }

    fn fail(&self, err: RowpipeError) {
        self.state.update_counters(|c| c.errors += 1);
        let err = if err.field("stage").is_some() {
            err
        } else {
            err.with_field("stage", self.id())
        };
        self.control.set_error(err);
    }

    /// Release the stage's resources. Only copies that finished or stopped
    /// move to disposed.
    pub fn dispose(&mut self) {
        self.stage.dispose(&mut self.io);
        let status = self.state.status_cell();
        if status.transition_from(WorkerStatus::Finished, WorkerStatus::Disposed)
            || status.transition_from(WorkerStatus::Stopped, WorkerStatus::Disposed)
        {
            debug!(copy = %self.id(), "disposed");
        }
    }
}
