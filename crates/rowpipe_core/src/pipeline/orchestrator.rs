use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use rowpipe_error::{ErrorKind, RowpipeError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span};
use uuid::Uuid;

use super::control::PipelineControl;
use super::monitor::StageSnapshot;
use crate::config::PipelineConfig;
use crate::dispatch::Topology;
use crate::graph::PipelineGraph;
use crate::remote::PortPool;
use crate::stage::StageRegistry;
use crate::worker::{Counters, RowListener, StageWorker, WorkerContext, WorkerState, WorkerStatus};

/// Outcome of a pipeline run that finished without a fatal error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    /// Counters summed over every stage copy.
    pub totals: Counters,
    pub snapshots: Vec<StageSnapshot>,
}

impl PipelineResult {
    pub fn snapshot(&self, stage: &str, copy: usize) -> Option<&StageSnapshot> {
        self.snapshots
            .iter()
            .find(|s| s.id.stage == stage && s.id.copy == copy)
    }

    /// Counters of every copy of `stage` summed together.
    pub fn stage_totals(&self, stage: &str) -> Counters {
        let mut totals = Counters::default();
        for snapshot in self.snapshots.iter().filter(|s| s.id.stage == stage) {
            totals.merge(&snapshot.counters);
        }
        totals
    }
}

/// A built pipeline: every stage copy and every channel, ready to run.
///
/// Lifecycle is `build`, `init_all`, `start_all`, `wait_until_finished`,
/// then `cleanup`. `execute` runs all of them in order.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    config: Arc<PipelineConfig>,
    control: Arc<PipelineControl>,
    topology: Topology,
    states: Vec<Arc<WorkerState>>,
    /// Workers not currently running on a thread.
    workers: Vec<StageWorker>,
    handles: Vec<JoinHandle<StageWorker>>,
}

impl Pipeline {
    /// Build a pipeline using a private port pool.
    pub fn build(graph: PipelineGraph, registry: &StageRegistry, config: PipelineConfig) -> Result<Self> {
        Self::build_with_port_pool(graph, registry, config, Arc::new(PortPool::new()))
    }

    /// Build a pipeline whose remote outputs reserve ports from `port_pool`.
    ///
    /// Validates the graph and configuration, creates every channel and
    /// binds every stage copy before any thread exists.
    pub fn build_with_port_pool(
        graph: PipelineGraph,
        registry: &StageRegistry,
        config: PipelineConfig,
        port_pool: Arc<PortPool>,
    ) -> Result<Self> {
        config.validate()?;
        graph.validate()?;

        let control = Arc::new(PipelineControl::new(Uuid::new_v4()));
        let topology = Topology::build(&graph, config.channel_capacity)?;
        let ctx = WorkerContext {
            config: Arc::new(config),
            control: control.clone(),
            distribution: graph.distribution.clone().map(Arc::new),
            port_pool,
        };

        let mut workers = Vec::new();
        for stage in &graph.stages {
            let def = Arc::new(stage.clone());
            for copy in 0..stage.copies {
                let binding = topology.bind(&graph, stage, copy)?;
                let logic = registry.create(stage, copy)?;
                workers.push(StageWorker::new(def.clone(), copy, binding, logic, &ctx));
            }
        }
        let states = workers.iter().map(|w| w.state().clone()).collect();

        info!(
            run_id = %control.run_id(),
            pipeline = %graph.name,
            stages = graph.stages.len(),
            copies = workers.len(),
            channels = topology.channel_count(),
            "built pipeline"
        );

        Ok(Pipeline {
            name: graph.name,
            config: ctx.config,
            control,
            topology,
            states,
            workers,
            handles: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_id(&self) -> Uuid {
        self.control.run_id()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn control(&self) -> &Arc<PipelineControl> {
        &self.control
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Attach a row listener to a stage copy. Only possible before start.
    pub fn add_listener(&mut self, stage: &str, copy: usize, listener: Box<dyn RowListener>) -> Result<()> {
        let worker = self
            .workers
            .iter_mut()
            .find(|w| w.id().stage == stage && w.id().copy == copy)
            .ok_or_else(|| {
                RowpipeError::new("No idle stage copy to attach listener to")
                    .with_kind(ErrorKind::InvalidTopology)
                    .with_field("stage", stage.to_string())
                    .with_field("copy", copy)
            })?;
        worker.add_listener(listener);
        Ok(())
    }

    /// Initialize every stage copy, each on its own thread.
    ///
    /// Returns the first initialization error. No copy runs if any copy
    /// failed.
    pub fn init_all(&mut self) -> Result<()> {
        let run_id = self.control.run_id();
        let results: Vec<Result<()>> = thread::scope(|s| {
            let handles: Vec<_> = self
                .workers
                .iter_mut()
                .map(|worker| {
                    let span = info_span!("init", %run_id, stage = %worker.id().stage, copy = worker.id().copy);
                    s.spawn(move || span.in_scope(|| worker.init()))
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(RowpipeError::new("Stage copy panicked during initialization")
                            .with_kind(ErrorKind::Initialization))
                    })
                })
                .collect()
        });

        let mut first = None;
        for err in results.into_iter().filter_map(|r| r.err()) {
            error!(%run_id, %err, "initialization failed");
            if first.is_none() {
                first = Some(err);
            }
        }

        match first {
            Some(err) => {
                self.control.stop_all();
                Err(err)
            }
            None => {
                debug!(%run_id, copies = self.workers.len(), "initialized all stage copies");
                Ok(())
            }
        }
    }

    /// Start a thread per stage copy, then release them all at once.
    pub fn start_all(&mut self) -> Result<()> {
        if let Some(worker) = self.workers.iter().find(|w| w.status() != WorkerStatus::Idle) {
            return Err(RowpipeError::new("Stage copy is not initialized")
                .with_kind(ErrorKind::Internal)
                .with_field("stage", worker.id())
                .with_field("status", worker.status()));
        }

        let run_id = self.control.run_id();
        let mut workers = std::mem::take(&mut self.workers).into_iter();
        while let Some(mut worker) = workers.next() {
            let id = worker.id().clone();
            let span = info_span!("worker", %run_id, stage = %id.stage, copy = id.copy);
            let control = self.control.clone();

            let spawned = thread::Builder::new()
                .name(format!("rowpipe-{id}"))
                .spawn(move || {
                    let _guard = span.enter();
                    if panic::catch_unwind(AssertUnwindSafe(|| worker.run())).is_err() {
                        control.set_error(
                            RowpipeError::new("Stage copy panicked").with_field("stage", worker.id()),
                        );
                    }
                    worker
                });

            match spawned {
                Ok(handle) => self.handles.push(handle),
                Err(e) => {
                    self.workers.extend(workers);
                    self.control.stop_all();
                    self.control.set_running(true);
                    return Err(RowpipeError::with_source("Failed to spawn worker thread", Box::new(e))
                        .with_field("stage", id));
                }
            }
        }

        self.control.set_running(true);
        info!(%run_id, pipeline = %self.name, threads = self.handles.len(), "started pipeline");
        Ok(())
    }

    /// If every started worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|h| h.is_finished())
    }

    fn join_workers(&mut self) {
        for handle in std::mem::take(&mut self.handles) {
            match handle.join() {
                Ok(worker) => self.workers.push(worker),
                Err(_) => self
                    .control
                    .set_error(RowpipeError::new("Worker thread panicked")),
            }
        }
    }

    /// Block until every worker thread exits.
    ///
    /// Returns the first fatal error recorded during the run, if any.
    pub fn wait_until_finished(&mut self) -> Result<PipelineResult> {
        self.join_workers();
        self.control.set_running(false);

        let snapshots = self.snapshot();
        if let Some(err) = self.control.take_error() {
            return Err(err);
        }

        let mut totals = Counters::default();
        for snapshot in &snapshots {
            totals.merge(&snapshot.counters);
        }
        info!(
            run_id = %self.control.run_id(),
            pipeline = %self.name,
            read = totals.lines_read,
            written = totals.lines_written,
            rejected = totals.lines_rejected,
            "pipeline finished"
        );

        Ok(PipelineResult {
            run_id: self.control.run_id(),
            totals,
            snapshots,
        })
    }

    pub fn stop_all(&self) {
        self.control.stop_all();
    }

    pub fn pause_all(&self) {
        self.control.pause_all();
    }

    pub fn resume_all(&self) {
        self.control.resume_all();
    }

    /// Snapshot every stage copy, in build order.
    pub fn snapshot(&self) -> Vec<StageSnapshot> {
        self.states.iter().map(|s| StageSnapshot::capture(s)).collect()
    }

    /// Dispose every stage copy. Waits for running workers first.
    pub fn cleanup(&mut self) {
        if !self.handles.is_empty() {
            self.control.stop_all();
            self.join_workers();
        }
        for worker in &mut self.workers {
            worker.dispose();
        }
        debug!(run_id = %self.control.run_id(), "cleaned up pipeline");
    }

    /// Initialize, run and clean up the pipeline.
    pub fn execute(mut self) -> Result<PipelineResult> {
        if let Err(err) = self.init_all() {
            self.cleanup();
            return Err(err);
        }
        if let Err(err) = self.start_all() {
            self.cleanup();
            return Err(err);
        }
        let result = self.wait_until_finished();
        self.cleanup();
        result
    }
}
