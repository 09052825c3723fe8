use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rowpipe_core::config::PipelineConfig;
use rowpipe_core::graph::{Hop, PipelineGraph, StageDefinition};
use rowpipe_core::pipeline::{Pipeline, StageSnapshot};
use rowpipe_core::row::Row;
use rowpipe_core::stage::Stage;
use rowpipe_core::stages::GenerateRows;
use rowpipe_core::testutil::{CollectSink, TestRegistry};
use rowpipe_core::worker::{RowIo, RowListener, WorkerStatus};
use rowpipe_error::Result;

fn generator(name: &str, count: i64) -> StageDefinition {
    StageDefinition::new(name, GenerateRows::KIND).with_option("count", count)
}

fn linear_graph(name: &str, count: i64, delay_ms: i64) -> PipelineGraph {
    PipelineGraph::new(name)
        .with_stage(generator("gen", count).with_option("delay_ms", delay_ms))
        .with_stage(StageDefinition::new("pass", "dummy"))
        .with_stage(StageDefinition::new("sink", CollectSink::KIND))
        .with_hop(Hop::new("gen", "pass"))
        .with_hop(Hop::new("pass", "sink"))
}

fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

fn buffered_sizes(snapshots: &[StageSnapshot]) -> Vec<(Vec<usize>, Vec<usize>)> {
    snapshots
        .iter()
        .map(|s| (s.input_sizes.clone(), s.output_sizes.clone()))
        .collect()
}

#[test]
fn drains_every_row_with_backpressure() {
    logutil::init_test();

    let registry = TestRegistry::new();
    let graph = PipelineGraph::new("drain")
        .with_stage(generator("gen", 1000))
        .with_stage(StageDefinition::new("pass", "dummy").with_copies(2))
        .with_stage(StageDefinition::new("sink", CollectSink::KIND))
        .with_hop(Hop::new("gen", "pass"))
        .with_hop(Hop::new("pass", "sink"));

    let config = PipelineConfig {
        channel_capacity: 4,
        ..Default::default()
    };
    let result = Pipeline::build(graph, registry.registry(), config)
        .unwrap()
        .execute()
        .unwrap();

    let mut values = registry.collector().ints("sink", 0, "id");
    values.sort_unstable();
    assert_eq!((1..=1000).collect::<Vec<i64>>(), values);

    assert_eq!(1000, result.stage_totals("pass").lines_read);
    assert_eq!(1000, result.stage_totals("pass").lines_written);
    assert_eq!(1000, result.stage_totals("sink").lines_read);
    for snapshot in &result.snapshots {
        assert_eq!(0, snapshot.buffered(), "{}", snapshot.id);
        assert_eq!(WorkerStatus::Finished, snapshot.status);
        assert!(snapshot.runtime().is_some());
    }
}

#[test]
fn many_inputs_are_all_read() {
    logutil::init_test();

    // Small batches force the reader to peek at every input.
    let registry = TestRegistry::new();
    let graph = PipelineGraph::new("many_inputs")
        .with_stage(generator("gen", 300).with_copies(3))
        .with_stage(StageDefinition::new("sink", CollectSink::KIND))
        .with_hop(Hop::new("gen", "sink"));

    let config = PipelineConfig {
        batch_quantum: 2,
        ..Default::default()
    };
    let result = Pipeline::build(graph, registry.registry(), config)
        .unwrap()
        .execute()
        .unwrap();

    assert_eq!(900, registry.collector().count("sink"));
    assert_eq!(900, result.stage_totals("gen").lines_written);
}

#[test]
fn status_transitions() {
    logutil::init_test();

    let registry = TestRegistry::new();
    let mut pipeline =
        Pipeline::build(linear_graph("status", 10, 0), registry.registry(), PipelineConfig::default())
            .unwrap();
    let statuses = |pipeline: &Pipeline| -> Vec<WorkerStatus> {
        pipeline.snapshot().iter().map(|s| s.status).collect()
    };

    assert_eq!(vec![WorkerStatus::Empty; 3], statuses(&pipeline));
    pipeline.init_all().unwrap();
    assert_eq!(vec![WorkerStatus::Idle; 3], statuses(&pipeline));

    pipeline.start_all().unwrap();
    pipeline.wait_until_finished().unwrap();
    assert_eq!(vec![WorkerStatus::Finished; 3], statuses(&pipeline));
    assert!(pipeline.is_finished());

    pipeline.cleanup();
    assert_eq!(vec![WorkerStatus::Disposed; 3], statuses(&pipeline));
}

#[test]
fn stop_all_halts_every_copy() {
    logutil::init_test();

    let registry = TestRegistry::new();
    let mut pipeline = Pipeline::build(
        linear_graph("stop", 1_000_000, 1),
        registry.registry(),
        PipelineConfig::default(),
    )
    .unwrap();
    pipeline.init_all().unwrap();
    pipeline.start_all().unwrap();

    assert!(wait_for(Duration::from_secs(5), || registry.collector().count("sink") > 0));
    pipeline.stop_all();
    let result = pipeline.wait_until_finished().unwrap();

    for snapshot in &result.snapshots {
        assert_eq!(WorkerStatus::Stopped, snapshot.status, "{}", snapshot.id);
    }
    assert!(result.stage_totals("gen").lines_written < 1_000_000);
    pipeline.cleanup();
}

#[test]
fn pause_and_resume() {
    logutil::init_test();

    let registry = TestRegistry::new();
    let mut pipeline =
        Pipeline::build(linear_graph("pause", 300, 1), registry.registry(), PipelineConfig::default())
            .unwrap();
    pipeline.init_all().unwrap();
    pipeline.start_all().unwrap();

    assert!(wait_for(Duration::from_secs(5), || registry.collector().count("sink") >= 5));
    pipeline.pause_all();
    assert!(wait_for(Duration::from_secs(1), || {
        pipeline.snapshot().iter().all(|s| s.status == WorkerStatus::Paused)
    }));

    // Let in flight rows settle, then nothing moves while paused.
    thread::sleep(Duration::from_millis(50));
    let collected = registry.collector().count("sink");
    let sizes = buffered_sizes(&pipeline.snapshot());
    for _ in 0..5 {
        thread::sleep(Duration::from_millis(10));
        assert_eq!(sizes, buffered_sizes(&pipeline.snapshot()));
        assert_eq!(collected, registry.collector().count("sink"));
    }

    pipeline.resume_all();
    let result = pipeline.wait_until_finished().unwrap();

    // No row lost or duplicated across the pause.
    assert_eq!((1..=300).collect::<Vec<i64>>(), registry.collector().ints("sink", 0, "id"));
    assert_eq!(300, result.stage_totals("sink").lines_read);
    pipeline.cleanup();
}

/// Stage that has no rows and ends once its gate opens.
#[derive(Debug)]
struct GatedEnd {
    gate: Arc<AtomicBool>,
}

impl Stage for GatedEnd {
    fn process_row(&mut self, _io: &mut RowIo) -> Result<bool> {
        while !self.gate.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(false)
    }
}

#[test]
fn pause_after_last_row_still_finishes() {
    logutil::init_test();

    let gate = Arc::new(AtomicBool::new(false));
    let stage_gate = gate.clone();
    let registry = TestRegistry::new().with_stage("gated", move |_, _| {
        Ok(Box::new(GatedEnd {
            gate: stage_gate.clone(),
        }))
    });
    let graph = PipelineGraph::new("late_pause").with_stage(StageDefinition::new("gated", "gated"));

    let mut pipeline = Pipeline::build(graph, registry.registry(), PipelineConfig::default()).unwrap();
    pipeline.init_all().unwrap();
    pipeline.start_all().unwrap();
    let status = |pipeline: &Pipeline| pipeline.snapshot()[0].status;

    assert!(wait_for(Duration::from_secs(5), || status(&pipeline) == WorkerStatus::Running));
    pipeline.pause_all();
    assert_eq!(WorkerStatus::Paused, status(&pipeline));

    gate.store(true, Ordering::Release);
    let result = pipeline.wait_until_finished().unwrap();
    assert_eq!(WorkerStatus::Finished, result.snapshots[0].status);
    assert!(pipeline.is_finished());

    pipeline.cleanup();
    assert_eq!(WorkerStatus::Disposed, status(&pipeline));
}

#[derive(Debug, Default)]
struct CountingListener {
    read: Arc<AtomicUsize>,
    written: Arc<AtomicUsize>,
}

impl RowListener for CountingListener {
    fn row_read(&mut self, _row: &Row) {
        self.read.fetch_add(1, Ordering::Relaxed);
    }

    fn row_written(&mut self, _row: &Row) {
        self.written.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn listeners_observe_rows() {
    logutil::init_test();

    let registry = TestRegistry::new();
    let mut pipeline =
        Pipeline::build(linear_graph("listeners", 25, 0), registry.registry(), PipelineConfig::default())
            .unwrap();

    let listener = CountingListener::default();
    let read = listener.read.clone();
    let written = listener.written.clone();
    pipeline.add_listener("pass", 0, Box::new(listener)).unwrap();
    assert!(pipeline.add_listener("pass", 1, Box::new(CountingListener::default())).is_err());

    pipeline.execute().unwrap();
    assert_eq!(25, read.load(Ordering::Relaxed));
    assert_eq!(25, written.load(Ordering::Relaxed));
}

#[test]
fn result_serializes() {
    logutil::init_test();

    let registry = TestRegistry::new();
    let result = Pipeline::build(linear_graph("json", 3, 0), registry.registry(), PipelineConfig::default())
        .unwrap()
        .execute()
        .unwrap();

    let json = serde_json::to_value(&result).unwrap();
    // Read by both the pass through and the sink.
    assert_eq!(6, json["totals"]["lines_read"].as_u64().unwrap());
    assert_eq!(3, json["snapshots"].as_array().unwrap().len());
}
