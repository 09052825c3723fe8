//! Stages and helpers for exercising pipelines in tests.
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use rowpipe_error::Result;

use crate::graph::{StageCopyId, StageDefinition};
use crate::row::{DataType, Field, Row, RowLayout, Value};
use crate::stage::{Stage, StageRegistry};
use crate::worker::RowIo;

/// Layout with one integer field per name.
pub fn int_layout(names: &[&str]) -> Arc<RowLayout> {
    Arc::new(RowLayout::new(
        names.iter().map(|name| Field::new(*name, DataType::Integer)),
    ))
}

/// Row of integer values. Panics if the value count doesn't match the
/// layout.
pub fn int_row(layout: &Arc<RowLayout>, values: &[i64]) -> Row {
    Row::try_new(layout.clone(), values.iter().map(|v| Value::Integer(*v)).collect())
        .unwrap_or_else(|e| panic!("invalid test row: {e}"))
}

/// Rows recorded by collector stages, per stage copy.
#[derive(Debug, Clone, Default)]
pub struct RowCollector {
    rows: Arc<Mutex<HashMap<StageCopyId, Vec<Row>>>>,
}

impl RowCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, id: &StageCopyId, row: Row) {
        self.rows.lock().entry(id.clone()).or_default().push(row);
    }

    /// Rows received by one copy, in arrival order.
    pub fn rows(&self, stage: &str, copy: usize) -> Vec<Row> {
        self.rows
            .lock()
            .get(&StageCopyId::new(stage, copy))
            .cloned()
            .unwrap_or_default()
    }

    /// Integer values of `field` received by one copy, in arrival order.
    pub fn ints(&self, stage: &str, copy: usize, field: &str) -> Vec<i64> {
        self.rows(stage, copy)
            .iter()
            .filter_map(|row| row.get(field))
            .filter_map(|v| match v {
                Value::Integer(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    /// Number of rows received by every copy of `stage`.
    pub fn count(&self, stage: &str) -> usize {
        self.rows
            .lock()
            .iter()
            .filter(|(id, _)| id.stage == stage)
            .map(|(_, rows)| rows.len())
            .sum()
    }
}

/// Sink recording every row it reads.
#[derive(Debug)]
pub struct CollectSink {
    collector: RowCollector,
}

impl CollectSink {
    pub const KIND: &'static str = "collect";

    pub fn new(collector: RowCollector) -> Self {
        CollectSink { collector }
    }
}

impl Stage for CollectSink {
    fn process_row(&mut self, io: &mut RowIo) -> Result<bool> {
        match io.get_row()? {
            Some(row) => {
                self.collector.record(io.id(), row.clone());
                io.increment_lines_output();
                io.put_row(row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Sends every row it reads to error handling.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

impl RejectAll {
    pub const KIND: &'static str = "reject_all";
    pub const CODE: &'static str = "TEST001";
}

impl Stage for RejectAll {
    fn process_row(&mut self, io: &mut RowIo) -> Result<bool> {
        match io.get_row()? {
            Some(row) => {
                io.put_error_row(row, 1, "rejected", "", Self::CODE)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Emits a fixed list of rows.
#[derive(Debug, Clone)]
pub struct EmitRows {
    rows: std::vec::IntoIter<Row>,
}

impl EmitRows {
    pub fn new(rows: Vec<Row>) -> Self {
        EmitRows { rows: rows.into_iter() }
    }
}

impl Stage for EmitRows {
    fn process_row(&mut self, io: &mut RowIo) -> Result<bool> {
        match self.rows.next() {
            Some(row) => {
                io.put_row(row)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Fails initialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailInit;

impl FailInit {
    pub const KIND: &'static str = "fail_init";
}

impl Stage for FailInit {
    fn init(&mut self, _io: &mut RowIo) -> Result<bool> {
        Ok(false)
    }

    fn process_row(&mut self, _io: &mut RowIo) -> Result<bool> {
        Ok(false)
    }
}

/// Registry with the built in stages plus the test stages, sharing one
/// collector.
#[derive(Debug, Clone)]
pub struct TestRegistry {
    registry: StageRegistry,
    collector: RowCollector,
}

impl Default for TestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRegistry {
    pub fn new() -> Self {
        let collector = RowCollector::new();
        let mut registry = StageRegistry::with_builtins();

        let sink_collector = collector.clone();
        registry.register(CollectSink::KIND, move |_: &StageDefinition, _| {
            Ok(Box::new(CollectSink::new(sink_collector.clone())))
        });
        registry.register(RejectAll::KIND, |_, _| Ok(Box::new(RejectAll)));
        registry.register(FailInit::KIND, |_, _| Ok(Box::new(FailInit)));

        TestRegistry { registry, collector }
    }

    /// Register `kind` as a stage emitting `rows`. Every copy emits all of
    /// them.
    pub fn with_rows(mut self, kind: impl Into<String>, rows: Vec<Row>) -> Self {
        self.registry
            .register(kind, move |_, _| Ok(Box::new(EmitRows::new(rows.clone()))));
        self
    }

    /// Register an arbitrary stage factory under `kind`.
    pub fn with_stage<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&StageDefinition, usize) -> Result<Box<dyn Stage>> + Send + Sync + 'static,
    {
        self.registry.register(kind, factory);
        self
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn collector(&self) -> &RowCollector {
        &self.collector
    }
}
