use std::sync::Arc;
use std::thread;

use rowpipe_error::{ErrorKind, RowpipeError, Result};
use tracing::{debug, info, trace, warn};

use super::WorkerContext;
use super::listener::RowListener;
use super::rejection::check_rejection_rates;
use super::state::WorkerState;
use crate::channel::RowChannel;
use crate::config::PipelineConfig;
use crate::dispatch::{Binding, Repartitioning};
use crate::graph::{RemoteEdge, StageCopyId, StageDefinition};
use crate::partition::{ClusterTargets, PartitionDistribution, PartitionRouter, route};
use crate::pipeline::control::PipelineControl;
use crate::remote::{PortPool, RemoteInput, RemoteOutput};
use crate::row::{Row, RowLayout, Value};

/// Row input and output of a single stage copy.
///
/// Reads round robin over the input channels and writes according to the
/// routing derived from the topology: round robin or clone to all outputs,
/// partitioned, or mirrored.
#[derive(Debug)]
pub struct RowIo {
    def: Arc<StageDefinition>,
    id: StageCopyId,
    config: Arc<PipelineConfig>,
    state: Arc<WorkerState>,
    control: Arc<PipelineControl>,

    inputs: Vec<Arc<RowChannel>>,
    outputs: Vec<Arc<RowChannel>>,
    error_channel: Option<Arc<RowChannel>>,
    unused: Vec<Arc<RowChannel>>,

    current_input: usize,
    current_output: usize,
    /// Rows read from the current input since the last switch.
    block_pointer: usize,
    running_checked: bool,

    repartitioning: Repartitioning,
    router: Option<PartitionRouter>,
    next_data_stage_count: usize,
    distribution: Option<Arc<PartitionDistribution>>,
    cluster_targets: Option<ClusterTargets>,

    /// Layout of the first row read, used by safe mode.
    reference_layout: Option<Arc<RowLayout>>,
    /// Input layout and the error row layout derived from it.
    error_layout: Option<(Arc<RowLayout>, Arc<RowLayout>)>,
    rejection_tripped: bool,

    listeners: Vec<Box<dyn RowListener>>,

    port_pool: Arc<PortPool>,
    pending_remote_outputs: Vec<(RemoteEdge, Arc<RowChannel>)>,
    remote_outputs: Vec<RemoteOutput>,
    remote_inputs: Vec<RemoteInput>,
    remote_inputs_opened: bool,
}

impl RowIo {
    pub(crate) fn new(
        def: Arc<StageDefinition>,
        copy: usize,
        binding: Binding,
        state: Arc<WorkerState>,
        ctx: &WorkerContext,
    ) -> Self {
        let router = match &binding.repartitioning {
            Repartitioning::Special(config) => Some(PartitionRouter::new(config.clone())),
            _ => None,
        };
        let remote_inputs = binding
            .remote_inputs
            .into_iter()
            .map(|(edge, channel)| RemoteInput::new(edge, channel))
            .collect();

        state.set_channels(binding.inputs.clone(), binding.outputs.clone());

        RowIo {
            id: StageCopyId::new(&def.name, copy),
            def,
            config: ctx.config.clone(),
            state,
            control: ctx.control.clone(),
            inputs: binding.inputs,
            outputs: binding.outputs,
            error_channel: binding.error_channel,
            unused: binding.unused,
            current_input: 0,
            current_output: 0,
            block_pointer: 0,
            running_checked: false,
            repartitioning: binding.repartitioning,
            router,
            next_data_stage_count: binding.next_data_stage_count,
            distribution: ctx.distribution.clone().filter(|d| !d.is_empty()),
            cluster_targets: None,
            reference_layout: None,
            error_layout: None,
            rejection_tripped: false,
            listeners: Vec::new(),
            port_pool: ctx.port_pool.clone(),
            pending_remote_outputs: binding.remote_outputs,
            remote_outputs: Vec::new(),
            remote_inputs,
            remote_inputs_opened: false,
        }
    }

    pub fn definition(&self) -> &StageDefinition {
        &self.def
    }

    pub fn id(&self) -> &StageCopyId {
        &self.id
    }

    pub fn copy(&self) -> usize {
        self.id.copy
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    pub fn repartitioning(&self) -> &Repartitioning {
        &self.repartitioning
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn has_error_channel(&self) -> bool {
        self.error_channel.is_some()
    }

    pub fn add_listener(&mut self, listener: Box<dyn RowListener>) {
        self.listeners.push(listener);
    }

    /// Find the input channel fed by `stage`.
    pub fn find_input_channel(&self, stage: &str) -> Option<Arc<RowChannel>> {
        self.inputs.iter().find(|c| c.origin().stage == stage).cloned()
    }

    /// Find the output channel feeding `stage`.
    pub fn find_output_channel(&self, stage: &str) -> Option<Arc<RowChannel>> {
        self.outputs
            .iter()
            .find(|c| c.destination().stage == stage)
            .cloned()
    }

    pub fn increment_lines_input(&self) {
        self.state.update_counters(|c| c.lines_input += 1);
    }

    pub fn increment_lines_output(&self) {
        self.state.update_counters(|c| c.lines_output += 1);
    }

    pub fn increment_lines_updated(&self) {
        self.state.update_counters(|c| c.lines_updated += 1);
    }

    pub fn increment_lines_skipped(&self) {
        self.state.update_counters(|c| c.lines_skipped += 1);
    }

    fn wait_while_paused(&self) {
        while self.state.is_paused() && !self.state.is_stopped() {
            thread::sleep(self.config.pause_poll());
        }
    }

    fn wait_until_running(&mut self) {
        if self.running_checked {
            return;
        }
        while !self.control.is_running() && !self.state.is_stopped() {
            thread::sleep(self.config.pause_poll());
        }
        self.running_checked = true;
    }

    fn back_off(&self) {
        thread::yield_now();
    }

    /// Open the remote input connections if not already done.
    ///
    /// Called on the first read. Stages writing before they read should call
    /// this first.
    pub fn open_remote_inputs_once(&mut self) -> Result<()> {
        if self.remote_inputs_opened {
            return Ok(());
        }
        self.remote_inputs_opened = true;

        for input in &mut self.remote_inputs {
            input
                .start(self.control.clone(), &self.config)
                .map_err(|e| e.with_field("stage", &self.id))?;
            self.inputs.push(input.channel().clone());
            debug!(edge = %input.edge(), "opened remote input");
        }
        if !self.remote_inputs.is_empty() {
            self.state.set_channels(self.inputs.clone(), self.outputs.clone());
        }
        Ok(())
    }

    /// Bind the server sockets for remote outputs and start streaming.
    pub(crate) fn open_remote_outputs(&mut self) -> Result<()> {
        if self.pending_remote_outputs.is_empty() {
            return Ok(());
        }
        if self.config.slave_name.is_none() {
            return Err(RowpipeError::new("Slave name must be set for stages with remote outputs")
                .with_kind(ErrorKind::InvalidConfig)
                .with_field("stage", &self.id));
        }

        for (edge, channel) in std::mem::take(&mut self.pending_remote_outputs) {
            let mut output = RemoteOutput::bind(edge, channel, self.port_pool.clone())?;
            output.start(self.control.clone(), &self.config)?;
            self.remote_outputs.push(output);
        }
        Ok(())
    }

    /// Wait for the remote transports of this copy to finish.
    ///
    /// With `abort` set blocked remote reads are interrupted.
    pub(crate) fn close_remote(&mut self, abort: bool) {
        for output in &mut self.remote_outputs {
            output.close();
        }
        for input in &mut self.remote_inputs {
            input.close(abort);
        }
    }

    /// Read the next row from any input.
    ///
    /// Returns `None` once every input is done and drained, or when the copy
    /// is stopped.
    pub fn get_row(&mut self) -> Result<Option<Row>> {
        self.wait_while_paused();

        if self.state.is_stopped() {
            trace!(copy = %self.id, "stopped, not reading more rows");
            self.control.stop_all();
            return Ok(None);
        }

        self.wait_until_running();
        self.open_remote_inputs_once()?;

        if self.inputs.is_empty() {
            return Ok(None);
        }

        if self.block_pointer >= self.config.batch_quantum {
            // Peek at the other inputs so a busy input can't starve the rest.
            for _ in 0..self.inputs.len() {
                self.next_input();
                if let Some(row) = self.inputs[self.current_input].pop_immediate() {
                    self.block_pointer += 1;
                    return self.row_read(row).map(Some);
                }
            }
        }

        if self.config.thread_priority_management {
            let channel = &self.inputs[self.current_input];
            if !channel.is_done() && channel.size() <= self.config.lower_buffer_boundary() {
                self.back_off();
            }
        }

        let pop_timeout = self.config.pop_timeout();
        loop {
            self.wait_while_paused();
            if self.state.is_stopped() {
                return Ok(None);
            }

            let channel = &self.inputs[self.current_input];
            if let Some(row) = channel.pop_wait(pop_timeout) {
                self.block_pointer += 1;
                return self.row_read(row).map(Some);
            }

            if channel.is_done() {
                if let Some(row) = channel.pop_immediate() {
                    self.block_pointer += 1;
                    return self.row_read(row).map(Some);
                }
                let finished = self.inputs.remove(self.current_input);
                debug!(copy = %self.id, channel = %finished, "input channel finished");
                if self.inputs.is_empty() {
                    return Ok(None);
                }
                if self.current_input >= self.inputs.len() {
                    self.current_input = 0;
                }
                self.block_pointer = 0;
                continue;
            }

            self.next_input();
        }
    }

    /// Read the next row from a specific input channel.
    ///
    /// Returns `None` once the channel is done and drained, or when the copy
    /// is stopped. A drained channel is removed from the active inputs.
    pub fn get_row_from(&mut self, channel: &RowChannel) -> Result<Option<Row>> {
        self.wait_while_paused();
        self.wait_until_running();

        let pop_timeout = self.config.pop_timeout();
        loop {
            if self.state.is_stopped() {
                return Ok(None);
            }
            if self.config.thread_priority_management
                && !channel.is_done()
                && channel.size() <= self.config.lower_buffer_boundary()
            {
                self.back_off();
            }
            if let Some(row) = channel.pop_wait(pop_timeout) {
                return self.row_read(row).map(Some);
            }
            if channel.is_done() {
                if let Some(row) = channel.pop_immediate() {
                    return self.row_read(row).map(Some);
                }
                if let Some(pos) = self.inputs.iter().position(|c| std::ptr::eq(c.as_ref(), channel)) {
                    self.inputs.remove(pos);
                    if self.current_input >= self.inputs.len() {
                        self.current_input = 0;
                    }
                    debug!(copy = %self.id, %channel, "input channel finished");
                }
                return Ok(None);
            }
        }
    }

    fn next_input(&mut self) {
        self.block_pointer = 0;
        if !self.inputs.is_empty() {
            self.current_input = (self.current_input + 1) % self.inputs.len();
        }
    }

    fn row_read(&mut self, row: Row) -> Result<Row> {
        self.state.update_counters(|c| c.lines_read += 1);

        if self.config.safe_mode {
            self.check_row_layout(&row)?;
        }
        for listener in &mut self.listeners {
            listener.row_read(&row);
        }

        self.verify_rejection_rates();
        Ok(row)
    }

    /// All rows read must share the layout of the first row.
    fn check_row_layout(&mut self, row: &Row) -> Result<()> {
        match &self.reference_layout {
            Some(reference) => {
                if !Arc::ptr_eq(reference, row.layout()) {
                    reference
                        .check_matches(row.layout())
                        .map_err(|e| e.with_field("stage", &self.id))?;
                }
            }
            None => {
                row.layout()
                    .check_unique_names()
                    .map_err(|e| e.with_field("stage", &self.id))?;
                self.reference_layout = Some(row.layout().clone());
            }
        }
        Ok(())
    }

    fn verify_rejection_rates(&mut self) {
        if self.rejection_tripped {
            return;
        }
        let Some(policy) = &self.def.error_policy else {
            return;
        };

        let counters = self.state.counters();
        if let Err(err) = check_rejection_rates(policy, counters.lines_rejected, counters.lines_read) {
            self.rejection_tripped = true;
            self.state.update_counters(|c| c.errors += 1);
            self.control.set_error(err.with_field("stage", &self.id));
        }
    }

    /// Push a row into a channel, retrying until it is accepted or the copy
    /// stops. Returns whether the row was accepted.
    fn push_to(&self, channel: &RowChannel, mut row: Row) -> bool {
        let timeout = self.config.push_timeout();
        loop {
            match channel.push_wait(row, timeout) {
                Ok(()) => return true,
                Err(rejected) => {
                    if self.state.is_stopped() {
                        return false;
                    }
                    row = rejected;
                }
            }
        }
    }

    fn push_counted(&self, channel: &RowChannel, row: Row) {
        if self.config.thread_priority_management
            && !channel.is_done()
            && channel.size() >= self.config.upper_buffer_boundary()
            && !self.state.is_stopped()
        {
            self.back_off();
        }
        if self.push_to(channel, row) {
            self.state.update_counters(|c| c.lines_written += 1);
        }
    }

    /// Write a row to the outputs.
    ///
    /// Rows put after the copy has been stopped are dropped.
    pub fn put_row(&mut self, row: Row) -> Result<()> {
        self.wait_while_paused();

        if self.state.is_stopped() {
            trace!(copy = %self.id, "stopped, dropping row");
            self.control.stop_all();
            return Ok(());
        }

        self.wait_until_running();

        for listener in &mut self.listeners {
            listener.row_written(&row);
        }

        if self.outputs.is_empty() {
            self.state.update_counters(|c| c.lines_written += 1);
            return Ok(());
        }

        match self.repartitioning {
            Repartitioning::None => {
                if self.def.distribute {
                    self.put_round_robin(row);
                } else {
                    self.put_to_all(row);
                }
            }
            Repartitioning::Special(_) => self.put_partitioned(row)?,
            Repartitioning::Mirror => self.put_to_all(row),
        }

        Ok(())
    }

    fn put_round_robin(&mut self, row: Row) {
        let channel = self.outputs[self.current_output].clone();
        self.push_counted(&channel, row);
        if self.outputs.len() > 1 {
            self.current_output = (self.current_output + 1) % self.outputs.len();
        }
    }

    /// Clone the row to every output, the last output getting the original.
    fn put_to_all(&mut self, row: Row) {
        let Some((last, rest)) = self.outputs.split_last() else {
            return;
        };
        for channel in rest {
            self.push_counted(channel, row.clone());
        }
        self.push_counted(last, row);
    }

    fn put_partitioned(&mut self, row: Row) -> Result<()> {
        let Repartitioning::Special(config) = &self.repartitioning else {
            return Err(RowpipeError::new("Stage copy is not repartitioning")
                .with_kind(ErrorKind::Internal)
                .with_field("stage", &self.id));
        };
        let partition = match &mut self.router {
            Some(router) => router.route(&row),
            None => route(&row, config),
        }
        .map_err(|e| e.with_field("stage", &self.id))?;

        if let Some(distribution) = &self.distribution {
            if self.cluster_targets.is_none() {
                let local_slave = self.config.slave_name.as_deref().unwrap_or_default();
                let targets =
                    ClusterTargets::resolve(distribution, &config.schema_name, local_slave, &self.outputs)
                        .map_err(|e| e.with_field("stage", &self.id))?;
                self.cluster_targets = Some(targets);
            }
            let target = match &self.cluster_targets {
                Some(targets) => targets.target(partition)?,
                None => None,
            };
            match target {
                Some(pos) => {
                    let channel = self.outputs[pos].clone();
                    self.push_counted(&channel, row);
                }
                None => info!(copy = %self.id, partition, "target channel for partition is not available"),
            }
            return Ok(());
        }

        let count = config.partition_count;
        for i in 0..self.next_data_stage_count {
            match self.outputs.get(partition + i * count) {
                Some(channel) => self.push_counted(channel, row.clone()),
                None => info!(copy = %self.id, partition, "target channel for partition is not available"),
            }
        }
        Ok(())
    }

    /// Write a row to one specific output channel, bypassing routing.
    pub fn put_row_to(&mut self, row: Row, channel: &RowChannel) -> Result<()> {
        self.wait_while_paused();

        for listener in &mut self.listeners {
            listener.row_written(&row);
        }

        if self.state.is_stopped() {
            trace!(copy = %self.id, "stopped, dropping row");
            self.control.stop_all();
            return Ok(());
        }

        if self.push_to(channel, row) {
            self.state.update_counters(|c| c.lines_written += 1);
        }
        Ok(())
    }

    /// Send a rejected row to error handling.
    ///
    /// The row is extended with the error count, descriptions, field names
    /// and codes and written to the error channel, if any. The rejected
    /// counter is incremented either way. Rows rejected after the copy has
    /// been stopped are dropped.
    pub fn put_error_row(
        &mut self,
        row: Row,
        nr_errors: i64,
        descriptions: impl Into<String>,
        fields: impl Into<String>,
        codes: impl Into<String>,
    ) -> Result<()> {
        let policy = self.def.error_policy.as_ref().ok_or_else(|| {
            RowpipeError::new("Stage has no error handling configured")
                .with_kind(ErrorKind::InvalidTopology)
                .with_field("stage", &self.id)
        })?;

        if self.state.is_stopped() {
            trace!(copy = %self.id, "stopped, dropping error row");
            return Ok(());
        }

        let layout = match &self.error_layout {
            Some((input, error)) if Arc::ptr_eq(input, row.layout()) || input == row.layout() => error.clone(),
            _ => {
                let error = Arc::new(row.layout().concat(&policy.error_fields_layout()));
                self.error_layout = Some((row.layout().clone(), error.clone()));
                error
            }
        };

        for listener in &mut self.listeners {
            listener.error_row_written(&row);
        }

        let error_row = row.extend(
            layout,
            [
                Value::Integer(nr_errors),
                Value::String(descriptions.into()),
                Value::String(fields.into()),
                Value::String(codes.into()),
            ],
        )?;

        if let Some(channel) = &self.error_channel {
            if !self.push_to(channel, error_row) {
                warn!(copy = %self.id, "stopped before error row was written");
            }
        }
        self.state.update_counters(|c| c.lines_rejected += 1);

        self.verify_rejection_rates();
        Ok(())
    }

    /// Mark every output as done. Consumers see end of stream once drained.
    pub fn set_output_done(&self) {
        debug!(copy = %self.id, outputs = self.outputs.len(), "output done");
        for channel in self.outputs.iter().chain(&self.unused).chain(&self.error_channel) {
            channel.mark_done();
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::testutil::{int_layout, int_row};

    fn channel(from: &str, to: &str) -> Arc<RowChannel> {
        Arc::new(RowChannel::new(
            StageCopyId::new(from, 0),
            StageCopyId::new(to, 0),
            16,
        ))
    }

    fn row_io(
        inputs: Vec<Arc<RowChannel>>,
        outputs: Vec<Arc<RowChannel>>,
        repartitioning: Repartitioning,
        config: PipelineConfig,
    ) -> RowIo {
        let control = Arc::new(PipelineControl::new(Uuid::new_v4()));
        control.set_running(true);
        let ctx = WorkerContext {
            config: Arc::new(config),
            control,
            distribution: None,
            port_pool: Arc::new(PortPool::new()),
        };
        let binding = Binding {
            inputs,
            outputs,
            error_channel: None,
            unused: Vec::new(),
            remote_inputs: Vec::new(),
            remote_outputs: Vec::new(),
            repartitioning,
            next_data_stage_count: 1,
        };
        let def = Arc::new(StageDefinition::new("s", "dummy"));
        let state = Arc::new(WorkerState::new(StageCopyId::new("s", 0)));
        RowIo::new(def, 0, binding, state, &ctx)
    }

    fn read_all(io: &mut RowIo) -> Vec<i64> {
        let mut values = Vec::new();
        while let Some(row) = io.get_row().unwrap() {
            match row.get("id") {
                Some(Value::Integer(v)) => values.push(*v),
                other => panic!("unexpected value: {other:?}"),
            }
        }
        values
    }

    #[test]
    fn peeked_rows_count_against_quantum() {
        let layout = int_layout(&["id"]);
        let a = channel("a", "s");
        let b = channel("b", "s");
        for v in [1, 2, 3, 4, 5] {
            a.push(int_row(&layout, &[v])).unwrap();
        }
        for v in [10, 11, 12] {
            b.push(int_row(&layout, &[v])).unwrap();
        }
        a.mark_done();
        b.mark_done();

        let config = PipelineConfig {
            batch_quantum: 2,
            thread_priority_management: false,
            ..Default::default()
        };
        let mut io = row_io(vec![a, b], Vec::new(), Repartitioning::None, config);

        // Every switch reads at most a quantum of rows, the peeked row
        // included.
        assert_eq!(vec![1, 2, 10, 11, 3, 4, 12, 5], read_all(&mut io));
    }

    #[test]
    fn copy_to_all_hands_original_to_last_output() {
        let layout = int_layout(&["id"]);
        let outputs = vec![channel("s", "x"), channel("s", "y"), channel("s", "z")];
        let mut io = row_io(
            Vec::new(),
            outputs.clone(),
            Repartitioning::Mirror,
            PipelineConfig::default(),
        );

        let row = int_row(&layout, &[7]);
        let original = row.values().as_ptr();
        io.put_row(row).unwrap();

        let received: Vec<Row> = outputs.iter().map(|c| c.pop_immediate().unwrap()).collect();
        for row in &received {
            assert_eq!(Some(&Value::Integer(7)), row.get("id"));
        }
        assert_ne!(original, received[0].values().as_ptr());
        assert_ne!(original, received[1].values().as_ptr());
        assert_eq!(original, received[2].values().as_ptr());
        assert_eq!(3, io.state.counters().lines_written);
    }
}
