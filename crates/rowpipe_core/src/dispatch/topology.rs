use std::sync::Arc;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use rowpipe_error::{ErrorKind, RowpipeError, Result};
use tracing::{debug, trace};

use super::pattern::{DispatchPattern, Repartitioning};
use crate::channel::RowChannel;
use crate::graph::{PipelineGraph, RemoteEdge, RemoteTargetKey, StageCopyId, StageDefinition};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChannelKey {
    from: StageCopyId,
    to: StageCopyId,
}

/// Wiring chosen for a single hop.
#[derive(Debug, Clone)]
pub struct HopWiring {
    pub from: String,
    pub to: String,
    pub pattern: DispatchPattern,
    pub channels: usize,
}

/// Every local row channel of a pipeline, keyed by the copies it connects.
#[derive(Debug)]
pub struct Topology {
    channels: HashMap<ChannelKey, Arc<RowChannel>>,
    wiring: Vec<HopWiring>,
    capacity: usize,
}

impl Topology {
    /// Create the channels for every hop of `graph`.
    ///
    /// Hops touching a pass-through stage get no channels; those stages wire
    /// themselves.
    pub fn build(graph: &PipelineGraph, capacity: usize) -> Result<Self> {
        let mut channels = HashMap::new();
        let mut wiring = Vec::with_capacity(graph.hops.len());

        for hop in &graph.hops {
            let from = graph.stage(&hop.from)?;
            let to = graph.stage(&hop.to)?;
            if from.pass_through || to.pass_through {
                trace!(from = %hop.from, to = %hop.to, "skipping channels for pass-through hop");
                continue;
            }

            let pattern = DispatchPattern::for_hop(from, to);
            let pairs = pattern.pairs(from.copies, to.copies);
            for &(from_copy, to_copy) in &pairs {
                let key = ChannelKey {
                    from: StageCopyId::new(&from.name, from_copy),
                    to: StageCopyId::new(&to.name, to_copy),
                };
                match channels.entry(key) {
                    Entry::Occupied(entry) => {
                        return Err(RowpipeError::new("Channel created twice")
                            .with_kind(ErrorKind::Internal)
                            .with_field("from", &entry.key().from)
                            .with_field("to", &entry.key().to));
                    }
                    Entry::Vacant(entry) => {
                        let channel = RowChannel::new(entry.key().from.clone(), entry.key().to.clone(), capacity);
                        entry.insert(Arc::new(channel));
                    }
                }
            }

            debug!(from = %hop.from, to = %hop.to, %pattern, channels = pairs.len(), "wired hop");
            wiring.push(HopWiring {
                from: hop.from.clone(),
                to: hop.to.clone(),
                pattern,
                channels: pairs.len(),
            });
        }

        Ok(Topology {
            channels,
            wiring,
            capacity,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn wiring(&self) -> &[HopWiring] {
        &self.wiring
    }

    pub fn channel(&self, from: &str, from_copy: usize, to: &str, to_copy: usize) -> Option<&Arc<RowChannel>> {
        self.channels.get(&ChannelKey {
            from: StageCopyId::new(from, from_copy),
            to: StageCopyId::new(to, to_copy),
        })
    }

    fn lookup(
        &self,
        from: &StageDefinition,
        from_copy: usize,
        to: &StageDefinition,
        to_copy: usize,
    ) -> Result<Option<Arc<RowChannel>>> {
        match self.channel(&from.name, from_copy, &to.name, to_copy) {
            Some(channel) => Ok(Some(channel.clone())),
            None if from.pass_through || to.pass_through => Ok(None),
            None => Err(RowpipeError::new("Unable to find row channel")
                .with_kind(ErrorKind::InvalidTopology)
                .with_field("from", StageCopyId::new(&from.name, from_copy))
                .with_field("to", StageCopyId::new(&to.name, to_copy))),
        }
    }

    /// Collect the channels a single stage copy reads from and writes to.
    pub fn bind(&self, graph: &PipelineGraph, stage: &StageDefinition, copy: usize) -> Result<Binding> {
        let mut inputs = Vec::new();
        for prev in graph.previous_stages(&stage.name) {
            let pattern = DispatchPattern::for_hop(prev, stage);
            for source in pattern.sources_of(copy, prev.copies) {
                if let Some(channel) = self.lookup(prev, source, stage, copy)? {
                    inputs.push(channel);
                }
            }
        }

        let mut outputs = Vec::new();
        for next in graph.next_stages(&stage.name) {
            let pattern = DispatchPattern::for_hop(stage, next);
            for target in pattern.targets_of(copy, next.copies) {
                if let Some(channel) = self.lookup(stage, copy, next, target)? {
                    outputs.push(channel);
                }
            }
        }

        let mut error_channel = None;
        let mut unused = Vec::new();
        if let Some(policy) = &stage.error_policy {
            let (to_error, rest): (Vec<_>, Vec<_>) = outputs
                .into_iter()
                .partition(|c| c.destination().stage == policy.target_stage);
            outputs = rest;

            let position = match policy.target_copy {
                Some(target) => to_error.iter().position(|c| c.destination().copy == target),
                None => (!to_error.is_empty()).then_some(0),
            };
            for (idx, channel) in to_error.into_iter().enumerate() {
                if Some(idx) == position {
                    error_channel = Some(channel);
                } else {
                    unused.push(channel);
                }
            }

            if error_channel.is_none() && !stage.pass_through {
                return Err(RowpipeError::new("Unable to find error channel")
                    .with_kind(ErrorKind::InvalidTopology)
                    .with_field("stage", StageCopyId::new(&stage.name, copy))
                    .with_field("target", &policy.target_stage));
            }
        }

        let mut remote_outputs = Vec::new();
        let mut seen: Vec<RemoteTargetKey> = Vec::new();
        for edge in stage.remote_outputs.iter().filter(|e| e.source_copy == copy) {
            let key = edge.target_key();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            let channel = Arc::new(
                RowChannel::new(
                    StageCopyId::new(&stage.name, copy),
                    StageCopyId::new(&edge.target_stage, edge.target_copy),
                    self.capacity,
                )
                .with_remote_slave(&edge.target_slave),
            );
            outputs.push(channel.clone());
            remote_outputs.push((edge.clone(), channel));
        }

        let remote_inputs = stage
            .remote_inputs
            .iter()
            .filter(|e| e.target_copy == copy)
            .map(|edge| {
                let channel = RowChannel::new(
                    StageCopyId::new(&edge.source_stage, edge.source_copy),
                    StageCopyId::new(&stage.name, copy),
                    self.capacity,
                )
                .with_remote_slave(&edge.source_slave);
                (edge.clone(), Arc::new(channel))
            })
            .collect();

        let next_data: Vec<_> = graph.next_data_stages(&stage.name);
        let repartitioning = Repartitioning::derive(stage, &next_data);

        Ok(Binding {
            inputs,
            outputs,
            error_channel,
            unused,
            remote_inputs,
            remote_outputs,
            repartitioning,
            next_data_stage_count: next_data.len(),
        })
    }
}

/// Channels and routing of a single stage copy.
#[derive(Debug)]
pub struct Binding {
    /// Local input channels, ordered by previous stage then copy.
    pub inputs: Vec<Arc<RowChannel>>,
    /// Output channels, ordered by next stage then copy. Remote outputs
    /// come last.
    pub outputs: Vec<Arc<RowChannel>>,
    pub error_channel: Option<Arc<RowChannel>>,
    /// Channels to the error target that are never written. Marked done
    /// alongside the outputs.
    pub unused: Vec<Arc<RowChannel>>,
    /// Remote inputs, opened on the first read.
    pub remote_inputs: Vec<(RemoteEdge, Arc<RowChannel>)>,
    /// Remote outputs, bound when the stage copy initializes.
    pub remote_outputs: Vec<(RemoteEdge, Arc<RowChannel>)>,
    pub repartitioning: Repartitioning,
    pub next_data_stage_count: usize,
}
