use std::sync::Arc;

use hashbrown::HashMap;
use rowpipe_error::{ErrorKind, RowpipeError, Result};
use tracing::debug;

use crate::channel::RowChannel;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DistributionKey {
    slave: String,
    schema: String,
    copy: usize,
}

/// Precomputed mapping of (slave, partition schema, stage copy) to a
/// partition index.
///
/// Built once when the pipeline is split across slaves and read-only for the
/// duration of the run.
#[derive(Debug, Clone, Default)]
pub struct PartitionDistribution {
    partitions: HashMap<DistributionKey, usize>,
}

impl PartitionDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, slave: impl Into<String>, schema: impl Into<String>, copy: usize, partition: usize) {
        self.partitions.insert(
            DistributionKey {
                slave: slave.into(),
                schema: schema.into(),
                copy,
            },
            partition,
        );
    }

    pub fn with_partition(
        mut self,
        slave: impl Into<String>,
        schema: impl Into<String>,
        copy: usize,
        partition: usize,
    ) -> Self {
        self.add(slave, schema, copy, partition);
        self
    }

    pub fn get_partition(&self, slave: &str, schema: &str, copy: usize) -> Option<usize> {
        let key = DistributionKey {
            slave: slave.to_string(),
            schema: schema.to_string(),
            copy,
        };
        self.partitions.get(&key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }
}

/// Per stage copy cache mapping partition indices to output channel
/// positions in a clustered run.
#[derive(Debug, Clone)]
pub struct ClusterTargets {
    targets: Vec<Option<usize>>,
}

impl ClusterTargets {
    /// Resolve the output channel serving each partition.
    ///
    /// Every output channel must be found in the distribution. Local
    /// channels are looked up under `local_slave`.
    pub fn resolve(
        distribution: &PartitionDistribution,
        schema: &str,
        local_slave: &str,
        outputs: &[Arc<RowChannel>],
    ) -> Result<Self> {
        let mut targets = vec![None; outputs.len()];

        for (pos, output) in outputs.iter().enumerate() {
            let slave = output.remote_slave().unwrap_or(local_slave);
            let copy = output.destination().copy;

            let partition = distribution
                .get_partition(slave, schema, copy)
                .ok_or_else(|| {
                    RowpipeError::new("Unable to find partition for output channel")
                        .with_field("slave", slave)
                        .with_field("schema", schema)
                        .with_field("copy", copy)
                })?;

            let slot = targets.get_mut(partition).ok_or_else(|| {
                RowpipeError::new("Partition distribution is inconsistent with the output channels")
                    .with_kind(ErrorKind::Internal)
                    .with_field("partition", partition)
                    .with_field("outputs", outputs.len())
            })?;
            *slot = Some(pos);
        }

        debug!(%schema, outputs = outputs.len(), "resolved cluster partition targets");

        Ok(ClusterTargets { targets })
    }

    /// Get the output position for a partition.
    ///
    /// Returns `Ok(None)` if the partition has no channel. A partition beyond
    /// the cached range is an internal error.
    pub fn target(&self, partition: usize) -> Result<Option<usize>> {
        match self.targets.get(partition) {
            Some(target) => Ok(*target),
            None => Err(RowpipeError::new("Referenced partition is higher than the maximum")
                .with_kind(ErrorKind::Internal)
                .with_field("partition", partition)
                .with_field("max", self.targets.len() as i64 - 1)),
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StageCopyId;

    fn remote_output(slave: &str, copy: usize) -> Arc<RowChannel> {
        Arc::new(
            RowChannel::new(StageCopyId::new("a", 0), StageCopyId::new("b", copy), 10)
                .with_remote_slave(slave),
        )
    }

    fn distribution() -> PartitionDistribution {
        PartitionDistribution::new()
            .with_partition("slave1", "schema", 0, 0)
            .with_partition("slave1", "schema", 1, 1)
            .with_partition("slave2", "schema", 0, 2)
    }

    #[test]
    fn lookup() {
        let d = distribution();
        assert_eq!(Some(2), d.get_partition("slave2", "schema", 0));
        assert_eq!(None, d.get_partition("slave2", "other", 0));
        assert_eq!(3, d.len());
    }

    #[test]
    fn resolve_targets() {
        let outputs = vec![
            remote_output("slave2", 0),
            remote_output("slave1", 0),
            remote_output("slave1", 1),
        ];

        let targets = ClusterTargets::resolve(&distribution(), "schema", "master", &outputs).unwrap();
        assert_eq!(Some(1), targets.target(0).unwrap());
        assert_eq!(Some(2), targets.target(1).unwrap());
        assert_eq!(Some(0), targets.target(2).unwrap());
    }

    #[test]
    fn partition_out_of_range() {
        let outputs = vec![
            remote_output("slave2", 0),
            remote_output("slave1", 0),
            remote_output("slave1", 1),
        ];

        let targets = ClusterTargets::resolve(&distribution(), "schema", "master", &outputs).unwrap();
        let err = targets.target(3).unwrap_err();
        assert_eq!(ErrorKind::Internal, err.kind());
    }

    #[test]
    fn local_output_uses_local_slave() {
        let local = Arc::new(RowChannel::new(StageCopyId::new("a", 0), StageCopyId::new("b", 1), 10));
        let outputs = vec![remote_output("slave1", 0), local];

        let targets = ClusterTargets::resolve(&distribution(), "schema", "slave1", &outputs).unwrap();
        assert_eq!(Some(0), targets.target(0).unwrap());
        assert_eq!(Some(1), targets.target(1).unwrap());
    }

    #[test]
    fn unknown_output() {
        let outputs = vec![remote_output("slave3", 0)];
        ClusterTargets::resolve(&distribution(), "schema", "master", &outputs).unwrap_err();
    }
}
