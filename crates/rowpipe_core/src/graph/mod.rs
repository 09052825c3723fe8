pub mod error_policy;
pub mod hop;
pub mod partitioning;
pub mod remote;
pub mod stage;

use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};
use rowpipe_error::{ErrorKind, RowpipeError, Result};
use serde::{Deserialize, Serialize};

pub use error_policy::ErrorPolicy;
pub use hop::Hop;
pub use partitioning::{PartitionConfig, PartitionMethod};
pub use remote::{RemoteEdge, RemoteTargetKey};
pub use stage::{StageCopyId, StageDefinition};

use crate::partition::distribution::PartitionDistribution;

/// A directed graph of stage definitions connected by hops.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineGraph {
    pub name: String,
    pub stages: Vec<StageDefinition>,
    pub hops: Vec<Hop>,
    /// Distribution of partitions across slaves. Only set in a clustered
    /// run.
    #[serde(skip)]
    pub distribution: Option<PartitionDistribution>,
}

impl PipelineGraph {
    pub fn new(name: impl Into<String>) -> Self {
        PipelineGraph {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_hop(mut self, hop: Hop) -> Self {
        self.hops.push(hop);
        self
    }

    pub fn with_distribution(mut self, distribution: PartitionDistribution) -> Self {
        self.distribution = Some(distribution);
        self
    }

    pub fn is_clustered(&self) -> bool {
        self.distribution.is_some()
    }

    pub fn find_stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Get a stage by name, erroring if it doesn't exist.
    pub fn stage(&self, name: &str) -> Result<&StageDefinition> {
        self.find_stage(name).ok_or_else(|| {
            RowpipeError::new("Unknown stage")
                .with_kind(ErrorKind::InvalidTopology)
                .with_field("stage", name.to_string())
        })
    }

    /// Stages reachable through a single outgoing hop, in hop order.
    ///
    /// Includes stages reached through error hops.
    pub fn next_stages(&self, name: &str) -> Vec<&StageDefinition> {
        self.hops
            .iter()
            .filter(|h| h.from == name)
            .filter_map(|h| self.find_stage(&h.to))
            .collect()
    }

    /// Stages feeding `name` through a single incoming hop, in hop order.
    pub fn previous_stages(&self, name: &str) -> Vec<&StageDefinition> {
        self.hops
            .iter()
            .filter(|h| h.to == name)
            .filter_map(|h| self.find_stage(&h.from))
            .collect()
    }

    /// Stages reached from `name` through normal (non-error) hops.
    pub fn next_data_stages(&self, name: &str) -> Vec<&StageDefinition> {
        self.hops
            .iter()
            .filter(|h| h.from == name && !h.error)
            .filter_map(|h| self.find_stage(&h.to))
            .collect()
    }

    pub fn find_hop(&self, from: &str, to: &str) -> Option<&Hop> {
        self.hops.iter().find(|h| h.from == from && h.to == to)
    }

    /// Check the graph is well formed.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &'static str| RowpipeError::new(msg).with_kind(ErrorKind::InvalidTopology);

        let mut names = HashSet::with_capacity(self.stages.len());
        for stage in &self.stages {
            if !names.insert(stage.name.as_str()) {
                return Err(invalid("Duplicate stage name").with_field("stage", &stage.name));
            }
            if stage.copies == 0 {
                return Err(invalid("Stage must have at least one copy").with_field("stage", &stage.name));
            }
            if let Some(partitioning) = &stage.partitioning {
                if partitioning.is_partitioned() && partitioning.partition_count == 0 {
                    return Err(invalid("Partition count must be greater than zero")
                        .with_field("stage", &stage.name));
                }
                if !self.is_clustered()
                    && partitioning.is_partitioned()
                    && partitioning.partition_count != stage.copies
                {
                    return Err(invalid("Partitioned stage must run one copy per partition")
                        .with_field("stage", &stage.name)
                        .with_field("copies", stage.copies)
                        .with_field("partitions", partitioning.partition_count));
                }
            }
        }

        let mut hop_set = HashSet::with_capacity(self.hops.len());
        for hop in &self.hops {
            for name in [&hop.from, &hop.to] {
                if !names.contains(name.as_str()) {
                    return Err(invalid("Hop references unknown stage")
                        .with_field("stage", name)
                        .with_field("from", &hop.from)
                        .with_field("to", &hop.to));
                }
            }
            if !hop_set.insert((hop.from.as_str(), hop.to.as_str())) {
                return Err(invalid("Duplicate hop")
                    .with_field("from", &hop.from)
                    .with_field("to", &hop.to));
            }
        }

        for stage in &self.stages {
            let Some(policy) = &stage.error_policy else {
                continue;
            };
            let reached = self
                .hops
                .iter()
                .any(|h| h.error && h.from == stage.name && h.to == policy.target_stage);
            if !reached {
                return Err(invalid("Error policy target is not reached by an error hop")
                    .with_field("stage", &stage.name)
                    .with_field("target", &policy.target_stage));
            }
        }

        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut in_degree: HashMap<&str, usize> =
            self.stages.iter().map(|s| (s.name.as_str(), 0)).collect();
        for hop in &self.hops {
            if let Some(d) = in_degree.get_mut(hop.to.as_str()) {
                *d += 1;
            }
        }

        let mut queue: VecDeque<&str> = self
            .stages
            .iter()
            .map(|s| s.name.as_str())
            .filter(|name| in_degree.get(name) == Some(&0))
            .collect();

        let mut visited = 0;
        while let Some(name) = queue.pop_front() {
            visited += 1;
            for hop in self.hops.iter().filter(|h| h.from == name) {
                if let Some(d) = in_degree.get_mut(hop.to.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(hop.to.as_str());
                    }
                }
            }
        }

        if visited != self.stages.len() {
            return Err(RowpipeError::new("Pipeline graph contains a cycle")
                .with_kind(ErrorKind::InvalidTopology)
                .with_field("pipeline", &self.name));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> PipelineGraph {
        PipelineGraph::new("test")
            .with_stage(StageDefinition::new("a", "generate"))
            .with_stage(StageDefinition::new("b", "dummy"))
            .with_hop(Hop::new("a", "b"))
    }

    #[test]
    fn valid_graph() {
        linear().validate().unwrap();
    }

    #[test]
    fn next_and_previous() {
        let g = linear()
            .with_stage(StageDefinition::new("c", "dummy"))
            .with_hop(Hop::error("a", "c"));

        let next: Vec<_> = g.next_stages("a").iter().map(|s| s.name.as_str()).collect();
        assert_eq!(vec!["b", "c"], next);

        let data: Vec<_> = g.next_data_stages("a").iter().map(|s| s.name.as_str()).collect();
        assert_eq!(vec!["b"], data);

        let prev: Vec<_> = g.previous_stages("b").iter().map(|s| s.name.as_str()).collect();
        assert_eq!(vec!["a"], prev);
    }

    #[test]
    fn invalid_graphs() {
        struct TestCase {
            name: &'static str,
            graph: PipelineGraph,
        }

        let cases = [
            TestCase {
                name: "duplicate stage",
                graph: linear().with_stage(StageDefinition::new("a", "dummy")),
            },
            TestCase {
                name: "unknown hop target",
                graph: linear().with_hop(Hop::new("b", "missing")),
            },
            TestCase {
                name: "zero copies",
                graph: linear().with_stage(StageDefinition::new("c", "dummy").with_copies(0)),
            },
            TestCase {
                name: "partition count differs from copies",
                graph: linear().with_stage(
                    StageDefinition::new("c", "dummy")
                        .with_copies(2)
                        .with_partitioning(PartitionConfig::modulo("id", 4)),
                ),
            },
            TestCase {
                name: "error policy without error hop",
                graph: PipelineGraph::new("test")
                    .with_stage(
                        StageDefinition::new("a", "generate").with_error_policy(ErrorPolicy::new("b")),
                    )
                    .with_stage(StageDefinition::new("b", "dummy"))
                    .with_hop(Hop::new("a", "b")),
            },
            TestCase {
                name: "cycle",
                graph: linear()
                    .with_stage(StageDefinition::new("c", "dummy"))
                    .with_hop(Hop::new("b", "c"))
                    .with_hop(Hop::new("c", "a")),
            },
        ];

        for case in cases {
            let err = case.graph.validate().unwrap_err();
            assert_eq!(ErrorKind::InvalidTopology, err.kind(), "case: {}", case.name);
        }
    }
}
