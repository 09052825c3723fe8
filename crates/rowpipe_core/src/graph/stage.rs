use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error_policy::ErrorPolicy;
use super::partitioning::PartitionConfig;
use super::remote::RemoteEdge;

/// Identifies one running copy of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageCopyId {
    pub stage: String,
    pub copy: usize,
}

impl StageCopyId {
    pub fn new(stage: impl Into<String>, copy: usize) -> Self {
        StageCopyId {
            stage: stage.into(),
            copy,
        }
    }
}

impl fmt::Display for StageCopyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stage, self.copy)
    }
}

fn default_copies() -> usize {
    1
}

fn default_distribute() -> bool {
    true
}

/// Immutable definition of a stage in the pipeline graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique name of the stage.
    pub name: String,
    /// Registered stage kind providing the behavior.
    pub kind: String,
    /// Behavior specific options, interpreted by the stage itself.
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
    /// Number of parallel copies.
    #[serde(default = "default_copies")]
    pub copies: usize,
    /// Send each row to one output (round robin) instead of every output.
    #[serde(default = "default_distribute")]
    pub distribute: bool,
    #[serde(default)]
    pub partitioning: Option<PartitionConfig>,
    /// Partitioning applied when sending to remote stages, overriding the
    /// partitioning derived from next stages.
    #[serde(default)]
    pub target_partitioning: Option<PartitionConfig>,
    #[serde(default)]
    pub error_policy: Option<ErrorPolicy>,
    /// Pass-through aggregation stage that wires its own channels.
    #[serde(default)]
    pub pass_through: bool,
    #[serde(default)]
    pub remote_inputs: Vec<RemoteEdge>,
    #[serde(default)]
    pub remote_outputs: Vec<RemoteEdge>,
}

impl StageDefinition {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        StageDefinition {
            name: name.into(),
            kind: kind.into(),
            options: BTreeMap::new(),
            copies: 1,
            distribute: true,
            partitioning: None,
            target_partitioning: None,
            error_policy: None,
            pass_through: false,
            remote_inputs: Vec::new(),
            remote_outputs: Vec::new(),
        }
    }

    pub fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies;
        self
    }

    pub fn with_distribute(mut self, distribute: bool) -> Self {
        self.distribute = distribute;
        self
    }

    pub fn with_partitioning(mut self, partitioning: PartitionConfig) -> Self {
        self.partitioning = Some(partitioning);
        self
    }

    pub fn with_target_partitioning(mut self, partitioning: PartitionConfig) -> Self {
        self.target_partitioning = Some(partitioning);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = Some(policy);
        self
    }

    pub fn with_pass_through(mut self, pass_through: bool) -> Self {
        self.pass_through = pass_through;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_remote_input(mut self, edge: RemoteEdge) -> Self {
        self.remote_inputs.push(edge);
        self
    }

    pub fn with_remote_output(mut self, edge: RemoteEdge) -> Self {
        self.remote_outputs.push(edge);
        self
    }

    pub fn is_partitioned(&self) -> bool {
        self.partitioning
            .as_ref()
            .is_some_and(|p| p.is_partitioned())
    }

    pub fn option(&self, key: &str) -> Option<&serde_json::Value> {
        self.options.get(key)
    }

    pub fn option_i64(&self, key: &str) -> Option<i64> {
        self.options.get(key).and_then(|v| v.as_i64())
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }
}
