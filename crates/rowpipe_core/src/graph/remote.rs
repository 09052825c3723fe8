use std::fmt;

use serde::{Deserialize, Serialize};

/// A hop between stage copies running on different hosts.
///
/// The source side serves rows on `hostname:port`, the target side connects
/// to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteEdge {
    pub source_slave: String,
    pub source_stage: String,
    pub source_copy: usize,
    pub target_slave: String,
    pub target_stage: String,
    pub target_copy: usize,
    pub hostname: String,
    pub port: u16,
}

/// Key identifying the remote destination of an output edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteTargetKey {
    pub target_slave: String,
    pub target_stage: String,
    pub target_copy: usize,
}

impl RemoteEdge {
    pub fn target_key(&self) -> RemoteTargetKey {
        RemoteTargetKey {
            target_slave: self.target_slave.clone(),
            target_stage: self.target_stage.clone(),
            target_copy: self.target_copy,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

impl fmt::Display for RemoteEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}.{} -> {}/{}.{} ({}:{})",
            self.source_slave,
            self.source_stage,
            self.source_copy,
            self.target_slave,
            self.target_stage,
            self.target_copy,
            self.hostname,
            self.port
        )
    }
}
