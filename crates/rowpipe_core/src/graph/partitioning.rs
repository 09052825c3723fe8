use std::fmt;

use serde::{Deserialize, Serialize};

/// How rows are assigned to partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PartitionMethod {
    /// Not partitioned.
    #[default]
    None,
    /// Integer key modulo partition count.
    Modulo,
    /// Stable hash of the key bytes modulo partition count.
    Hash,
    /// Every row goes to every partition.
    Mirror,
}

impl PartitionMethod {
    /// If this method routes each row to exactly one partition through the
    /// partition router.
    pub const fn is_special(&self) -> bool {
        matches!(self, Self::Modulo | Self::Hash)
    }
}

impl fmt::Display for PartitionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Modulo => "modulo",
            Self::Hash => "hash",
            Self::Mirror => "mirror",
        };
        write!(f, "{s}")
    }
}

/// Partitioning of a stage.
///
/// Two stages are partitioned the same way only if every field matches. Any
/// difference between neighbors makes the hop a repartitioning boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub method: PartitionMethod,
    /// Field the partition is computed from. Unused for mirror partitioning.
    #[serde(default)]
    pub key_field: String,
    pub partition_count: usize,
    /// Name of the partition schema, used to look up clustered distributions.
    #[serde(default)]
    pub schema_name: String,
}

impl PartitionConfig {
    pub fn modulo(key_field: impl Into<String>, partition_count: usize) -> Self {
        PartitionConfig {
            method: PartitionMethod::Modulo,
            key_field: key_field.into(),
            partition_count,
            schema_name: String::new(),
        }
    }

    pub fn hash(key_field: impl Into<String>, partition_count: usize) -> Self {
        PartitionConfig {
            method: PartitionMethod::Hash,
            key_field: key_field.into(),
            partition_count,
            schema_name: String::new(),
        }
    }

    pub fn mirror(partition_count: usize) -> Self {
        PartitionConfig {
            method: PartitionMethod::Mirror,
            key_field: String::new(),
            partition_count,
            schema_name: String::new(),
        }
    }

    pub fn with_schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = schema_name.into();
        self
    }

    pub fn is_partitioned(&self) -> bool {
        self.method != PartitionMethod::None
    }
}
