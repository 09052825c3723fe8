use std::sync::Arc;

use rowpipe_error::{ErrorKind, RowpipeError, Result};
use twox_hash::XxHash64;

use crate::graph::{PartitionConfig, PartitionMethod};
use crate::row::{Row, RowLayout};

/// Seed used for hash partitioning. Changing it changes routing.
pub const HASH_SEED: u64 = 0;

/// Compute the partition a row belongs to.
///
/// Only modulo and hash partitioning route to a single partition. Callers
/// push to every output for mirror partitioning instead.
pub fn route(row: &Row, config: &PartitionConfig) -> Result<usize> {
    let idx = key_index(row.layout(), config)?;
    route_by_index(row, idx, config)
}

fn key_index(layout: &RowLayout, config: &PartitionConfig) -> Result<usize> {
    layout.index_of(&config.key_field).ok_or_else(|| {
        RowpipeError::new("Partition key field not found in row")
            .with_field("field", &config.key_field)
            .with_field("layout", layout)
    })
}

fn route_by_index(row: &Row, idx: usize, config: &PartitionConfig) -> Result<usize> {
    if config.partition_count == 0 {
        return Err(RowpipeError::new("Partition count must be greater than zero")
            .with_kind(ErrorKind::InvalidConfig));
    }

    let value = row.value(idx).ok_or_else(|| {
        RowpipeError::new("Partition key index out of range").with_field("index", idx)
    })?;

    match config.method {
        PartitionMethod::Modulo => {
            let key = value
                .try_as_i64()
                .map_err(|e| {
                    RowpipeError::with_source(
                        "Unable to convert a value to integer while calculating the partition number",
                        Box::new(e),
                    )
                })?
                .unwrap_or(0);
            Ok(partition_for_int(key, config.partition_count))
        }
        PartitionMethod::Hash => {
            let mut buf = Vec::with_capacity(16);
            value.write_key_bytes(&mut buf);
            Ok(partition_for_hash(XxHash64::oneshot(HASH_SEED, &buf), config.partition_count))
        }
        other => Err(RowpipeError::new("Partition method does not route to a single partition")
            .with_field("method", other)),
    }
}

/// Non-negative remainder of `key` by `partitions`.
pub fn partition_for_int(key: i64, partitions: usize) -> usize {
    key.rem_euclid(partitions as i64) as usize
}

pub const fn partition_for_hash(hash: u64, partitions: usize) -> usize {
    hash as usize % partitions
}

/// Routes rows for a fixed partition config, caching the key field position
/// for the last seen layout.
#[derive(Debug)]
pub struct PartitionRouter {
    config: PartitionConfig,
    cached: Option<(Arc<RowLayout>, usize)>,
}

impl PartitionRouter {
    pub fn new(config: PartitionConfig) -> Self {
        PartitionRouter {
            config,
            cached: None,
        }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    pub fn route(&mut self, row: &Row) -> Result<usize> {
        let idx = match &self.cached {
            Some((layout, idx)) if Arc::ptr_eq(layout, row.layout()) => *idx,
            _ => {
                let idx = key_index(row.layout(), &self.config)?;
                self.cached = Some((row.layout().clone(), idx));
                idx
            }
        };
        route_by_index(row, idx, &self.config)
    }
}
