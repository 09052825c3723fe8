pub mod distribution;
pub mod router;

pub use distribution::{ClusterTargets, PartitionDistribution};
pub use router::{PartitionRouter, route};
