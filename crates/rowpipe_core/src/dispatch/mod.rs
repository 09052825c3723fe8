//! Wiring of stage copies with row channels.
pub mod pattern;
pub mod topology;

pub use pattern::{DispatchPattern, Repartitioning, is_repartitioning};
pub use topology::{Binding, HopWiring, Topology};
