//! Row oriented pipeline engine.
//!
//! A pipeline is a graph of stages connected by hops. Every stage runs as one
//! or more copies, each on its own thread, and copies exchange rows through
//! bounded channels. Channels may span processes through a TCP row transport.
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod graph;
pub mod partition;
pub mod pipeline;
pub mod remote;
pub mod row;
pub mod stage;
pub mod stages;
pub mod testutil;
pub mod worker;
