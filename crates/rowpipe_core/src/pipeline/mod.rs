pub mod control;
pub mod monitor;
pub mod orchestrator;

pub use control::PipelineControl;
pub use monitor::StageSnapshot;
pub use orchestrator::{Pipeline, PipelineResult};
