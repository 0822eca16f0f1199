pub mod backpressure;
pub mod channel;
pub mod control;
pub mod engine;
pub mod render;
pub mod state;

#[cfg(test)]
mod test_support;

pub use channel::{ExecutionChannel, InlineChannel, WorkerChannel};
pub use control::{ControlEvent, FilterControl};
pub use state::{Pipeline, PipelineReport, PipelineSettings, PipelineState, PipelineStatus};
