pub mod cpu;

use std::sync::Arc;

use livefx_common::filter::FilterId;

pub use cpu::CpuFilterEngine;

/// Pure per-frame transform over an RGBA8 buffer.
///
/// The engine receives the buffer by value, so transforming it in place is
/// always safe. Implementations must return a buffer of the same length.
pub trait FilterEngine: Send {
    fn apply(
        &self,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        filter: FilterId,
        brightness: f32,
    ) -> Result<Vec<u8>, EngineError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Builds a fresh engine. Called once per channel `init`, on the thread
/// that will run the engine.
pub type EngineFactory = Arc<dyn Fn() -> Result<Box<dyn FilterEngine>, EngineError> + Send + Sync>;

/// Factory for the reference CPU engine.
pub fn cpu_engine_factory() -> EngineFactory {
    Arc::new(|| Ok(Box::new(CpuFilterEngine::new()) as Box<dyn FilterEngine>))
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("buffer for {width}x{height} has {got} bytes, expected {expected}")]
    InvalidBuffer {
        width: u32,
        height: u32,
        got: usize,
        expected: usize,
    },
    #[error("filter engine unavailable: {0}")]
    Unavailable(String),
    #[error("{filter} failed: {reason}")]
    Kernel { filter: FilterId, reason: String },
}
