//! Frame sources for the livefx pipeline.

pub mod mjpeg;
pub mod synthetic;

pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;
