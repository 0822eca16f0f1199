use crate::frame::Frame;

/// What the pipeline asks of a capture device when opening it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConstraints {
    /// Preferred device identifier; `None` lets the source pick.
    pub device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl Default for SourceConstraints {
    fn default() -> Self {
        Self {
            device: None,
            width: 640,
            height: 480,
            fps: 30.0,
        }
    }
}

/// A producer of raw RGBA frames.
///
/// All methods are non-blocking: `try_acquire_frame` returns `Ok(None)` when
/// no new frame is ready yet (for example while the device warms up).
pub trait FrameSource: Send {
    fn open(&mut self, constraints: &SourceConstraints) -> Result<(), SourceError>;

    /// Take the newest frame, if one is ready. An `Err` means the source can
    /// no longer deliver frames until it is reopened.
    fn try_acquire_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    fn close(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn open(&mut self, constraints: &SourceConstraints) -> Result<(), SourceError> {
        (**self).open(constraints)
    }

    fn try_acquire_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        (**self).try_acquire_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("permission to use the capture device was denied")]
    PermissionDenied,
    #[error("no capture device found{}", .0.as_deref().map(|d| format!(" matching '{d}'")).unwrap_or_default())]
    NoDevice(Option<String>),
    #[error("capture device error: {0}")]
    Device(String),
    #[error("capture device stopped delivering frames")]
    Terminated,
    #[error("source is not open")]
    NotOpen,
}
