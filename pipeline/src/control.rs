use std::str::FromStr;
use std::sync::Arc;

use livefx_common::filter::{
    validate_brightness, BrightnessError, FilterConfig, FilterId, FilterParseError,
};
use tokio::sync::watch;
use tracing::info;

/// Discrete events from the control surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    SelectFilter(FilterId),
    SetBrightness(f32),
    Start,
    Stop,
}

impl FromStr for ControlEvent {
    type Err = ControlParseError;

    /// Parses `filter <name>`, `brightness <value>`, `start` and `stop`.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(ControlParseError::Empty)?;
        let arg = words.next();
        if words.next().is_some() {
            return Err(ControlParseError::TrailingInput(line.trim().to_string()));
        }
        match (command.to_ascii_lowercase().as_str(), arg) {
            ("filter", Some(name)) => Ok(ControlEvent::SelectFilter(name.parse()?)),
            ("brightness", Some(value)) => value
                .parse::<f32>()
                .map(ControlEvent::SetBrightness)
                .map_err(|_| ControlParseError::BadNumber(value.to_string())),
            ("start", None) => Ok(ControlEvent::Start),
            ("stop", None) => Ok(ControlEvent::Stop),
            _ => Err(ControlParseError::Unknown(line.trim().to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ControlParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}' (try: filter <name>, brightness <value>, start, stop)")]
    Unknown(String),
    #[error("unexpected trailing input in '{0}'")]
    TrailingInput(String),
    #[error("'{0}' is not a number")]
    BadNumber(String),
    #[error(transparent)]
    Filter(#[from] FilterParseError),
}

/// Writer side of the shared filter config.
///
/// Any thread may hold a clone. Updates replace the whole value atomically,
/// and readers copy it out, so a submission always sees one consistent
/// config.
#[derive(Debug, Clone)]
pub struct FilterControl {
    tx: Arc<watch::Sender<FilterConfig>>,
}

/// Reader side, owned by the pipeline.
#[derive(Debug, Clone)]
pub struct FilterSnapshot {
    rx: watch::Receiver<FilterConfig>,
}

impl FilterControl {
    pub fn new(initial: FilterConfig) -> (Self, FilterSnapshot) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx: Arc::new(tx) }, FilterSnapshot { rx })
    }

    pub fn select_filter(&self, filter: FilterId) {
        self.tx.send_modify(|cfg| cfg.filter = filter);
        info!(%filter, "filter selected");
    }

    /// Set brightness, clamped to the supported range. Returns the value
    /// actually stored.
    pub fn set_brightness(&self, value: f32) -> Result<f32, BrightnessError> {
        let brightness = validate_brightness(value)?;
        self.tx.send_modify(|cfg| cfg.brightness = brightness);
        info!(brightness, "brightness set");
        Ok(brightness)
    }

    pub fn current(&self) -> FilterConfig {
        *self.tx.borrow()
    }
}

impl FilterSnapshot {
    /// Copy of the config as it is right now.
    pub fn current(&self) -> FilterConfig {
        *self.rx.borrow()
    }
}
