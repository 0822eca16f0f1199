use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::filter::{validate_brightness, FilterConfig, FilterId};
use crate::source::SourceConstraints;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub filter: InitialFilterConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Generated test pattern, no device needed.
    Synthetic,
    /// `multipart/x-mixed-replace` JPEG stream over HTTP.
    Mjpeg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,
    #[serde(default = "default_stream_url")]
    pub url: String,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Run the filter engine on the scheduler's thread.
    Inline,
    /// Run the filter engine on a dedicated worker thread.
    Worker,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_channel_mode")]
    pub mode: ChannelMode,
    #[serde(default = "default_init_timeout")]
    pub init_timeout_ms: u64,
    #[serde(default = "default_process_timeout")]
    pub process_timeout_ms: u64,
    /// Shut the channel down on stop instead of leaving it Ready.
    #[serde(default)]
    pub teardown_on_stop: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Scheduling tick rate (display refresh).
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: f64,
    #[serde(default = "default_restart_backoff")]
    pub restart_backoff_ms: u64,
    /// Consecutive automatic restarts before the pipeline stays in Error.
    #[serde(default = "default_max_auto_restarts")]
    pub max_auto_restarts: u32,
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitialFilterConfig {
    #[serde(default)]
    pub initial: FilterId,
    #[serde(default = "default_brightness")]
    pub brightness: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderKind {
    Null,
    Snapshot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_render_kind")]
    pub kind: RenderKind,
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,
    /// Write one PNG per this many presented frames.
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            url: default_stream_url(),
            device: None,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            mode: default_channel_mode(),
            init_timeout_ms: default_init_timeout(),
            process_timeout_ms: default_process_timeout(),
            teardown_on_stop: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            refresh_hz: default_refresh_hz(),
            restart_backoff_ms: default_restart_backoff(),
            max_auto_restarts: default_max_auto_restarts(),
            status_interval_secs: default_status_interval(),
        }
    }
}

impl Default for InitialFilterConfig {
    fn default() -> Self {
        Self {
            initial: FilterId::None,
            brightness: default_brightness(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            kind: default_render_kind(),
            snapshot_dir: default_snapshot_dir(),
            snapshot_every: default_snapshot_every(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "source resolution must be non-zero, got {}x{}",
                self.source.width, self.source.height
            )));
        }
        if rate_period(self.source.fps).is_none() {
            return Err(ConfigError::Invalid(format!(
                "source.fps must be a finite positive rate, got {}",
                self.source.fps
            )));
        }
        if rate_period(self.pipeline.refresh_hz).is_none() {
            return Err(ConfigError::Invalid(format!(
                "pipeline.refresh_hz must be a finite positive rate, got {}",
                self.pipeline.refresh_hz
            )));
        }
        if self.pipeline.status_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.status_interval_secs must be at least 1".into(),
            ));
        }
        if self.render.snapshot_every == 0 {
            return Err(ConfigError::Invalid("render.snapshot_every must be at least 1".into()));
        }
        validate_brightness(self.filter.brightness)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}

impl SourceConfig {
    pub fn constraints(&self) -> SourceConstraints {
        SourceConstraints {
            device: self.device.clone(),
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }
}

impl ChannelConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }
}

impl PipelineConfig {
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        rate_period(self.refresh_hz).unwrap_or(Duration::from_micros(16_667))
    }
}

/// Period of one event at `rate` per second. `None` unless the rate is
/// finite, positive and its period is representable and non-zero.
pub fn rate_period(rate: f64) -> Option<Duration> {
    if !rate.is_finite() || rate <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rate)
        .ok()
        .filter(|period| !period.is_zero())
}

impl InitialFilterConfig {
    /// The filter config the pipeline starts with. Brightness is clamped.
    pub fn to_filter_config(&self) -> FilterConfig {
        FilterConfig {
            filter: self.initial,
            brightness: validate_brightness(self.brightness).unwrap_or(default_brightness()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_source_kind() -> SourceKind {
    SourceKind::Synthetic
}
fn default_stream_url() -> String {
    "http://localhost:8080/stream".into()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> f64 {
    30.0
}
fn default_channel_mode() -> ChannelMode {
    ChannelMode::Worker
}
fn default_init_timeout() -> u64 {
    5000
}
fn default_process_timeout() -> u64 {
    2000
}
fn default_refresh_hz() -> f64 {
    60.0
}
fn default_restart_backoff() -> u64 {
    1000
}
fn default_max_auto_restarts() -> u32 {
    1
}
fn default_status_interval() -> u64 {
    5
}
fn default_brightness() -> f32 {
    crate::filter::DEFAULT_BRIGHTNESS
}
fn default_render_kind() -> RenderKind {
    RenderKind::Null
}
fn default_snapshot_dir() -> String {
    "snapshots".into()
}
fn default_snapshot_every() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}
