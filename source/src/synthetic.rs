use std::time::Duration;

use livefx_common::config::rate_period;
use livefx_common::frame::{byte_len, Frame};
use livefx_common::source::{FrameSource, SourceConstraints, SourceError};
use tokio::time::Instant;
use tracing::{debug, info};

/// Device identifier the synthetic source answers to.
pub const SYNTHETIC_DEVICE: &str = "synthetic";

/// Moving-gradient test pattern, paced to the requested frame rate.
pub struct SyntheticSource {
    open: Option<OpenState>,
    seq: u64,
}

struct OpenState {
    width: u32,
    height: u32,
    frame_interval: Duration,
    next_due: Instant,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self { open: None, seq: 0 }
    }

    fn render_pattern(width: u32, height: u32, phase: u64) -> Vec<u8> {
        let mut pixels = Vec::with_capacity(byte_len(width, height));
        let shift = (phase % 256) as u32;
        for y in 0..height {
            for x in 0..width {
                let r = ((x * 255 / width.max(1)) + shift) % 256;
                let g = ((y * 255 / height.max(1)) + shift / 2) % 256;
                let b = (255 - r + g) % 256;
                pixels.extend_from_slice(&[r as u8, g as u8, b as u8, 255]);
            }
        }
        pixels
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self, constraints: &SourceConstraints) -> Result<(), SourceError> {
        if let Some(device) = &constraints.device {
            if device != SYNTHETIC_DEVICE {
                return Err(SourceError::NoDevice(Some(device.clone())));
            }
        }
        if constraints.width == 0 || constraints.height == 0 {
            return Err(SourceError::Device(format!(
                "unsupported resolution {}x{}",
                constraints.width, constraints.height
            )));
        }
        let (fps, frame_interval) = match rate_period(constraints.fps) {
            Some(period) => (constraints.fps, period),
            None => (30.0, Duration::from_micros(33_333)),
        };
        info!(
            width = constraints.width,
            height = constraints.height,
            fps,
            "synthetic source opened"
        );
        self.open = Some(OpenState {
            width: constraints.width,
            height: constraints.height,
            frame_interval,
            next_due: Instant::now(),
        });
        Ok(())
    }

    fn try_acquire_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let state = self.open.as_mut().ok_or(SourceError::NotOpen)?;
        let now = Instant::now();
        if now < state.next_due {
            return Ok(None);
        }
        state.next_due = now + state.frame_interval;

        let seq = self.seq;
        self.seq += 1;
        let pixels = Self::render_pattern(state.width, state.height, seq);
        let frame = Frame::captured_now(state.width, state.height, pixels, seq)
            .map_err(|e| SourceError::Device(e.to_string()))?;
        debug!(seq, "synthetic frame generated");
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if self.open.take().is_some() {
            info!(frames = self.seq, "synthetic source closed");
        }
    }

    fn name(&self) -> &str {
        SYNTHETIC_DEVICE
    }
}
