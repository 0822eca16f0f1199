use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use image::ExtendedColorType;
use tracing::{debug, info, warn};

/// Display sink for processed frames. Only ever sees complete buffers.
pub trait Renderer: Send {
    fn present(&mut self, pixels: &[u8], width: u32, height: u32);

    fn name(&self) -> &str {
        "unnamed"
    }
}

impl<T: Renderer + ?Sized> Renderer for Box<T> {
    fn present(&mut self, pixels: &[u8], width: u32, height: u32) {
        (**self).present(pixels, width, height)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Discards everything. Counts frames so callers can report a render rate.
#[derive(Debug, Default)]
pub struct NullRenderer {
    presented: u64,
}

impl NullRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Renderer for NullRenderer {
    fn present(&mut self, _pixels: &[u8], _width: u32, _height: u32) {
        self.presented += 1;
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Writes every Nth presented frame to `dir` as a PNG.
/// e.g. "snapshots/20260218T093000000Z_000030.png"
#[derive(Debug)]
pub struct SnapshotRenderer {
    dir: PathBuf,
    every: u64,
    presented: u64,
    written: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("snapshot interval must be at least 1")]
    ZeroInterval,
    #[error("failed to create snapshot dir {0}: {1}")]
    CreateDir(PathBuf, #[source] std::io::Error),
}

impl SnapshotRenderer {
    pub fn new(dir: impl Into<PathBuf>, every: u64) -> Result<Self, RenderError> {
        if every == 0 {
            return Err(RenderError::ZeroInterval);
        }
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| RenderError::CreateDir(dir.clone(), e))?;
        info!(dir = %dir.display(), every, "snapshot renderer ready");
        Ok(Self {
            dir,
            every,
            presented: 0,
            written: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Renderer for SnapshotRenderer {
    fn present(&mut self, pixels: &[u8], width: u32, height: u32) {
        self.presented += 1;
        if self.presented % self.every != 0 {
            return;
        }
        let path = self.dir.join(snapshot_name(
            Utc::now().timestamp_millis(),
            self.presented,
        ));
        match image::save_buffer(&path, pixels, width, height, ExtendedColorType::Rgba8) {
            Ok(()) => {
                self.written += 1;
                debug!(path = %path.display(), "snapshot written");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write snapshot"),
        }
    }

    fn name(&self) -> &str {
        "snapshot"
    }
}

fn snapshot_name(ms: i64, n: u64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now);
    format!("{}_{n:06}.png", dt.format("%Y%m%dT%H%M%S%3fZ"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "livefx-render-{tag}-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn snapshot_name_format() {
        // 2026-02-18T09:30:00.000Z
        let name = snapshot_name(1771407000000, 30);
        assert_eq!(name, "20260218T093000000Z_000030.png");
    }

    #[test]
    fn null_renderer_counts() {
        let mut r = NullRenderer::new();
        r.present(&[0; 4], 1, 1);
        r.present(&[0; 4], 1, 1);
        assert_eq!(r.presented(), 2);
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(matches!(
            SnapshotRenderer::new(temp_dir("zero"), 0),
            Err(RenderError::ZeroInterval)
        ));
    }

    #[test]
    fn writes_every_nth_frame() {
        let dir = temp_dir("nth");
        let mut r = SnapshotRenderer::new(&dir, 2).unwrap();
        let pixels = [10u8, 20, 30, 255].repeat(4);
        for _ in 0..5 {
            r.present(&pixels, 2, 2);
        }
        assert_eq!(r.written(), 2);

        assert_eq!(r.dir(), dir.as_path());

        let mut files: Vec<_> = std::fs::read_dir(r.dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        assert_eq!(files.len(), 2);
        let decoded = image::open(&files[0]).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (2, 2));
        assert_eq!(decoded.get_pixel(1, 1).0, [10, 20, 30, 255]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
