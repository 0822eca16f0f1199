use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use image::ImageFormat;
use livefx_common::frame::Frame;
use livefx_common::source::{FrameSource, SourceConstraints, SourceError};
use reqwest::StatusCode;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` bodies.
pub struct MultipartParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MultipartParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed one network chunk, returning every JPEG body it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut complete = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans chunks.
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        // Avoid re-scanning bytes already checked.
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if jpeg_end >= 2
                        && self.buffer[jpeg_end - 2] == b'\r'
                        && self.buffer[jpeg_end - 1] == b'\n'
                    {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    let jpeg = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    if !jpeg.is_empty() {
                        complete.push(jpeg);
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }

        complete
    }
}

impl Default for MultipartParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
enum StreamStatus {
    Connecting,
    Streaming,
    Failed(SourceError),
    Ended,
}

struct Shared {
    latest: Option<Frame>,
    status: StreamStatus,
    delivered: u64,
}

/// Camera source backed by an MJPEG-over-HTTP endpoint.
///
/// A background task keeps only the most recent decoded frame; older frames
/// are overwritten, never queued.
pub struct MjpegSource {
    url: String,
    shared: Arc<Mutex<Shared>>,
    task: Option<JoinHandle<()>>,
}

impl MjpegSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            shared: Arc::new(Mutex::new(Shared {
                latest: None,
                status: StreamStatus::Connecting,
                delivered: 0,
            })),
            task: None,
        }
    }
}

impl FrameSource for MjpegSource {
    fn open(&mut self, constraints: &SourceConstraints) -> Result<(), SourceError> {
        self.close();
        let url = match &constraints.device {
            Some(device) if device.starts_with("http://") || device.starts_with("https://") => {
                device.clone()
            }
            Some(device) => return Err(SourceError::NoDevice(Some(device.clone()))),
            None => self.url.clone(),
        };
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| SourceError::Device(format!("no async runtime for MJPEG source: {e}")))?;

        {
            let mut shared = lock(&self.shared);
            shared.latest = None;
            shared.status = StreamStatus::Connecting;
        }
        info!(url, "opening MJPEG source");
        self.task = Some(handle.spawn(run_stream(url, Arc::clone(&self.shared))));
        Ok(())
    }

    fn try_acquire_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.task.is_none() {
            return Err(SourceError::NotOpen);
        }
        let mut shared = lock(&self.shared);
        if let Some(frame) = shared.latest.take() {
            return Ok(Some(frame));
        }
        match &shared.status {
            StreamStatus::Connecting | StreamStatus::Streaming => Ok(None),
            StreamStatus::Failed(e) => Err(e.clone()),
            StreamStatus::Ended => Err(SourceError::Terminated),
        }
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let delivered = lock(&self.shared).delivered;
            info!(url = self.url, delivered, "MJPEG source closed");
        }
    }

    fn name(&self) -> &str {
        "mjpeg"
    }
}

impl Drop for MjpegSource {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> std::sync::MutexGuard<'_, Shared> {
    // A poisoned slot only ever holds a stale frame; keep using it.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_stream(url: String, shared: Arc<Mutex<Shared>>) {
    let outcome = consume_stream(&url, &shared).await;
    let mut guard = lock(&shared);
    guard.status = match outcome {
        Ok(()) => {
            info!(url, "MJPEG stream ended");
            StreamStatus::Ended
        }
        Err(e) => {
            error!(url, error = %e, "MJPEG stream failed");
            StreamStatus::Failed(e)
        }
    };
}

async fn consume_stream(url: &str, shared: &Mutex<Shared>) -> Result<(), SourceError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| SourceError::Device(e.to_string()))?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify_request_error(url, &e))?;

    if let Some(err) = classify_status(url, response.status()) {
        return Err(err);
    }
    info!(status = %response.status(), "connected to MJPEG stream");
    lock(shared).status = StreamStatus::Streaming;

    let mut byte_stream = response.bytes_stream();
    let mut parser = MultipartParser::new();
    let mut seq: u64 = 0;

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(|e| SourceError::Device(e.to_string()))?;
        for jpeg in parser.push(&chunk) {
            match decode_jpeg(&jpeg, seq) {
                Ok(frame) => {
                    debug!(seq, bytes = jpeg.len(), "decoded MJPEG frame");
                    seq += 1;
                    let mut guard = lock(shared);
                    guard.latest = Some(frame);
                    guard.delivered += 1;
                }
                Err(e) => warn!(error = %e, "failed to decode JPEG, skipping"),
            }
        }
    }

    Ok(())
}

/// Decode one JPEG body into an RGBA frame.
pub fn decode_jpeg(jpeg: &[u8], seq: u64) -> Result<Frame, SourceError> {
    let img = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
        .map_err(|e| SourceError::Device(format!("JPEG decode failed: {e}")))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    Frame::captured_now(width, height, img.into_raw(), seq)
        .map_err(|e| SourceError::Device(e.to_string()))
}

fn classify_status(url: &str, status: StatusCode) -> Option<SourceError> {
    match status {
        s if s.is_success() => None,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(SourceError::PermissionDenied),
        StatusCode::NOT_FOUND => Some(SourceError::NoDevice(Some(url.to_string()))),
        s => Some(SourceError::Device(format!("HTTP status {}", s.as_u16()))),
    }
}

fn classify_request_error(url: &str, e: &reqwest::Error) -> SourceError {
    if e.is_connect() {
        SourceError::NoDevice(Some(url.to_string()))
    } else {
        SourceError::Device(e.to_string())
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(BOUNDARY);
        out.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    #[test]
    fn parser_splits_parts() {
        let mut stream = part(b"first");
        stream.extend(part(b"second"));
        stream.extend_from_slice(BOUNDARY);

        let mut parser = MultipartParser::new();
        let bodies = parser.push(&stream);
        assert_eq!(bodies, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn parser_handles_boundary_split_across_chunks() {
        let mut stream = part(b"jpegbytes");
        stream.extend_from_slice(BOUNDARY);

        let mut parser = MultipartParser::new();
        let mut bodies = Vec::new();
        for chunk in stream.chunks(3) {
            bodies.extend(parser.push(chunk));
        }
        assert_eq!(bodies, vec![b"jpegbytes".to_vec()]);
    }

    #[test]
    fn parser_waits_for_closing_boundary() {
        let mut parser = MultipartParser::new();
        assert!(parser.push(&part(b"partial")).is_empty());
        assert_eq!(parser.push(BOUNDARY), vec![b"partial".to_vec()]);
    }

    #[test]
    fn status_classification() {
        let url = "http://cam/stream";
        assert_eq!(classify_status(url, StatusCode::OK), None);
        assert_eq!(
            classify_status(url, StatusCode::FORBIDDEN),
            Some(SourceError::PermissionDenied)
        );
        assert_eq!(
            classify_status(url, StatusCode::NOT_FOUND),
            Some(SourceError::NoDevice(Some(url.into())))
        );
        assert!(matches!(
            classify_status(url, StatusCode::INTERNAL_SERVER_ERROR),
            Some(SourceError::Device(_))
        ));
    }

    #[test]
    fn decode_jpeg_produces_rgba() {
        let img = image::RgbImage::from_pixel(4, 2, image::Rgb([200, 100, 50]));
        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .unwrap();

        let frame = decode_jpeg(&jpeg, 3).unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 2));
        assert_eq!(frame.seq, 3);
        assert_eq!(frame.pixel(0, 0)[3], 255);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(decode_jpeg(b"not a jpeg", 0), Err(SourceError::Device(_))));
    }

    #[test]
    fn open_without_runtime_is_a_device_error() {
        let mut source = MjpegSource::new("http://127.0.0.1:9/stream");
        let err = source.open(&SourceConstraints::default()).unwrap_err();
        assert!(matches!(err, SourceError::Device(_)));
        assert_eq!(source.try_acquire_frame(), Err(SourceError::NotOpen));
    }

    #[tokio::test]
    async fn non_http_device_is_not_found() {
        let mut source = MjpegSource::new("http://127.0.0.1:9/stream");
        let constraints = SourceConstraints {
            device: Some("/dev/video0".into()),
            ..SourceConstraints::default()
        };
        assert_eq!(
            source.open(&constraints),
            Err(SourceError::NoDevice(Some("/dev/video0".into())))
        );
        assert_eq!(source.try_acquire_frame(), Err(SourceError::NotOpen));
    }

    #[tokio::test]
    async fn refused_connection_reports_no_device() {
        // Port 9 (discard) is closed on CI hosts.
        let mut source = MjpegSource::new("http://127.0.0.1:9/stream");
        source.open(&SourceConstraints::default()).unwrap();

        let mut outcome = Ok(None);
        for _ in 0..200 {
            outcome = source.try_acquire_frame();
            if outcome.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(
            matches!(outcome, Err(SourceError::NoDevice(_)) | Err(SourceError::Device(_))),
            "unexpected outcome: {outcome:?}"
        );
        source.close();
    }
}
