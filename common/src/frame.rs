/// Bytes per pixel in every buffer the pipeline moves around (RGBA8).
pub const BYTES_PER_PIXEL: usize = 4;

/// One captured image as a tightly packed RGBA8 buffer.
///
/// The buffer length is checked once, at construction, so every `Frame`
/// that exists satisfies `pixels.len() == width * height * 4`. Frames are
/// not `Clone`: whichever stage holds one owns it outright, and handing it
/// to another stage is a move.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    /// Sequence number assigned by the source, monotonic per source.
    pub seq: u64,
    /// Capture time (Unix millis).
    pub captured_at_ms: i64,
}

impl Frame {
    /// Build a frame, validating dimensions against the buffer length.
    pub fn new(
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        seq: u64,
        captured_at_ms: i64,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDimensions { width, height });
        }
        let expected = byte_len(width, height);
        if pixels.len() != expected {
            return Err(FrameError::LengthMismatch {
                width,
                height,
                got: pixels.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
            seq,
            captured_at_ms,
        })
    }

    /// Build a frame stamped with the current wall-clock time.
    pub fn captured_now(
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        seq: u64,
    ) -> Result<Self, FrameError> {
        Self::new(
            width,
            height,
            pixels,
            seq,
            chrono::Utc::now().timestamp_millis(),
        )
    }

    /// A uniformly filled frame. Mostly useful for sources and tests.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4], seq: u64) -> Result<Self, FrameError> {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(byte_len(width, height))
            .collect();
        Self::captured_now(width, height, pixels, seq)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Give up the frame, keeping only its buffer.
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Swap in a transformed buffer, keeping dimensions and capture metadata.
    ///
    /// Fails (and drops `self`) if the new buffer does not have the same size.
    pub fn with_pixels(self, pixels: Vec<u8>) -> Result<Self, FrameError> {
        Self::new(self.width, self.height, pixels, self.seq, self.captured_at_ms)
    }

    /// RGBA value at (x, y). Panics if out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }
}

/// Expected buffer length for an RGBA8 image of the given size.
pub fn byte_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
    #[error("frame buffer for {width}x{height} has {got} bytes, expected {expected}")]
    LengthMismatch {
        width: u32,
        height: u32,
        got: usize,
        expected: usize,
    },
}
