use image::{imageops, RgbaImage};
use livefx_common::filter::FilterId;
use livefx_common::frame::{byte_len, BYTES_PER_PIXEL};
use tracing::trace;

use super::{EngineError, FilterEngine};

const BLUR_SIGMA: f32 = 2.0;
const OIL_RADIUS: i64 = 3;
const OIL_LEVELS: usize = 20;

/// Reference engine: every filter implemented on the CPU, single-threaded.
///
/// The selected filter runs first, then brightness scaling. Alpha is left
/// untouched by every kernel.
#[derive(Debug, Default)]
pub struct CpuFilterEngine;

impl CpuFilterEngine {
    pub fn new() -> Self {
        Self
    }
}

impl FilterEngine for CpuFilterEngine {
    fn apply(
        &self,
        mut pixels: Vec<u8>,
        width: u32,
        height: u32,
        filter: FilterId,
        brightness: f32,
    ) -> Result<Vec<u8>, EngineError> {
        let expected = byte_len(width, height);
        if pixels.len() != expected || expected == 0 {
            return Err(EngineError::InvalidBuffer {
                width,
                height,
                got: pixels.len(),
                expected,
            });
        }

        pixels = match filter {
            FilterId::None => pixels,
            FilterId::Grayscale => {
                grayscale(&mut pixels);
                pixels
            }
            FilterId::Sepia => {
                sepia(&mut pixels);
                pixels
            }
            FilterId::GaussianBlur => gaussian_blur(pixels, width, height)?,
            FilterId::EdgeDetection => edge_detection(&pixels, width, height),
            FilterId::OilPainting => oil_painting(&pixels, width, height),
        };

        if brightness != 1.0 {
            scale_brightness(&mut pixels, brightness);
        }
        trace!(%filter, brightness, width, height, "frame filtered");
        Ok(pixels)
    }

    fn name(&self) -> &str {
        "cpu"
    }
}

fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

fn grayscale(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
        let gray = luma(px[0], px[1], px[2]) as u8;
        px[0] = gray;
        px[1] = gray;
        px[2] = gray;
    }
}

fn sepia(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
        let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
        px[0] = (r * 0.393 + g * 0.769 + b * 0.189).min(255.0) as u8;
        px[1] = (r * 0.349 + g * 0.686 + b * 0.168).min(255.0) as u8;
        px[2] = (r * 0.272 + g * 0.534 + b * 0.131).min(255.0) as u8;
    }
}

fn gaussian_blur(pixels: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>, EngineError> {
    let src = RgbaImage::from_raw(width, height, pixels).ok_or_else(|| EngineError::Kernel {
        filter: FilterId::GaussianBlur,
        reason: "buffer does not match dimensions".into(),
    })?;
    let mut out = imageops::blur(&src, BLUR_SIGMA).into_raw();
    for (dst, orig) in out
        .chunks_exact_mut(BYTES_PER_PIXEL)
        .zip(src.as_raw().chunks_exact(BYTES_PER_PIXEL))
    {
        dst[3] = orig[3];
    }
    Ok(out)
}

/// Sobel gradient magnitude of the luma channel, written as gray.
fn edge_detection(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as i64, height as i64);
    let lum: Vec<f32> = pixels
        .chunks_exact(BYTES_PER_PIXEL)
        .map(|px| luma(px[0], px[1], px[2]))
        .collect();
    let at = |x: i64, y: i64| lum[(y.clamp(0, h - 1) * w + x.clamp(0, w - 1)) as usize];

    let mut out = pixels.to_vec();
    for y in 0..h {
        for x in 0..w {
            let gx = at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1)
                - at(x - 1, y - 1)
                - 2.0 * at(x - 1, y)
                - at(x - 1, y + 1);
            let gy = at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1)
                - at(x - 1, y - 1)
                - 2.0 * at(x, y - 1)
                - at(x + 1, y - 1);
            let mag = (gx * gx + gy * gy).sqrt().min(255.0) as u8;
            let i = (y * w + x) as usize * BYTES_PER_PIXEL;
            out[i] = mag;
            out[i + 1] = mag;
            out[i + 2] = mag;
        }
    }
    out
}

/// Each pixel takes the mean colour of the most common intensity bucket in
/// its neighbourhood.
fn oil_painting(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as i64, height as i64);
    let mut out = pixels.to_vec();
    let mut counts = [0u32; OIL_LEVELS];
    let mut sums = [[0u32; 3]; OIL_LEVELS];

    for y in 0..h {
        for x in 0..w {
            counts.fill(0);
            sums.fill([0; 3]);
            for ny in (y - OIL_RADIUS).max(0)..=(y + OIL_RADIUS).min(h - 1) {
                for nx in (x - OIL_RADIUS).max(0)..=(x + OIL_RADIUS).min(w - 1) {
                    let i = (ny * w + nx) as usize * BYTES_PER_PIXEL;
                    let (r, g, b) = (pixels[i], pixels[i + 1], pixels[i + 2]);
                    let level = ((r as usize + g as usize + b as usize) * (OIL_LEVELS - 1)) / 765;
                    counts[level] += 1;
                    sums[level][0] += r as u32;
                    sums[level][1] += g as u32;
                    sums[level][2] += b as u32;
                }
            }
            let (best, n) = counts
                .iter()
                .copied()
                .enumerate()
                .max_by_key(|&(_, c)| c)
                .unwrap_or((0, 1));
            let n = n.max(1);
            let i = (y * w + x) as usize * BYTES_PER_PIXEL;
            out[i] = (sums[best][0] / n) as u8;
            out[i + 1] = (sums[best][1] / n) as u8;
            out[i + 2] = (sums[best][2] / n) as u8;
        }
    }
    out
}

fn scale_brightness(pixels: &mut [u8], factor: f32) {
    for px in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
        for c in &mut px[..3] {
            *c = (*c as f32 * factor).clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        rgba.iter().copied().cycle().take(byte_len(width, height)).collect()
    }

    fn apply(pixels: Vec<u8>, w: u32, h: u32, filter: FilterId, brightness: f32) -> Vec<u8> {
        CpuFilterEngine::new()
            .apply(pixels, w, h, filter, brightness)
            .unwrap()
    }

    #[test]
    fn none_at_unit_brightness_is_identity() {
        let input: Vec<u8> = (0..64).collect();
        assert_eq!(apply(input.clone(), 4, 4, FilterId::None, 1.0), input);
    }

    #[test]
    fn grayscale_uses_luma_weights() {
        let out = apply(vec![255, 0, 0, 200], 1, 1, FilterId::Grayscale, 1.0);
        assert_eq!(out, vec![76, 76, 76, 200]);
    }

    #[test]
    fn sepia_clamps_to_white() {
        let out = apply(vec![255, 255, 255, 255], 1, 1, FilterId::Sepia, 1.0);
        assert_eq!(out, vec![255, 255, 238, 255]);
    }

    #[test]
    fn brightness_scales_and_clamps() {
        let out = apply(vec![100, 200, 10, 50], 1, 1, FilterId::None, 1.5);
        assert_eq!(out, vec![150, 255, 15, 50]);
        let dark = apply(vec![100, 200, 10, 50], 1, 1, FilterId::None, 0.0);
        assert_eq!(dark, vec![0, 0, 0, 50]);
    }

    #[test]
    fn blur_keeps_uniform_image_and_alpha() {
        let out = apply(uniform(8, 8, [120, 60, 30, 77]), 8, 8, FilterId::GaussianBlur, 1.0);
        assert_eq!(out.len(), 8 * 8 * 4);
        for px in out.chunks_exact(4) {
            assert!(px[0].abs_diff(120) <= 1);
            assert!(px[1].abs_diff(60) <= 1);
            assert!(px[2].abs_diff(30) <= 1);
            assert_eq!(px[3], 77);
        }
    }

    #[test]
    fn edges_of_flat_image_are_black() {
        let out = apply(uniform(5, 5, [90, 90, 90, 255]), 5, 5, FilterId::EdgeDetection, 1.0);
        assert!(out.chunks_exact(4).all(|px| px == [0, 0, 0, 255]));
    }

    #[test]
    fn edge_detection_finds_vertical_step() {
        // Left half black, right half white.
        let mut input = Vec::new();
        for _y in 0..4 {
            for x in 0..4 {
                let v = if x < 2 { 0 } else { 255 };
                input.extend_from_slice(&[v, v, v, 255]);
            }
        }
        let out = apply(input, 4, 4, FilterId::EdgeDetection, 1.0);
        // Column 1 sits on the step, column 3 is flat (clamped border).
        assert_eq!(out[(4 + 1) * 4], 255);
        assert_eq!(out[(4 + 3) * 4], 0);
    }

    #[test]
    fn oil_painting_keeps_flat_regions() {
        let input = uniform(6, 6, [10, 200, 40, 255]);
        assert_eq!(apply(input.clone(), 6, 6, FilterId::OilPainting, 1.0), input);
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let err = CpuFilterEngine::new()
            .apply(vec![0; 10], 2, 2, FilterId::Sepia, 1.0)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidBuffer {
                width: 2,
                height: 2,
                got: 10,
                expected: 16
            }
        );
    }

    #[test]
    fn every_filter_preserves_length() {
        for filter in FilterId::ALL {
            let out = apply(uniform(7, 3, [1, 2, 3, 4]), 7, 3, filter, 2.0);
            assert_eq!(out.len(), 7 * 3 * 4, "{filter}");
        }
    }
}
