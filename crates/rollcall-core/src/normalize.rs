//! Raw image bytes → canonical 96×96 equalized grayscale face crop.
//!
//! Decode, convert to luma, localize the face (largest candidate, or a
//! centered square when the detector finds nothing), area-average down to
//! the canonical side and equalize the histogram.

use crate::detector::{select_largest, FaceLocator};
use crate::types::{BoundingBox, CROP_SIDE};
use image::{imageops, GrayImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image bytes are empty")]
    Empty,
    #[error("unreadable image: {0}")]
    Image(#[from] image::ImageError),
    #[error("image has no pixels ({width}x{height})")]
    ZeroSized { width: u32, height: u32 },
    #[error("frame buffer too short: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("capture produced no frame")]
    NoFrame,
}

/// Pixel rectangle inside an image, always non-empty and in bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// Centered square whose side equals the shorter image dimension.
    pub fn centered_square(width: u32, height: u32) -> Self {
        let side = width.min(height);
        Self {
            x: (width - side) / 2,
            y: (height - side) / 2,
            width: side,
            height: side,
        }
    }

    /// Clamp a detector box to the image. `None` if nothing of it lies inside.
    pub fn from_bbox(bbox: &BoundingBox, width: u32, height: u32) -> Option<Self> {
        if !(bbox.x.is_finite() && bbox.y.is_finite() && bbox.width.is_finite() && bbox.height.is_finite()) {
            return None;
        }
        let x0 = bbox.x.floor().max(0.0) as u32;
        let y0 = bbox.y.floor().max(0.0) as u32;
        let x1 = ((bbox.x + bbox.width).ceil().max(0.0) as u32).min(width);
        let y1 = ((bbox.y + bbox.height).ceil().max(0.0) as u32).min(height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self { x: x0, y: y0, width: x1 - x0, height: y1 - y0 })
    }
}

/// Decode compressed image bytes (JPEG, PNG, ...) into a luma grid.
pub fn decode_gray(bytes: &[u8]) -> Result<GrayImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let gray = image::load_from_memory(bytes)?.to_luma8();
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::ZeroSized { width, height });
    }
    Ok(gray)
}

/// Wrap an already-grayscale capture buffer.
pub fn gray_from_raw(data: Vec<u8>, width: u32, height: u32) -> Result<GrayImage, DecodeError> {
    if width == 0 || height == 0 {
        return Err(DecodeError::ZeroSized { width, height });
    }
    let expected = width as usize * height as usize;
    let actual = data.len();
    GrayImage::from_raw(width, height, data).ok_or(DecodeError::InvalidFrame { expected, actual })
}

/// Turns grayscale images into canonical face crops using an injected locator.
pub struct Normalizer<L> {
    locator: L,
    side: u32,
}

impl<L: FaceLocator> Normalizer<L> {
    pub fn new(locator: L) -> Self {
        Self { locator, side: CROP_SIDE }
    }

    /// Region the crop is taken from: the largest detector candidate, else the center square.
    pub fn face_region(&self, gray: &GrayImage) -> CropRegion {
        let (width, height) = gray.dimensions();
        let candidates = self.locator.locate(gray);

        let chosen = select_largest(&candidates)
            .and_then(|bbox| CropRegion::from_bbox(bbox, width, height).map(|region| (region, bbox.confidence)));
        match chosen {
            Some((region, confidence)) => {
                tracing::debug!(candidates = candidates.len(), ?region, confidence, "face region from detector");
                region
            }
            None => {
                let region = CropRegion::centered_square(width, height);
                tracing::debug!(candidates = candidates.len(), ?region, "no usable face box; center crop");
                region
            }
        }
    }

    /// Produce the canonical crop from an already decoded luma image.
    pub fn normalize(&self, gray: &GrayImage) -> Result<GrayImage, DecodeError> {
        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Err(DecodeError::ZeroSized { width, height });
        }

        let region = self.face_region(gray);
        let face = imageops::crop_imm(gray, region.x, region.y, region.width, region.height).to_image();
        let mut crop = resize_area(&face, self.side, self.side);
        equalize_histogram(&mut crop);
        Ok(crop)
    }

    /// Decode compressed bytes and produce the canonical crop.
    pub fn normalize_bytes(&self, bytes: &[u8]) -> Result<GrayImage, DecodeError> {
        let gray = decode_gray(bytes)?;
        self.normalize(&gray)
    }
}

/// Source taps and weights covering one destination pixel along an axis.
fn area_taps(src_len: u32, dst_len: u32) -> Vec<Vec<(usize, f32)>> {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| {
            let start = d as f64 * scale;
            let end = start + scale;
            let mut taps = Vec::new();
            let mut s = start.floor() as u32;
            while (s as f64) < end && s < src_len {
                let covered = end.min(s as f64 + 1.0) - start.max(s as f64);
                if covered > 1e-9 {
                    taps.push((s as usize, (covered / scale) as f32));
                }
                s += 1;
            }
            taps
        })
        .collect()
}

/// Resize with area averaging: each output pixel is the coverage-weighted
/// mean of the source pixels under its footprint.
pub fn resize_area(src: &GrayImage, dst_width: u32, dst_height: u32) -> GrayImage {
    let (src_width, src_height) = src.dimensions();
    if src_width == 0 || src_height == 0 || dst_width == 0 || dst_height == 0 {
        return GrayImage::new(dst_width, dst_height);
    }

    let x_taps = area_taps(src_width, dst_width);
    let y_taps = area_taps(src_height, dst_height);
    let sw = src_width as usize;
    let dw = dst_width as usize;
    let pixels = src.as_raw();

    // Horizontal pass: src_height × dst_width
    let mut horizontal = vec![0.0f32; src_height as usize * dw];
    for y in 0..src_height as usize {
        let row = &pixels[y * sw..(y + 1) * sw];
        for (x, taps) in x_taps.iter().enumerate() {
            horizontal[y * dw + x] = taps.iter().map(|&(s, w)| row[s] as f32 * w).sum();
        }
    }

    // Vertical pass
    let mut out = GrayImage::new(dst_width, dst_height);
    for (y, taps) in y_taps.iter().enumerate() {
        for x in 0..dw {
            let val: f32 = taps.iter().map(|&(s, w)| horizontal[s * dw + x] * w).sum();
            out.put_pixel(x as u32, y as u32, image::Luma([val.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Global histogram equalization in place.
///
/// The darkest occupied level maps to 0 and the cumulative distribution is
/// stretched over 0–255. A single-level image is left unchanged.
pub fn equalize_histogram(gray: &mut GrayImage) {
    let total = gray.as_raw().len();
    if total == 0 {
        return;
    }

    let mut hist = [0usize; 256];
    for &p in gray.as_raw() {
        hist[p as usize] += 1;
    }

    let Some(first) = hist.iter().position(|&count| count > 0) else {
        return;
    };
    if hist[first] == total {
        return;
    }

    let scale = 255.0 / (total - hist[first]) as f32;
    let mut lut = [0u8; 256];
    let mut cumulative = 0usize;
    for level in (first + 1)..256 {
        cumulative += hist[level];
        lut[level] = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }

    for p in gray.iter_mut() {
        *p = lut[*p as usize];
    }
}
