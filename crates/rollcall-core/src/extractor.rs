//! Canonical crop → face signature.
//!
//! The signature is classical signal normalization, not a learned
//! representation: flatten, standardize, L2-normalize. Identical pixels
//! always produce identical vectors.

use crate::detector::FaceLocator;
use crate::normalize::{DecodeError, Normalizer};
use crate::types::Embedding;
use image::GrayImage;

/// Added to the standard deviation so near-uniform crops do not divide by zero.
const STD_EPSILON: f64 = 1e-6;

/// Standardize then L2-normalize a canonical crop.
///
/// A crop with no variance standardizes to all zeros; the zero vector is
/// returned as-is rather than normalized.
pub fn embed_crop(crop: &GrayImage) -> Embedding {
    let pixels = crop.as_raw();
    if pixels.is_empty() {
        return Embedding::new(Vec::new());
    }

    let n = pixels.len() as f64;
    let mean = pixels.iter().map(|&p| p as f64).sum::<f64>() / n;
    let variance = pixels.iter().map(|&p| (p as f64 - mean).powi(2)).sum::<f64>() / n;
    let denom = variance.sqrt() + STD_EPSILON;

    let standardized: Vec<f64> = pixels.iter().map(|&p| (p as f64 - mean) / denom).collect();

    let norm = standardized.iter().map(|v| v * v).sum::<f64>().sqrt();
    let values = if norm > 0.0 {
        standardized.iter().map(|v| (v / norm) as f32).collect()
    } else {
        standardized.iter().map(|&v| v as f32).collect()
    };

    Embedding::new(values)
}

/// Full image → embedding pipeline around an injected face locator.
pub struct EmbeddingExtractor<L> {
    normalizer: Normalizer<L>,
}

impl<L: FaceLocator> EmbeddingExtractor<L> {
    pub fn new(locator: L) -> Self {
        Self { normalizer: Normalizer::new(locator) }
    }

    pub fn normalizer(&self) -> &Normalizer<L> {
        &self.normalizer
    }

    /// Extract from compressed image bytes (uploads).
    pub fn extract_bytes(&self, bytes: &[u8]) -> Result<Embedding, DecodeError> {
        let crop = self.normalizer.normalize_bytes(bytes)?;
        Ok(embed_crop(&crop))
    }

    /// Extract from an already-grayscale frame (live capture).
    pub fn extract_gray(&self, gray: &GrayImage) -> Result<Embedding, DecodeError> {
        let crop = self.normalizer.normalize(gray)?;
        Ok(embed_crop(&crop))
    }
}
