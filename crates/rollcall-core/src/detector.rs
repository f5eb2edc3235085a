//! Classical frontal-face localization.
//!
//! Wraps the SeetaFace funnel-structured cascade (via `rustface`) behind the
//! [`FaceLocator`] seam. The detector is an explicitly constructed, immutable
//! instance; every call builds a fresh sliding-window detector from the shared
//! model so that `locate` only needs `&self`.
//!
//! A detector that finds nothing is not an error. Callers fall back to a
//! center crop; there is no "no face region" failure.

use crate::types::BoundingBox;
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const CASCADE_MIN_FACE_SIZE: u32 = 20;
const CASCADE_SCORE_THRESHOLD: f64 = 2.0;
const CASCADE_PYRAMID_SCALE: f32 = 0.8;
const CASCADE_WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0} (download seeta_fd_frontal_v1.0.bin and set ROLLCALL_DETECTOR_MODEL)")]
    ModelNotFound(String),
    #[error("failed to read detector model: {0}")]
    ModelRead(#[from] std::io::Error),
}

/// Produces candidate face boxes for a grayscale image, in detector output order.
pub trait FaceLocator {
    fn locate(&self, gray: &GrayImage) -> Vec<BoundingBox>;
}

impl<F> FaceLocator for F
where
    F: Fn(&GrayImage) -> Vec<BoundingBox>,
{
    fn locate(&self, gray: &GrayImage) -> Vec<BoundingBox> {
        self(gray)
    }
}

/// SeetaFace cascade detector tuned for frontal faces.
pub struct CascadeDetector {
    model: rustface::Model,
}

impl CascadeDetector {
    /// Load the SeetaFace model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let model = rustface::load_model(model_path)?;
        tracing::info!(path = model_path, "loaded cascade face detector");

        Ok(Self { model })
    }
}

impl FaceLocator for CascadeDetector {
    fn locate(&self, gray: &GrayImage) -> Vec<BoundingBox> {
        let (width, height) = gray.dimensions();
        if width < CASCADE_MIN_FACE_SIZE || height < CASCADE_MIN_FACE_SIZE {
            return Vec::new();
        }

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(CASCADE_MIN_FACE_SIZE);
        detector.set_score_thresh(CASCADE_SCORE_THRESHOLD);
        detector.set_pyramid_scale_factor(CASCADE_PYRAMID_SCALE);
        detector.set_slide_window_step(CASCADE_WINDOW_STEP, CASCADE_WINDOW_STEP);

        let faces = detector.detect(&rustface::ImageData::new(gray.as_raw(), width, height));
        tracing::debug!(candidates = faces.len(), width, height, "cascade detection");

        faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                BoundingBox {
                    x: bbox.x() as f32,
                    y: bbox.y() as f32,
                    width: bbox.width() as f32,
                    height: bbox.height() as f32,
                    confidence: face.score() as f32,
                }
            })
            .collect()
    }
}

/// Pick the candidate with the largest area.
///
/// Ties keep the earliest candidate: detector output order is the tie-break,
/// not spatial position.
pub fn select_largest(candidates: &[BoundingBox]) -> Option<&BoundingBox> {
    let mut best: Option<&BoundingBox> = None;
    for candidate in candidates {
        match best {
            Some(current) if candidate.area() <= current.area() => {}
            _ => best = Some(candidate),
        }
    }
    best
}
