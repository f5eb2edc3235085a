use serde::{Deserialize, Serialize};

/// Side length of the canonical face crop, in pixels.
pub const CROP_SIDE: u32 = 96;

/// Number of elements in an embedding produced from a canonical crop.
pub const EMBEDDING_DIM: usize = (CROP_SIDE * CROP_SIDE) as usize;

/// Bounding box for a face candidate reported by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height, confidence: 1.0 }
    }

    /// Box area in square pixels. Degenerate boxes have zero area.
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face signature: a standardized, L2-normalized flattening of the canonical crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Mismatched dimensions or a zero-norm operand
    /// yield exactly -1.0 so that degenerate input always rejects.
    /// Always processes all dimensions.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return REJECT_SIMILARITY;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        // Commutative in both operands, so similarity(a, b) == similarity(b, a) bit for bit.
        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 && denom.is_finite() {
            (dot / denom).clamp(-1.0, 1.0)
        } else {
            REJECT_SIMILARITY
        }
    }
}

/// Similarity reported whenever a comparison cannot be made.
pub const REJECT_SIMILARITY: f32 = -1.0;

/// Outcome of comparing a probe against an identity's stored reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchDecision {
    /// Cosine similarity in [-1, 1]; -1.0 when no comparison was possible.
    pub similarity: f32,
    pub accepted: bool,
}

impl MatchDecision {
    pub fn rejected() -> Self {
        Self { similarity: REJECT_SIMILARITY, accepted: false }
    }
}
