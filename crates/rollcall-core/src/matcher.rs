use crate::types::{Embedding, MatchDecision, REJECT_SIMILARITY};
use thiserror::Error;

/// Cosine similarity at or above which a probe is accepted.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.75;

#[derive(Error, Debug, PartialEq)]
pub enum MatcherError {
    #[error("similarity threshold must be a finite value in (-1, 1], got {0}")]
    InvalidThreshold(f32),
}

/// Compares a probe against one identity's stored reference.
///
/// The threshold is the single knob trading false accepts for false rejects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentityMatcher {
    threshold: f32,
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        Self { threshold: DEFAULT_SIMILARITY_THRESHOLD }
    }
}

impl IdentityMatcher {
    /// The threshold must lie in (-1, 1] so that the -1.0 sentinel can never accept.
    pub fn new(threshold: f32) -> Result<Self, MatcherError> {
        if !threshold.is_finite() || threshold <= REJECT_SIMILARITY || threshold > 1.0 {
            return Err(MatcherError::InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Compare a probe against an optional reference.
    ///
    /// A missing reference, a zero-norm operand or mismatched dimensions all
    /// score -1.0 and therefore always reject.
    pub fn compare(&self, probe: &Embedding, reference: Option<&Embedding>) -> MatchDecision {
        match reference {
            Some(reference) => self.decide(probe.similarity(reference)),
            None => MatchDecision::rejected(),
        }
    }

    /// Apply the threshold to a similarity score. NaN never accepts.
    pub fn decide(&self, similarity: f32) -> MatchDecision {
        MatchDecision { similarity, accepted: similarity >= self.threshold }
    }
}
