//! Enrollment, verification and marking for one identity at a time.
//!
//! Works on embeddings; producing them (upload decode or live capture) is
//! the caller's job. A probe that does not match never reaches the log.

use crate::attendance::{AttendanceError, AttendanceEvent, AttendanceMachine, MarkPolicy};
use crate::codec::{self, CodecError};
use crate::matcher::IdentityMatcher;
use crate::store::{AttendanceLog, EmbeddingStore, StoreError};
use crate::types::{Embedding, MatchDecision, EMBEDDING_DIM};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeskError {
    #[error("stored face reference for {identity} is corrupt: {source}")]
    CorruptReference {
        identity: String,
        #[source]
        source: CodecError,
    },
    #[error("refusing to enroll {identity}: embedding has {actual} values, expected {expected}")]
    InvalidEmbedding { identity: String, expected: usize, actual: usize },
    #[error(transparent)]
    Attendance(#[from] AttendanceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of probing an identity without recording anything.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verification {
    pub decision: MatchDecision,
    /// False when the identity has no reference; the decision is then a reject at -1.0.
    pub enrolled: bool,
}

/// Result of a mark attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MarkOutcome {
    Recorded { decision: MatchDecision, event: AttendanceEvent },
    Mismatch { decision: MatchDecision },
    NotEnrolled { decision: MatchDecision },
}

impl MarkOutcome {
    pub fn decision(&self) -> MatchDecision {
        match self {
            Self::Recorded { decision, .. } | Self::Mismatch { decision } | Self::NotEnrolled { decision } => *decision,
        }
    }
}

/// Ties the reference store, matcher and attendance state machine together.
pub struct AttendanceDesk<S, L> {
    store: S,
    matcher: IdentityMatcher,
    machine: AttendanceMachine<L>,
}

impl<S: EmbeddingStore, L: AttendanceLog> AttendanceDesk<S, L> {
    pub fn new(store: S, log: L, matcher: IdentityMatcher, policy: MarkPolicy) -> Self {
        Self { store, matcher, machine: AttendanceMachine::new(log, policy) }
    }

    pub fn matcher(&self) -> &IdentityMatcher {
        &self.matcher
    }

    pub fn machine(&self) -> &AttendanceMachine<L> {
        &self.machine
    }

    /// Store `embedding` as the identity's reference, replacing any previous one.
    pub fn enroll(&self, identity: &str, embedding: &Embedding) -> Result<(), DeskError> {
        if embedding.len() != EMBEDDING_DIM {
            return Err(DeskError::InvalidEmbedding {
                identity: identity.to_string(),
                expected: EMBEDDING_DIM,
                actual: embedding.len(),
            });
        }
        self.store.set_reference(identity, &codec::encode(embedding))?;
        tracing::info!(identity, "face reference enrolled");
        Ok(())
    }

    fn reference(&self, identity: &str) -> Result<Option<Embedding>, DeskError> {
        let Some(bytes) = self.store.get_reference(identity)? else {
            return Ok(None);
        };
        codec::decode(&bytes, EMBEDDING_DIM)
            .map(Some)
            .map_err(|source| DeskError::CorruptReference { identity: identity.to_string(), source })
    }

    /// Compare a probe against the identity's reference.
    pub fn verify(&self, identity: &str, probe: &Embedding) -> Result<Verification, DeskError> {
        let reference = self.reference(identity)?;
        let decision = self.matcher.compare(probe, reference.as_ref());
        tracing::info!(
            identity,
            similarity = decision.similarity,
            threshold = self.matcher.threshold(),
            accepted = decision.accepted,
            enrolled = reference.is_some(),
            "face match decision"
        );
        Ok(Verification { decision, enrolled: reference.is_some() })
    }

    /// Verify, and on acceptance record the next attendance event.
    pub fn mark(&self, identity: &str, probe: &Embedding) -> Result<MarkOutcome, DeskError> {
        self.mark_at(identity, probe, Utc::now())
    }

    pub fn mark_at(&self, identity: &str, probe: &Embedding, now: DateTime<Utc>) -> Result<MarkOutcome, DeskError> {
        let Verification { decision, enrolled } = self.verify(identity, probe)?;
        if !enrolled {
            return Ok(MarkOutcome::NotEnrolled { decision });
        }
        if !decision.accepted {
            return Ok(MarkOutcome::Mismatch { decision });
        }
        let event = self.machine.mark_at(identity, now)?;
        Ok(MarkOutcome::Recorded { decision, event })
    }

    pub fn last_event(&self, identity: &str) -> Result<Option<AttendanceEvent>, DeskError> {
        Ok(self.machine.log().last_event(identity)?)
    }

    pub fn history(&self, identity: &str) -> Result<Vec<AttendanceEvent>, DeskError> {
        Ok(self.machine.log().history(identity)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::AttendanceStatus;
    use crate::extractor::EmbeddingExtractor;
    use crate::memory::MemoryStore;
    use crate::types::BoundingBox;
    use image::{GrayImage, ImageFormat, Luma};
    use std::io::Cursor;
    use std::sync::Arc;

    fn no_faces(_: &GrayImage) -> Vec<BoundingBox> {
        Vec::new()
    }

    fn face_like(seed: u32) -> GrayImage {
        GrayImage::from_fn(160, 120, |x, y| {
            let v = (x.wrapping_mul(29) ^ y.wrapping_mul(11)).wrapping_add(seed.wrapping_mul(97)) % 253;
            Luma([v as u8])
        })
    }

    fn png(img: &GrayImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn desk() -> (Arc<MemoryStore>, AttendanceDesk<Arc<MemoryStore>, Arc<MemoryStore>>) {
        let store = Arc::new(MemoryStore::new());
        let desk = AttendanceDesk::new(
            Arc::clone(&store),
            Arc::clone(&store),
            IdentityMatcher::default(),
            MarkPolicy::Alternate,
        );
        (store, desk)
    }

    #[test]
    fn test_enroll_then_mark_same_image_records_time_in() {
        let (store, desk) = desk();
        let extractor = EmbeddingExtractor::new(no_faces);
        let bytes = png(&face_like(1));

        desk.enroll("alice", &extractor.extract_bytes(&bytes).unwrap()).unwrap();
        let outcome = desk.mark("alice", &extractor.extract_bytes(&bytes).unwrap()).unwrap();

        match outcome {
            MarkOutcome::Recorded { decision, event } => {
                assert!(decision.accepted);
                assert!((decision.similarity - 1.0).abs() < 1e-4);
                assert_eq!(event.status, AttendanceStatus::TimeIn);
            }
            other => panic!("expected a recorded event, got {other:?}"),
        }
        assert_eq!(store.event_count().unwrap(), 1);
    }

    #[test]
    fn test_three_matches_alternate() {
        let (_, desk) = desk();
        let extractor = EmbeddingExtractor::new(no_faces);
        let probe = extractor.extract_gray(&face_like(2)).unwrap();
        desk.enroll("alice", &probe).unwrap();

        let statuses: Vec<_> = (0..3)
            .map(|_| match desk.mark("alice", &probe).unwrap() {
                MarkOutcome::Recorded { event, .. } => event.status,
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect();
        assert_eq!(
            statuses,
            vec![AttendanceStatus::TimeIn, AttendanceStatus::TimeOut, AttendanceStatus::TimeIn]
        );
    }

    #[test]
    fn test_truncated_upload_writes_nothing() {
        let (store, desk) = desk();
        let extractor = EmbeddingExtractor::new(no_faces);
        let bytes = png(&face_like(3));
        desk.enroll("alice", &extractor.extract_bytes(&bytes).unwrap()).unwrap();

        let result = extractor.extract_bytes(&bytes[..bytes.len() / 2]);
        assert!(result.is_err());
        assert_eq!(store.event_count().unwrap(), 0);
        assert!(desk.last_event("alice").unwrap().is_none());
    }

    #[test]
    fn test_probe_without_reference_rejects_without_logging() {
        let (store, desk) = desk();
        let extractor = EmbeddingExtractor::new(no_faces);
        let probe = extractor.extract_gray(&face_like(4)).unwrap();

        let verification = desk.verify("bob", &probe).unwrap();
        assert!(!verification.enrolled);
        assert_eq!(verification.decision, MatchDecision { similarity: -1.0, accepted: false });

        let outcome = desk.mark("bob", &probe).unwrap();
        assert!(matches!(outcome, MarkOutcome::NotEnrolled { .. }));
        assert_eq!(outcome.decision().similarity, -1.0);
        assert_eq!(store.event_count().unwrap(), 0);
    }

    #[test]
    fn test_different_face_is_mismatch() {
        let (store, desk) = desk();
        let extractor = EmbeddingExtractor::new(no_faces);
        desk.enroll("alice", &extractor.extract_gray(&face_like(5)).unwrap()).unwrap();

        let stranger = GrayImage::from_fn(160, 120, |x, y| Luma([if (x / 8 + y / 8) % 2 == 0 { 20 } else { 230 }]));
        let outcome = desk.mark("alice", &extractor.extract_gray(&stranger).unwrap()).unwrap();
        assert!(matches!(outcome, MarkOutcome::Mismatch { .. }));
        assert!(!outcome.decision().accepted);
        assert_eq!(store.event_count().unwrap(), 0);
    }

    #[test]
    fn test_corrupt_reference_is_reported() {
        let (store, desk) = desk();
        store.set_reference("alice", &[0u8; 10]).unwrap();
        let probe = Embedding::new(vec![0.01; EMBEDDING_DIM]);

        let result = desk.mark("alice", &probe);
        assert!(matches!(
            result,
            Err(DeskError::CorruptReference { source: CodecError::Misaligned { len: 10 }, .. })
        ));
        assert_eq!(store.event_count().unwrap(), 0);
    }

    #[test]
    fn test_enroll_rejects_wrong_dimension() {
        let (store, desk) = desk();
        let result = desk.enroll("alice", &Embedding::new(vec![1.0; 3]));
        assert!(matches!(result, Err(DeskError::InvalidEmbedding { actual: 3, .. })));
        assert_eq!(store.get_reference("alice").unwrap(), None);
    }

    #[test]
    fn test_re_enrollment_overwrites() {
        let (_, desk) = desk();
        let extractor = EmbeddingExtractor::new(no_faces);
        let first = extractor.extract_gray(&face_like(6)).unwrap();
        let second = extractor.extract_gray(&face_like(7)).unwrap();
        desk.enroll("alice", &first).unwrap();
        desk.enroll("alice", &second).unwrap();

        assert!(desk.verify("alice", &second).unwrap().decision.accepted);
    }
}
