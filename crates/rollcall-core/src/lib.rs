//! rollcall-core: face verification and the attendance state machine.
//!
//! Classical cascade detection plus handcrafted normalization turn an image
//! into a fixed-length signature; cosine similarity against the enrolled
//! reference decides the match; an optimistic read-then-append state machine
//! records TIME_IN / TIME_OUT toggles.

pub mod attendance;
pub mod codec;
pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod memory;
pub mod normalize;
pub mod store;
pub mod types;
pub mod workflow;

pub use attendance::{AttendanceEvent, AttendanceMachine, AttendanceState, AttendanceStatus, MarkPolicy};
pub use detector::{CascadeDetector, FaceLocator};
pub use extractor::EmbeddingExtractor;
pub use matcher::{IdentityMatcher, DEFAULT_SIMILARITY_THRESHOLD};
pub use normalize::DecodeError;
pub use store::{AttendanceLog, EmbeddingStore, StoreError};
pub use types::{BoundingBox, Embedding, MatchDecision, CROP_SIDE, EMBEDDING_DIM};
pub use workflow::{AttendanceDesk, DeskError, MarkOutcome, Verification};
