//! Collaborator contracts for persistence.
//!
//! The core never owns rows. It reads and overwrites one serialized
//! reference per identity, and appends to an attendance log that supports
//! a conditional append keyed on the last event the caller observed.

use crate::attendance::{AttendanceEvent, AttendanceStatus, EventId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("stale read: another attendance event was recorded for {identity} concurrently")]
    StaleRead { identity: String },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Holds at most one serialized reference embedding per identity.
pub trait EmbeddingStore {
    fn get_reference(&self, identity: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Overwrite the identity's reference. Idempotent; no history is kept.
    fn set_reference(&self, identity: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

/// Append-only attendance log.
pub trait AttendanceLog {
    fn last_event(&self, identity: &str) -> Result<Option<AttendanceEvent>, StoreError>;

    /// Append only if the identity's latest event is still `expected_last`
    /// (`None` meaning "no events yet"); otherwise fail with [`StoreError::StaleRead`].
    fn append(
        &self,
        identity: &str,
        status: AttendanceStatus,
        timestamp: DateTime<Utc>,
        expected_last: Option<EventId>,
    ) -> Result<AttendanceEvent, StoreError>;

    /// All events for the identity, newest first.
    fn history(&self, identity: &str) -> Result<Vec<AttendanceEvent>, StoreError>;
}

impl<T: EmbeddingStore + ?Sized> EmbeddingStore for Arc<T> {
    fn get_reference(&self, identity: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get_reference(identity)
    }

    fn set_reference(&self, identity: &str, bytes: &[u8]) -> Result<(), StoreError> {
        (**self).set_reference(identity, bytes)
    }
}

impl<T: AttendanceLog + ?Sized> AttendanceLog for Arc<T> {
    fn last_event(&self, identity: &str) -> Result<Option<AttendanceEvent>, StoreError> {
        (**self).last_event(identity)
    }

    fn append(
        &self,
        identity: &str,
        status: AttendanceStatus,
        timestamp: DateTime<Utc>,
        expected_last: Option<EventId>,
    ) -> Result<AttendanceEvent, StoreError> {
        (**self).append(identity, status, timestamp, expected_last)
    }

    fn history(&self, identity: &str) -> Result<Vec<AttendanceEvent>, StoreError> {
        (**self).history(identity)
    }
}
