//! In-process store for tests and ephemeral deployments.

use crate::attendance::{AttendanceEvent, AttendanceStatus, EventId};
use crate::store::{AttendanceLog, EmbeddingStore, StoreError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    references: HashMap<String, Vec<u8>>,
    events: Vec<AttendanceEvent>,
    next_id: EventId,
}

/// Embedding store and attendance log behind a single mutex.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store mutex poisoned".into()))
    }

    /// Total number of attendance events across all identities.
    pub fn event_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.events.len())
    }
}

impl EmbeddingStore for MemoryStore {
    fn get_reference(&self, identity: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.references.get(identity).cloned())
    }

    fn set_reference(&self, identity: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.lock()?.references.insert(identity.to_string(), bytes.to_vec());
        Ok(())
    }
}

impl AttendanceLog for MemoryStore {
    fn last_event(&self, identity: &str) -> Result<Option<AttendanceEvent>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.events.iter().rev().find(|e| e.identity == identity).cloned())
    }

    fn append(
        &self,
        identity: &str,
        status: AttendanceStatus,
        timestamp: DateTime<Utc>,
        expected_last: Option<EventId>,
    ) -> Result<AttendanceEvent, StoreError> {
        let mut inner = self.lock()?;
        let current = inner.events.iter().rev().find(|e| e.identity == identity).map(|e| e.id);
        if current != expected_last {
            return Err(StoreError::StaleRead { identity: identity.to_string() });
        }

        inner.next_id += 1;
        let event = AttendanceEvent {
            id: inner.next_id,
            identity: identity.to_string(),
            status,
            timestamp,
        };
        inner.events.push(event.clone());
        Ok(event)
    }

    fn history(&self, identity: &str) -> Result<Vec<AttendanceEvent>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.events.iter().rev().filter(|e| e.identity == identity).cloned().collect())
    }
}
