//! Attendance state machine.
//!
//! Stateless between calls: the current state is the most recent log entry,
//! read fresh each time. The read-then-append sequence is an optimistic
//! transaction. The append names the event it was decided against, and a
//! concurrent writer turns it into a stale read that is retried once.

use crate::store::{AttendanceLog, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Log-assigned event identifier, monotonically increasing.
pub type EventId = i64;

/// Attempts per mark: the first try plus one retry after a stale read.
const MARK_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    #[serde(rename = "TIME_IN")]
    TimeIn,
    #[serde(rename = "TIME_OUT")]
    TimeOut,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeIn => "TIME_IN",
            Self::TimeOut => "TIME_OUT",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("unknown attendance status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for AttendanceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TIME_IN" => Ok(Self::TimeIn),
            "TIME_OUT" => Ok(Self::TimeOut),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// An immutable attendance log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: EventId,
    pub identity: String,
    pub status: AttendanceStatus,
    pub timestamp: DateTime<Utc>,
}

/// Where an identity stands, derived from its most recent event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceState {
    NoLog,
    TimeIn,
    TimeOut,
}

impl AttendanceState {
    pub fn from_last(last: Option<&AttendanceEvent>) -> Self {
        match last.map(|e| e.status) {
            None => Self::NoLog,
            Some(AttendanceStatus::TimeIn) => Self::TimeIn,
            Some(AttendanceStatus::TimeOut) => Self::TimeOut,
        }
    }

    /// Status the next successful match records.
    pub fn next_status(self) -> AttendanceStatus {
        match self {
            Self::NoLog | Self::TimeOut => AttendanceStatus::TimeIn,
            Self::TimeIn => AttendanceStatus::TimeOut,
        }
    }
}

/// How a successful match is turned into a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkPolicy {
    /// Toggle between TIME_IN and TIME_OUT.
    #[default]
    Alternate,
    /// Always record TIME_IN (legacy deployments).
    CheckInOnly,
}

impl MarkPolicy {
    pub fn next_status(self, state: AttendanceState) -> AttendanceStatus {
        match self {
            Self::Alternate => state.next_status(),
            Self::CheckInOnly => AttendanceStatus::TimeIn,
        }
    }
}

impl FromStr for MarkPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alternate" => Ok(Self::Alternate),
            "check-in-only" => Ok(Self::CheckInOnly),
            other => Err(format!("unknown mark policy {other:?} (expected \"alternate\" or \"check-in-only\")")),
        }
    }
}

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("attendance for {identity} changed concurrently twice; try again")]
    StaleRead { identity: String },
    #[error(transparent)]
    Store(StoreError),
}

/// Decides and records the next attendance event for an identity.
pub struct AttendanceMachine<L> {
    log: L,
    policy: MarkPolicy,
}

impl<L: AttendanceLog> AttendanceMachine<L> {
    pub fn new(log: L, policy: MarkPolicy) -> Self {
        Self { log, policy }
    }

    pub fn policy(&self) -> MarkPolicy {
        self.policy
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Current state for an identity.
    pub fn state(&self, identity: &str) -> Result<AttendanceState, AttendanceError> {
        let last = self.log.last_event(identity).map_err(AttendanceError::Store)?;
        Ok(AttendanceState::from_last(last.as_ref()))
    }

    /// Record the next event using the current wall clock.
    pub fn mark(&self, identity: &str) -> Result<AttendanceEvent, AttendanceError> {
        self.mark_at(identity, Utc::now())
    }

    /// Record the next event at `now`.
    ///
    /// Never records a timestamp earlier than the identity's previous event.
    pub fn mark_at(&self, identity: &str, now: DateTime<Utc>) -> Result<AttendanceEvent, AttendanceError> {
        for attempt in 1..=MARK_ATTEMPTS {
            let last = self.log.last_event(identity).map_err(AttendanceError::Store)?;
            let state = AttendanceState::from_last(last.as_ref());
            let status = self.policy.next_status(state);
            let timestamp = match &last {
                Some(prev) if prev.timestamp > now => prev.timestamp,
                _ => now,
            };

            match self.log.append(identity, status, timestamp, last.as_ref().map(|e| e.id)) {
                Ok(event) => {
                    tracing::info!(identity, status = %event.status, id = event.id, "attendance recorded");
                    return Ok(event);
                }
                Err(StoreError::StaleRead { .. }) if attempt < MARK_ATTEMPTS => {
                    tracing::warn!(identity, attempt, "stale attendance read; retrying");
                }
                Err(StoreError::StaleRead { .. }) => {
                    return Err(AttendanceError::StaleRead { identity: identity.to_string() });
                }
                Err(e) => return Err(AttendanceError::Store(e)),
            }
        }
        Err(AttendanceError::StaleRead { identity: identity.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_transitions() {
        assert_eq!(AttendanceState::NoLog.next_status(), AttendanceStatus::TimeIn);
        assert_eq!(AttendanceState::TimeIn.next_status(), AttendanceStatus::TimeOut);
        assert_eq!(AttendanceState::TimeOut.next_status(), AttendanceStatus::TimeIn);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(AttendanceStatus::TimeIn.to_string(), "TIME_IN");
        assert_eq!("TIME_OUT".parse::<AttendanceStatus>(), Ok(AttendanceStatus::TimeOut));
        assert!("time_in".parse::<AttendanceStatus>().is_err());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("alternate".parse::<MarkPolicy>(), Ok(MarkPolicy::Alternate));
        assert_eq!("check-in-only".parse::<MarkPolicy>(), Ok(MarkPolicy::CheckInOnly));
        assert!("toggle".parse::<MarkPolicy>().is_err());
    }

    #[test]
    fn test_three_marks_alternate() {
        let machine = AttendanceMachine::new(MemoryStore::new(), MarkPolicy::Alternate);
        let statuses: Vec<_> = (0..3)
            .map(|i| machine.mark_at("alice", t0() + Duration::minutes(i)).unwrap().status)
            .collect();
        assert_eq!(
            statuses,
            vec![AttendanceStatus::TimeIn, AttendanceStatus::TimeOut, AttendanceStatus::TimeIn]
        );
        assert_eq!(machine.state("alice").unwrap(), AttendanceState::TimeIn);
    }

    #[test]
    fn test_identities_are_independent() {
        let machine = AttendanceMachine::new(MemoryStore::new(), MarkPolicy::Alternate);
        machine.mark_at("alice", t0()).unwrap();
        let bob = machine.mark_at("bob", t0()).unwrap();
        assert_eq!(bob.status, AttendanceStatus::TimeIn);
        assert_eq!(machine.state("alice").unwrap(), AttendanceState::TimeIn);
    }

    #[test]
    fn test_check_in_only_policy() {
        let machine = AttendanceMachine::new(MemoryStore::new(), MarkPolicy::CheckInOnly);
        for i in 0..3 {
            let event = machine.mark_at("alice", t0() + Duration::minutes(i)).unwrap();
            assert_eq!(event.status, AttendanceStatus::TimeIn);
        }
        assert_eq!(machine.log().history("alice").unwrap().len(), 3);
    }

    #[test]
    fn test_clock_step_back_is_clamped() {
        let machine = AttendanceMachine::new(MemoryStore::new(), MarkPolicy::Alternate);
        let first = machine.mark_at("alice", t0()).unwrap();
        let second = machine.mark_at("alice", t0() - Duration::hours(1)).unwrap();
        assert_eq!(second.timestamp, first.timestamp);
        assert!(second.id > first.id);
    }

    /// Log whose first `gated` reads wait on a barrier, forcing concurrent markers
    /// to observe the same last event.
    struct RacingLog {
        inner: MemoryStore,
        barrier: Barrier,
        reads: AtomicUsize,
        gated: usize,
    }

    impl AttendanceLog for RacingLog {
        fn last_event(&self, identity: &str) -> Result<Option<AttendanceEvent>, StoreError> {
            let last = self.inner.last_event(identity);
            if self.reads.fetch_add(1, Ordering::SeqCst) < self.gated {
                self.barrier.wait();
            }
            last
        }

        fn append(
            &self,
            identity: &str,
            status: AttendanceStatus,
            timestamp: DateTime<Utc>,
            expected_last: Option<EventId>,
        ) -> Result<AttendanceEvent, StoreError> {
            self.inner.append(identity, status, timestamp, expected_last)
        }

        fn history(&self, identity: &str) -> Result<Vec<AttendanceEvent>, StoreError> {
            self.inner.history(identity)
        }
    }

    #[test]
    fn test_concurrent_marks_never_double_check_in() {
        let log = Arc::new(RacingLog {
            inner: MemoryStore::new(),
            barrier: Barrier::new(2),
            reads: AtomicUsize::new(0),
            gated: 2,
        });
        let machine = Arc::new(AttendanceMachine::new(Arc::clone(&log), MarkPolicy::Alternate));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let machine = Arc::clone(&machine);
                std::thread::spawn(move || machine.mark_at("alice", t0()))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Both read NO_LOG; the loser retries once and serializes behind the winner.
        let mut statuses: Vec<_> = results.iter().map(|r| r.as_ref().unwrap().status).collect();
        statuses.sort_by_key(|s| s.as_str());
        assert_eq!(statuses, vec![AttendanceStatus::TimeIn, AttendanceStatus::TimeOut]);

        let history = log.history("alice").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|e| e.status == AttendanceStatus::TimeIn).count(), 1);
        assert_eq!(history[0].status, AttendanceStatus::TimeOut);
    }

    /// Log that reports a stale read on every append.
    struct AlwaysStale {
        inner: MemoryStore,
        appends: AtomicUsize,
    }

    impl AttendanceLog for AlwaysStale {
        fn last_event(&self, identity: &str) -> Result<Option<AttendanceEvent>, StoreError> {
            self.inner.last_event(identity)
        }

        fn append(
            &self,
            identity: &str,
            _status: AttendanceStatus,
            _timestamp: DateTime<Utc>,
            _expected_last: Option<EventId>,
        ) -> Result<AttendanceEvent, StoreError> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::StaleRead { identity: identity.to_string() })
        }

        fn history(&self, identity: &str) -> Result<Vec<AttendanceEvent>, StoreError> {
            self.inner.history(identity)
        }
    }

    #[test]
    fn test_second_stale_read_surfaces() {
        let log = AlwaysStale { inner: MemoryStore::new(), appends: AtomicUsize::new(0) };
        let machine = AttendanceMachine::new(log, MarkPolicy::Alternate);
        let result = machine.mark_at("alice", t0());
        assert!(matches!(result, Err(AttendanceError::StaleRead { .. })));
        assert_eq!(machine.log().appends.load(Ordering::SeqCst), 2);
    }
}
