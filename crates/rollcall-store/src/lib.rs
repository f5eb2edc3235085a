//! rollcall-store: SQLite persistence for face references and attendance.
//!
//! One connection behind a mutex. References are overwritten in place and
//! attendance events are append-only; the conditional append runs inside an
//! immediate transaction so the "last event" check and the insert cannot be
//! split by another writer, in this process or another.

use chrono::{DateTime, Utc};
use rollcall_core::attendance::{AttendanceEvent, AttendanceStatus, EventId};
use rollcall_core::store::{AttendanceLog, EmbeddingStore, StoreError};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::fmt::Display;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS face_references (
    identity   TEXT PRIMARY KEY NOT NULL,
    embedding  BLOB NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance_events (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    identity  TEXT NOT NULL,
    status    TEXT NOT NULL CHECK (status IN ('TIME_IN', 'TIME_OUT')),
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_attendance_identity_id
    ON attendance_events(identity, id);
";

fn backend(err: impl Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(backend)?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        tracing::debug!(path = %path.display(), "opened attendance database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(backend)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL).map_err(backend)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("database connection lock poisoned".into()))
    }

    /// Number of identities with an enrolled reference.
    pub fn enrolled_count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM face_references", [], |row| row.get(0))
            .map_err(backend)?;
        usize::try_from(count).map_err(backend)
    }
}

fn decode_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceEvent> {
    let status_raw: String = row.get(2)?;
    let status = status_raw.parse::<AttendanceStatus>().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(AttendanceEvent {
        id: row.get(0)?,
        identity: row.get(1)?,
        status,
        timestamp: row.get(3)?,
    })
}

impl EmbeddingStore for SqliteStore {
    fn get_reference(&self, identity: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT embedding FROM face_references WHERE identity = ?1",
            params![identity],
            |row| row.get(0),
        )
        .optional()
        .map_err(backend)
    }

    fn set_reference(&self, identity: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO face_references (identity, embedding, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(identity) DO UPDATE SET
                embedding = excluded.embedding,
                updated_at = excluded.updated_at",
            params![identity, bytes, Utc::now()],
        )
        .map_err(backend)?;
        Ok(())
    }
}

impl AttendanceLog for SqliteStore {
    fn last_event(&self, identity: &str) -> Result<Option<AttendanceEvent>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, identity, status, timestamp
             FROM attendance_events
             WHERE identity = ?1
             ORDER BY id DESC
             LIMIT 1",
            params![identity],
            decode_event_row,
        )
        .optional()
        .map_err(backend)
    }

    fn append(
        &self,
        identity: &str,
        status: AttendanceStatus,
        timestamp: DateTime<Utc>,
        expected_last: Option<EventId>,
    ) -> Result<AttendanceEvent, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;

        let current: Option<EventId> = tx
            .query_row(
                "SELECT MAX(id) FROM attendance_events WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
            .map_err(backend)?;

        if current != expected_last {
            tracing::debug!(identity, ?expected_last, ?current, "conditional append lost the race");
            return Err(StoreError::StaleRead { identity: identity.to_string() });
        }

        tx.execute(
            "INSERT INTO attendance_events (identity, status, timestamp) VALUES (?1, ?2, ?3)",
            params![identity, status.as_str(), timestamp],
        )
        .map_err(backend)?;
        let id = tx.last_insert_rowid();
        tx.commit().map_err(backend)?;

        Ok(AttendanceEvent { id, identity: identity.to_string(), status, timestamp })
    }

    fn history(&self, identity: &str) -> Result<Vec<AttendanceEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, identity, status, timestamp
                 FROM attendance_events
                 WHERE identity = ?1
                 ORDER BY id DESC",
            )
            .map_err(backend)?;
        let rows = stmt.query_map(params![identity], decode_event_row).map_err(backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(backend)
    }
}
