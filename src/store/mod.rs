//! # Durable message log.
//!
//! Every posted message is appended here before it is routed. The log keeps a
//! primary record per message plus one child annotation record per key; the
//! children are removed together with their parent (cascade-delete).
//!
//! ## Schema (logical)
//! ```text
//! messages(id PK, time, severity, messagetext, messagecode, rulesowner, rulesgroup, rulesmode)
//! args(id FK → messages.id ON DELETE CASCADE, key, value, PK(id, key))
//! ```
//!
//! ## Implementations
//! - [`MemoryLog`] in-process store, serialized by a single mutex.
//! - [`SqliteLog`] SQLite via `sqlx` (feature `sqlite`).

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryLog;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLog;

use async_trait::async_trait;

use crate::error::BusError;
use crate::messages::{Annotations, Message, Severity};

/// Generated primary identifier of a log record.
pub type RecordId = i64;

/// Caller-supplied provenance, opaque to the bus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub owner: String,
    pub group: String,
    pub mode: String,
}

impl Provenance {
    pub fn new(owner: impl Into<String>, group: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            group: group.into(),
            mode: mode.into(),
        }
    }
}

/// Persisted projection of a [`Message`] plus its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub time: i64,
    pub severity: Severity,
    pub text: String,
    pub code: String,
    pub provenance: Provenance,
}

impl LogRecord {
    pub fn from_message(message: &Message, provenance: Provenance) -> Self {
        Self {
            time: message.timestamp,
            severity: message.severity,
            text: message.text.clone(),
            code: message.code.clone(),
            provenance,
        }
    }
}

/// One annotation row, owned by the record `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRecord {
    pub id: RecordId,
    pub key: String,
    pub value: String,
}

/// A record read back from the log together with its annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: RecordId,
    pub record: LogRecord,
    pub annotations: Annotations,
}

impl LogEntry {
    /// Rebuilds the message as it was posted.
    pub fn to_message(&self) -> Message {
        Message {
            severity: self.record.severity,
            timestamp: self.record.time,
            text: self.record.text.clone(),
            code: self.record.code.clone(),
            annotations: self.annotations.clone(),
        }
    }
}

/// Append/delete log behind the bus.
///
/// Implementations must serialize writes and deletes so a purge never observes
/// a half-written record, and must make `append` all-or-nothing.
#[async_trait]
pub trait MessageLog: Send + Sync + 'static {
    /// Persists a record and its annotations as one atomic unit.
    ///
    /// # Errors
    /// [`BusError::Storage`] if the write fails; nothing is visible afterwards.
    async fn append(&self, record: &LogRecord, annotations: &Annotations) -> Result<RecordId, BusError>;

    /// Deletes every record with `time < threshold` (annotations cascade).
    ///
    /// Returns the number of records removed; zero matches is not an error.
    async fn purge_older_than(&self, threshold: i64) -> Result<u64, BusError>;

    /// Reads a record and its annotations back by id.
    async fn fetch(&self, id: RecordId) -> Result<Option<LogEntry>, BusError>;

    /// Annotation rows of a record, ordered by key. Empty once the record is gone.
    async fn annotations(&self, id: RecordId) -> Result<Vec<AnnotationRecord>, BusError>;

    /// Number of records currently retained.
    async fn len(&self) -> Result<u64, BusError>;

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
