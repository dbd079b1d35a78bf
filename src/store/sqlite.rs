//! SQLite-backed [`MessageLog`].
//!
//! Foreign keys are enabled on every connection so deleting a row from
//! `messages` removes its `args` rows inside the engine. Appends run in a single
//! transaction; dropping an uncommitted transaction rolls it back.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use super::{AnnotationRecord, LogEntry, LogRecord, MessageLog, Provenance, RecordId};
use crate::error::BusError;
use crate::messages::{Annotations, Severity};

const CREATE_MESSAGES: &str = r#"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY,
        time INTEGER NOT NULL,
        severity VARCHAR(32) NOT NULL,
        messagetext VARCHAR(128) NULL,
        messagecode VARCHAR(128) NULL,
        rulesowner VARCHAR(128) NULL,
        rulesgroup VARCHAR(128) NULL,
        rulesmode VARCHAR(4) NULL
    )
"#;

const CREATE_ARGS: &str = r#"
    CREATE TABLE IF NOT EXISTS args (
        id INTEGER NOT NULL,
        key VARCHAR(128) NOT NULL,
        value VARCHAR(128) NULL,
        PRIMARY KEY (id, key),
        FOREIGN KEY (id) REFERENCES messages(id) ON DELETE CASCADE
    )
"#;

const CREATE_TIME_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_messages_time ON messages(time)";

/// Message log stored in a SQLite database.
#[derive(Clone, Debug)]
pub struct SqliteLog {
    pool: SqlitePool,
}

impl SqliteLog {
    /// Opens (creating if missing) the database at `database_url`, e.g. `sqlite:./alerts.db`.
    ///
    /// # Errors
    /// [`BusError::Storage`] if the URL is invalid, the file cannot be opened, or
    /// the schema cannot be created.
    #[tracing::instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, BusError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| BusError::storage("connect", format!("invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| BusError::storage("connect", e))?;
        Self::from_pool(pool).await
    }

    /// Opens a private in-memory database.
    ///
    /// The pool is pinned to one long-lived connection; every connection to
    /// `:memory:` would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self, BusError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(|e| BusError::storage("connect", e))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| BusError::storage("connect", e))?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool and ensures the schema exists.
    ///
    /// The pool's connections must have foreign keys enabled for the cascade to apply.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, BusError> {
        for ddl in [CREATE_MESSAGES, CREATE_ARGS, CREATE_TIME_INDEX] {
            sqlx::query(ddl)
                .execute(&pool)
                .await
                .map_err(|e| BusError::storage("schema", e))?;
        }
        tracing::debug!("message log schema ready");
        Ok(Self { pool })
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl MessageLog for SqliteLog {
    #[tracing::instrument(skip(self, record, annotations), fields(code = %record.code, args = annotations.len()))]
    async fn append(&self, record: &LogRecord, annotations: &Annotations) -> Result<RecordId, BusError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BusError::storage("append", e))?;

        let id = sqlx::query(
            r#"
            INSERT INTO messages (time, severity, messagetext, messagecode, rulesowner, rulesgroup, rulesmode)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(record.time)
        .bind(record.severity.as_str())
        .bind(&record.text)
        .bind(&record.code)
        .bind(&record.provenance.owner)
        .bind(&record.provenance.group)
        .bind(&record.provenance.mode)
        .execute(&mut *tx)
        .await
        .map_err(|e| BusError::storage("append", e))?
        .last_insert_rowid();

        for (key, value) in annotations {
            sqlx::query("INSERT INTO args (id, key, value) VALUES (?1, ?2, ?3)")
                .bind(id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(|e| BusError::storage("append", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| BusError::storage("commit", e))?;
        Ok(id)
    }

    async fn purge_older_than(&self, threshold: i64) -> Result<u64, BusError> {
        let result = sqlx::query("DELETE FROM messages WHERE time < ?1")
            .bind(threshold)
            .execute(&self.pool)
            .await
            .map_err(|e| BusError::storage("purge", e))?;
        Ok(result.rows_affected())
    }

    async fn fetch(&self, id: RecordId) -> Result<Option<LogEntry>, BusError> {
        let row = sqlx::query(
            r#"
            SELECT time, severity, messagetext, messagecode, rulesowner, rulesgroup, rulesmode
            FROM messages WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BusError::storage("fetch", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let severity: String = row.try_get("severity")?;
        let record = LogRecord {
            time: row.try_get("time")?,
            severity: severity.parse::<Severity>()?,
            text: row.try_get::<Option<String>, _>("messagetext")?.unwrap_or_default(),
            code: row.try_get::<Option<String>, _>("messagecode")?.unwrap_or_default(),
            provenance: Provenance {
                owner: row.try_get::<Option<String>, _>("rulesowner")?.unwrap_or_default(),
                group: row.try_get::<Option<String>, _>("rulesgroup")?.unwrap_or_default(),
                mode: row.try_get::<Option<String>, _>("rulesmode")?.unwrap_or_default(),
            },
        };

        let annotations = self
            .annotations(id)
            .await?
            .into_iter()
            .map(|a| (a.key, a.value))
            .collect();

        Ok(Some(LogEntry {
            id,
            record,
            annotations,
        }))
    }

    async fn annotations(&self, id: RecordId) -> Result<Vec<AnnotationRecord>, BusError> {
        let rows = sqlx::query("SELECT key, value FROM args WHERE id = ?1 ORDER BY key")
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BusError::storage("annotations", e))?;

        rows.into_iter()
            .map(|row| -> Result<AnnotationRecord, BusError> {
                Ok(AnnotationRecord {
                    id,
                    key: row.try_get("key")?,
                    value: row.try_get::<Option<String>, _>("value")?.unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn len(&self) -> Result<u64, BusError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM messages")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| BusError::storage("count", e))?;
        let count: i64 = row.try_get("cnt")?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;

    fn record(time: i64, severity: Severity, text: &str, code: &str) -> LogRecord {
        let msg = Message::new(severity, text, code).at(time);
        LogRecord::from_message(&msg, Provenance::new("alice", "ops", "0600"))
    }

    fn args(pairs: &[(&str, &str)]) -> Annotations {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn round_trips_record_and_annotations() {
        let log = SqliteLog::in_memory().await.unwrap();
        let rec = record(1_700_000_000, Severity::Error, "disk full", "E100");
        let id = log
            .append(&rec, &args(&[("disk", "/dev/sda1"), ("used", "100%")]))
            .await
            .unwrap();

        let entry = log.fetch(id).await.unwrap().unwrap();
        assert_eq!(entry.record, rec);
        assert_eq!(entry.annotations, args(&[("disk", "/dev/sda1"), ("used", "100%")]));
        assert_eq!(log.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn purge_cascades_to_args() {
        let log = SqliteLog::in_memory().await.unwrap();
        let old = log
            .append(&record(10, Severity::Info, "old", "I001"), &args(&[("a", "1"), ("b", "2")]))
            .await
            .unwrap();
        let fresh = log
            .append(&record(20, Severity::Info, "fresh", "I002"), &args(&[("c", "3")]))
            .await
            .unwrap();

        assert_eq!(log.purge_older_than(20).await.unwrap(), 1);
        assert!(log.fetch(old).await.unwrap().is_none());
        assert!(log.annotations(old).await.unwrap().is_empty());

        let orphans: i64 = sqlx::query("SELECT COUNT(*) AS cnt FROM args WHERE id = ?1")
            .bind(old)
            .fetch_one(log.pool())
            .await
            .unwrap()
            .get("cnt");
        assert_eq!(orphans, 0);
        assert_eq!(log.annotations(fresh).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_append_leaves_nothing_behind() {
        let log = SqliteLog::in_memory().await.unwrap();
        sqlx::query("DROP TABLE args").execute(log.pool()).await.unwrap();

        let err = log
            .append(&record(10, Severity::Warning, "half", "W001"), &args(&[("k", "v")]))
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "bus_storage");
        assert_eq!(log.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn append_without_annotations_skips_args() {
        let log = SqliteLog::in_memory().await.unwrap();
        sqlx::query("DROP TABLE args").execute(log.pool()).await.unwrap();

        let id = log
            .append(&record(10, Severity::Debug, "heartbeat", "D001"), &Annotations::new())
            .await
            .unwrap();
        assert!(id > 0);
    }
}
