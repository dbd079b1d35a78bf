//! In-process [`MessageLog`].
//!
//! All state sits behind one async mutex, so appends and purges are serialized
//! and a purge removes a record and its annotations in the same critical section.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AnnotationRecord, LogEntry, LogRecord, MessageLog, RecordId};
use crate::error::BusError;
use crate::messages::Annotations;

#[derive(Default)]
struct State {
    last_id: RecordId,
    records: BTreeMap<RecordId, LogRecord>,
    args: BTreeMap<(RecordId, String), String>,
}

impl State {
    fn args_of(&self, id: RecordId) -> impl Iterator<Item = (&String, &String)> {
        self.args
            .range((id, String::new())..)
            .take_while(move |((owner, _), _)| *owner == id)
            .map(|((_, key), value)| (key, value))
    }
}

/// Message log kept in memory; contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryLog {
    state: Mutex<State>,
}

impl MemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageLog for MemoryLog {
    async fn append(&self, record: &LogRecord, annotations: &Annotations) -> Result<RecordId, BusError> {
        let mut state = self.state.lock().await;
        let id = state
            .last_id
            .checked_add(1)
            .ok_or_else(|| BusError::storage("append", "record id space exhausted"))?;

        state.last_id = id;
        state.records.insert(id, record.clone());
        for (key, value) in annotations {
            state.args.insert((id, key.clone()), value.clone());
        }
        Ok(id)
    }

    async fn purge_older_than(&self, threshold: i64) -> Result<u64, BusError> {
        let mut state = self.state.lock().await;
        let expired: BTreeSet<RecordId> = state
            .records
            .iter()
            .filter(|(_, r)| r.time < threshold)
            .map(|(id, _)| *id)
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }
        state.records.retain(|id, _| !expired.contains(id));
        state.args.retain(|(id, _), _| !expired.contains(id));
        Ok(expired.len() as u64)
    }

    async fn fetch(&self, id: RecordId) -> Result<Option<LogEntry>, BusError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).map(|record| LogEntry {
            id,
            record: record.clone(),
            annotations: state
                .args_of(id)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }))
    }

    async fn annotations(&self, id: RecordId) -> Result<Vec<AnnotationRecord>, BusError> {
        let state = self.state.lock().await;
        Ok(state
            .args_of(id)
            .map(|(key, value)| AnnotationRecord {
                id,
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn len(&self) -> Result<u64, BusError> {
        Ok(self.state.lock().await.records.len() as u64)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Message, Severity};
    use crate::store::Provenance;

    fn record(time: i64, code: &str) -> LogRecord {
        let msg = Message::new(Severity::Info, "text", code).at(time);
        LogRecord::from_message(&msg, Provenance::new("root", "admin", "0644"))
    }

    fn args(pairs: &[(&str, &str)]) -> Annotations {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn ids_are_generated_in_order() {
        let log = MemoryLog::new();
        let a = log.append(&record(10, "A"), &Annotations::new()).await.unwrap();
        let b = log.append(&record(10, "B"), &Annotations::new()).await.unwrap();
        assert!(b > a);
        assert_eq!(log.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn annotations_do_not_leak_between_records() {
        let log = MemoryLog::new();
        let a = log.append(&record(10, "A"), &args(&[("k", "a")])).await.unwrap();
        let b = log
            .append(&record(10, "B"), &args(&[("k", "b"), ("z", "zz")]))
            .await
            .unwrap();

        let rows = log.annotations(a).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "a");

        let entry = log.fetch(b).await.unwrap().unwrap();
        assert_eq!(entry.annotations, args(&[("k", "b"), ("z", "zz")]));
    }

    #[tokio::test]
    async fn purge_is_strictly_older_and_cascades() {
        let log = MemoryLog::new();
        let old = log.append(&record(99, "OLD"), &args(&[("x", "1")])).await.unwrap();
        let edge = log.append(&record(100, "EDGE"), &args(&[("y", "2")])).await.unwrap();

        assert_eq!(log.purge_older_than(100).await.unwrap(), 1);
        assert!(log.fetch(old).await.unwrap().is_none());
        assert!(log.annotations(old).await.unwrap().is_empty());

        assert!(log.fetch(edge).await.unwrap().is_some());
        assert_eq!(log.annotations(edge).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn purge_without_matches_is_zero() {
        let log = MemoryLog::new();
        assert_eq!(log.purge_older_than(i64::MAX).await.unwrap(), 0);
        log.append(&record(500, "NEW"), &Annotations::new()).await.unwrap();
        assert_eq!(log.purge_older_than(10).await.unwrap(), 0);
        assert_eq!(log.len().await.unwrap(), 1);
    }
}
