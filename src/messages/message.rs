//! # Messages posted to the bus.
//!
//! A [`Message`] is created once by a producer and never mutated afterwards.
//! The bus persists it and broadcasts it; every subscriber receives its own copy.
//!
//! ## Example
//! ```rust
//! use alertbus::{Message, Severity};
//!
//! let msg = Message::new(Severity::Error, "disk full", "E100")
//!     .with_annotation("disk", "/dev/sda1");
//!
//! assert_eq!(msg.severity, Severity::Error);
//! assert_eq!(msg.annotations.get("disk").map(String::as_str), Some("/dev/sda1"));
//! ```

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::Severity;
use crate::error::BusError;

/// Key/value annotations attached to a message.
pub type Annotations = BTreeMap<String, String>;

/// Immutable severity-tagged message.
///
/// Serializes as `{"severity", "timestamp", "message", "code", "info"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Severity the message was posted with (never [`Severity::All`]).
    pub severity: Severity,
    /// Unix timestamp in seconds, taken at creation.
    pub timestamp: i64,
    /// Human-readable text.
    #[serde(rename = "message")]
    pub text: String,
    /// Machine-readable code.
    pub code: String,
    /// Annotations (may be empty).
    #[serde(rename = "info", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

impl Message {
    /// Creates a message stamped with the current time and no annotations.
    pub fn new(severity: Severity, text: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            severity,
            timestamp: unix_now(),
            text: text.into(),
            code: code.into(),
            annotations: Annotations::new(),
        }
    }

    /// Overrides the creation timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Adds one annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Replaces all annotations.
    #[must_use]
    pub fn with_annotations(mut self, annotations: Annotations) -> Self {
        self.annotations = annotations;
        self
    }

    /// Rejects messages that cannot be posted.
    ///
    /// # Errors
    /// [`BusError::Validation`] if the severity is the synthetic `All` class.
    pub fn validate(&self) -> Result<(), BusError> {
        if !self.severity.is_concrete() {
            return Err(BusError::validation(format!(
                "'{}' is a catch-all class, not a message severity",
                self.severity
            )));
        }
        Ok(())
    }
}

/// Builds annotations from a flat `key, value, key, value, ...` sequence.
///
/// # Errors
/// [`BusError::Validation`] if the sequence has an odd length (a key without a value).
///
/// # Example
/// ```
/// use alertbus::annotations_from_pairs;
///
/// let args = annotations_from_pairs(["disk", "/dev/sda1", "used", "100%"]).unwrap();
/// assert_eq!(args.len(), 2);
///
/// assert!(annotations_from_pairs(["disk"]).is_err());
/// ```
pub fn annotations_from_pairs<I, S>(flat: I) -> Result<Annotations, BusError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out = Annotations::new();
    let mut it = flat.into_iter();
    while let Some(key) = it.next() {
        let key = key.into();
        match it.next() {
            Some(value) => {
                out.insert(key, value.into());
            }
            None => {
                return Err(BusError::validation(format!(
                    "annotation key '{key}' has no value"
                )));
            }
        }
    }
    Ok(out)
}

/// Current unix time in whole seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
