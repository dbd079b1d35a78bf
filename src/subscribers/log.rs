//! # LogWriter: messages to `tracing`
//!
//! A minimal subscriber that re-emits every delivered [`Message`] as a `tracing`
//! event, at a level picked from the message severity:
//!
//! | severity                   | level   |
//! |----------------------------|---------|
//! | debug                      | DEBUG   |
//! | info                       | INFO    |
//! | warning                    | WARN    |
//! | error / critical / alert   | ERROR   |
//!
//! ## Example output (fmt subscriber)
//! ```text
//! ERROR alertbus: bus message severity=error code="E100" text="disk full" info={"disk": "/dev/sda1"}
//! ```

use async_trait::async_trait;

use crate::messages::{Message, Severity};
use crate::subscribers::Subscribe;

/// Message writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_message(&self, m: &Message) {
        match m.severity {
            Severity::Debug => {
                tracing::debug!(severity = %m.severity, code = %m.code, text = %m.text, info = ?m.annotations, "bus message");
            }
            Severity::Info => {
                tracing::info!(severity = %m.severity, code = %m.code, text = %m.text, info = ?m.annotations, "bus message");
            }
            Severity::Warning => {
                tracing::warn!(severity = %m.severity, code = %m.code, text = %m.text, info = ?m.annotations, "bus message");
            }
            Severity::Error | Severity::Critical | Severity::Alert | Severity::All => {
                tracing::error!(severity = %m.severity, code = %m.code, text = %m.text, info = ?m.annotations, "bus message");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
