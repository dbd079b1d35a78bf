//! Error types used by the bus, its message log, and configuration loading.
//!
//! - [`BusError`]: failures surfaced by posting, subscribing, and storage.
//! - [`ConfigError`]: invalid environment configuration.
//!
//! Both provide `as_label` for stable snake_case labels in logs.

use std::time::Duration;
use thiserror::Error;

use crate::subscribers::SubscriptionId;

/// # Errors produced by the message bus.
///
/// Only [`BusError::Storage`], [`BusError::Validation`] and [`BusError::Closed`]
/// are ever returned from [`MessageBus::post`](crate::MessageBus::post).
/// [`BusError::BackpressureTimeout`] is raised inside a dispatcher and logged;
/// a stalled subscriber never fails a producer.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BusError {
    /// The message log failed to append or delete.
    ///
    /// For appends nothing was committed: neither the record nor any annotation is visible.
    #[error("storage failure during {op}: {error}")]
    Storage {
        /// Storage operation that failed (`append`, `purge`, ...).
        op: &'static str,
        /// Underlying error message.
        error: String,
    },

    /// Input was rejected before touching storage.
    #[error("invalid input: {reason}")]
    Validation {
        /// What was wrong with the input.
        reason: String,
    },

    /// A subscriber did not accept a delivery within the configured bound.
    #[error("subscription {subscription} did not accept delivery within {timeout:?}")]
    BackpressureTimeout {
        /// The stalled subscription.
        subscription: SubscriptionId,
        /// The delivery bound that was exceeded.
        timeout: Duration,
    },

    /// The bus has been stopped.
    #[error("message bus is closed")]
    Closed,
}

impl BusError {
    /// Builds a [`BusError::Storage`] from any displayable error.
    pub fn storage(op: &'static str, error: impl std::fmt::Display) -> Self {
        BusError::Storage {
            op,
            error: error.to_string(),
        }
    }

    /// Builds a [`BusError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        BusError::Validation {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use alertbus::BusError;
    ///
    /// let err = BusError::storage("append", "disk I/O error");
    /// assert_eq!(err.as_label(), "bus_storage");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::Storage { .. } => "bus_storage",
            BusError::Validation { .. } => "bus_validation",
            BusError::BackpressureTimeout { .. } => "bus_backpressure_timeout",
            BusError::Closed => "bus_closed",
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for BusError {
    fn from(e: sqlx::Error) -> Self {
        BusError::storage("sqlite", e)
    }
}

/// # Errors produced while loading configuration.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable was set but could not be parsed.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Parse failure detail.
        message: String,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::InvalidValue { .. } => "config_invalid_value",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(BusError::Closed.as_label(), "bus_closed");
        assert_eq!(BusError::validation("x").as_label(), "bus_validation");

        let err = BusError::BackpressureTimeout {
            subscription: SubscriptionId::from_raw(7),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.as_label(), "bus_backpressure_timeout");
        assert_eq!(
            err.to_string(),
            "subscription sub-7 did not accept delivery within 250ms"
        );
    }

    #[test]
    fn storage_keeps_operation() {
        let err = BusError::storage("purge", "database is locked");
        assert_eq!(
            err.to_string(),
            "storage failure during purge: database is locked"
        );
    }
}
