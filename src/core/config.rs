//! # Bus configuration.
//!
//! Provides [`BusConfig`], fixed at bus construction. Values come from
//! [`Default`] and may be overridden from the environment with
//! [`BusConfig::from_env`].
//!
//! ## Environment
//! | variable                        | field                 | default |
//! |---------------------------------|-----------------------|---------|
//! | `ALERTBUS_RETENTION_AGE_SECS`   | `retention_age`       | 120     |
//! | `ALERTBUS_SWEEP_INTERVAL_SECS`  | `sweep_interval`      | 60      |
//! | `ALERTBUS_DELIVERY_TIMEOUT_MS`  | `delivery_timeout`    | 5000    |
//! | `ALERTBUS_QUEUE_CAPACITY`       | `queue_capacity`      | 64      |
//! | `ALERTBUS_SUBSCRIBER_CAPACITY`  | `subscriber_capacity` | 256     |
//!
//! Empty variables are ignored.
//!
//! ## Sentinel values
//! - `delivery_timeout = 0` → a stalled subscriber blocks its class indefinitely
//! - capacities are clamped to at least 1

use std::time::Duration;

use crate::error::ConfigError;

pub const ENV_RETENTION_AGE_SECS: &str = "ALERTBUS_RETENTION_AGE_SECS";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "ALERTBUS_SWEEP_INTERVAL_SECS";
pub const ENV_DELIVERY_TIMEOUT_MS: &str = "ALERTBUS_DELIVERY_TIMEOUT_MS";
pub const ENV_QUEUE_CAPACITY: &str = "ALERTBUS_QUEUE_CAPACITY";
pub const ENV_SUBSCRIBER_CAPACITY: &str = "ALERTBUS_SUBSCRIBER_CAPACITY";

/// Configuration of a [`MessageBus`](crate::MessageBus).
///
/// ## Field semantics
/// - `retention_age`: records older than `now - retention_age` are purged by the janitor
/// - `sweep_interval`: delay between janitor sweeps (rearmed after each sweep)
/// - `delivery_timeout`: bound on one delivery to one subscriber (`0s` = unbounded)
/// - `queue_capacity`: capacity of each class queue between router and dispatcher
/// - `subscriber_capacity`: capacity of each subscriber's own queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    pub retention_age: Duration,
    pub sweep_interval: Duration,
    pub delivery_timeout: Duration,
    pub queue_capacity: usize,
    pub subscriber_capacity: usize,
}

impl BusConfig {
    /// Defaults overlaid with any `ALERTBUS_*` variables set in the process environment.
    ///
    /// # Errors
    /// [`ConfigError::InvalidValue`] if a set variable is not a non-negative integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|s| !s.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(secs) = parse_u64(ENV_RETENTION_AGE_SECS, var(ENV_RETENTION_AGE_SECS))? {
            cfg.retention_age = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(ENV_SWEEP_INTERVAL_SECS, var(ENV_SWEEP_INTERVAL_SECS))? {
            cfg.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_u64(ENV_DELIVERY_TIMEOUT_MS, var(ENV_DELIVERY_TIMEOUT_MS))? {
            cfg.delivery_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_u64(ENV_QUEUE_CAPACITY, var(ENV_QUEUE_CAPACITY))? {
            cfg.queue_capacity = to_usize(ENV_QUEUE_CAPACITY, n)?;
        }
        if let Some(n) = parse_u64(ENV_SUBSCRIBER_CAPACITY, var(ENV_SUBSCRIBER_CAPACITY))? {
            cfg.subscriber_capacity = to_usize(ENV_SUBSCRIBER_CAPACITY, n)?;
        }
        Ok(cfg)
    }

    /// Delivery bound as an `Option` (`None` = block until the subscriber accepts).
    #[inline]
    pub fn delivery_timeout(&self) -> Option<Duration> {
        if self.delivery_timeout.is_zero() {
            None
        } else {
            Some(self.delivery_timeout)
        }
    }

    /// Sweep interval, at least one millisecond so the janitor never spins.
    #[inline]
    pub fn sweep_interval_clamped(&self) -> Duration {
        self.sweep_interval.max(Duration::from_millis(1))
    }

    #[inline]
    pub fn queue_capacity_clamped(&self) -> usize {
        self.queue_capacity.max(1)
    }

    #[inline]
    pub fn subscriber_capacity_clamped(&self) -> usize {
        self.subscriber_capacity.max(1)
    }
}

impl Default for BusConfig {
    /// Default configuration:
    ///
    /// - `retention_age = 2m`
    /// - `sweep_interval = 60s`
    /// - `delivery_timeout = 5s`
    /// - `queue_capacity = 64`
    /// - `subscriber_capacity = 256`
    fn default() -> Self {
        Self {
            retention_age: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
            delivery_timeout: Duration::from_secs(5),
            queue_capacity: 64,
            subscriber_capacity: 256,
        }
    }
}

fn parse_u64(name: &str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    match value {
        Some(v) => v.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            key: name.to_string(),
            message: format!("invalid u64 value '{v}'"),
        }),
        None => Ok(None),
    }
}

fn to_usize(name: &str, n: u64) -> Result<usize, ConfigError> {
    usize::try_from(n).map_err(|_| ConfigError::InvalidValue {
        key: name.to_string(),
        message: format!("{n} does not fit in usize"),
    })
}
