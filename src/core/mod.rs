//! Runtime core: routing, fan-out, retention, and lifecycle.
//!
//! The public API from this module is [`MessageBus`] (with [`BusBuilder`] and
//! [`BusConfig`]).
//!
//! Internal modules:
//! - [`router`]: single ingress loop applying the severity routing rule;
//! - [`dispatcher`]: one fan-out loop per severity class;
//! - [`janitor`]: periodic retention purge;
//! - [`shutdown`]: cross-platform shutdown signal handling;
//! - [`bus`]: the handle producers and consumers share.
//!
//! ```text
//!   post() ──► MessageLog.append ──► [inbox] ──► Router
//!                                                 │
//!        ┌────────┬────────┬─────────┬──────────┬─┴──────┬────────┐
//!        ▼        ▼        ▼         ▼          ▼        ▼        ▼
//!     [debug]  [info] [warning]  [error] [critical]  [alert]   [all]     class queues
//!        │        │        │         │          │        │        │
//!     Dispatcher × 7 ── snapshot(Registry[class]) ──► Subscription streams / workers
//!
//!   Janitor ── every sweep_interval ──► MessageLog.purge_older_than(now - retention_age)
//! ```

mod builder;
mod bus;
mod config;
mod dispatcher;
mod janitor;
mod router;
mod shutdown;

pub use builder::BusBuilder;
pub use bus::MessageBus;
pub use config::{
    BusConfig, ENV_DELIVERY_TIMEOUT_MS, ENV_QUEUE_CAPACITY, ENV_RETENTION_AGE_SECS,
    ENV_SUBSCRIBER_CAPACITY, ENV_SWEEP_INTERVAL_SECS,
};
