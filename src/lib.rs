//! # alertbus
//!
//! **alertbus** is an in-process alert bus for Tokio applications.
//!
//! Producers post severity-tagged messages; any number of consumers subscribe to
//! a severity class and receive a live fan-out of matching messages. Every message
//! is first appended to a message log, which a background janitor trims to a
//! bounded retention window.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │  producer A  │   │  producer B  │   │  producer C  │
//!     │ (admin API)  │   │ (login API)  │   │   (tasks)    │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  MessageBus::post()                                               │
//! │  - MessageLog.append (atomic: record + annotations)               │
//! │  - single ingress queue (total order across producers)            │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │         Router         │
//!                       │ own class → All → Alert│
//!                       │   (Alert: sev<Warning) │
//!                       └───┬────────────────┬───┘
//!                           ▼                ▼
//!                 [queue: class X]     [queue: All] ...   (7 bounded queues)
//!                           ▼                ▼
//!                     Dispatcher X     Dispatcher All     (one per class)
//!                           │                │
//!                 snapshot(Registry)   snapshot(Registry)
//!                    ┌──────┼──────┐         │
//!                    ▼      ▼      ▼         ▼
//!                  sub1   sub2   subN      subM           (Subscription streams)
//!
//!   Janitor: sleep(sweep_interval) → purge_older_than(now - retention_age) → repeat
//! ```
//!
//! ### Lifecycle
//! ```text
//! MessageBus::builder(cfg).build()
//!   ├─► spawn Router, Dispatcher × 7, Janitor (children of one CancellationToken)
//!   └─► Arc<MessageBus>
//!
//! post()        ──► append ──► route ──► ack after own-class handoff
//! subscribe()   ──► Registry.insert(id) ──► Subscription (Stream<Item = Message>)
//! unsubscribe() ──► Registry.remove(id) ──► stream ends after buffered messages
//! stop()        ──► cancel token ──► close registry ──► join all tasks
//! ```
//!
//! ## Features
//! | Area              | Description                                                     | Key types / traits                         |
//! |-------------------|-----------------------------------------------------------------|--------------------------------------------|
//! | **Bus**           | Post, subscribe, lifecycle.                                     | [`MessageBus`], [`BusBuilder`]             |
//! | **Messages**      | Severity classes, routing rule, message payload.                | [`Severity`], [`Message`], [`Annotations`] |
//! | **Subscribers**   | Stream handles and callback consumers.                          | [`Subscription`], [`Subscribe`]            |
//! | **Message log**   | Append/purge store with cascading annotations.                  | [`MessageLog`], [`MemoryLog`]              |
//! | **Errors**        | Typed errors for posting, storage, and configuration.          | [`BusError`], [`ConfigError`]              |
//! | **Configuration** | Retention, sweep interval, delivery bound, queue sizes.         | [`BusConfig`]                              |
//!
//! ## Optional features
//! - `sqlite` (default): [`SqliteLog`], a durable log on SQLite.
//! - `logging` (default): [`LogWriter`], a subscriber that re-emits messages through `tracing`.
//!
//! ## Example
//! ```rust
//! use futures::StreamExt;
//! use alertbus::{BusConfig, MessageBus, Provenance, Severity, annotations_from_pairs};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = MessageBus::builder(BusConfig::from_env()?).build();
//!
//!     let mut errors = bus.subscribe(Severity::Error)?;
//!     let mut everything = bus.subscribe(Severity::All)?;
//!
//!     let id = bus
//!         .post_message(
//!             Severity::Error,
//!             Provenance::new("root", "admin", "0644"),
//!             "disk full",
//!             "E100",
//!             annotations_from_pairs(["disk", "/dev/sda1"])?,
//!         )
//!         .await?;
//!
//!     assert_eq!(errors.next().await.map(|m| m.code), Some("E100".to_string()));
//!     assert_eq!(everything.next().await.map(|m| m.text), Some("disk full".to_string()));
//!
//!     let stored = bus.fetch(id).await?.expect("retained");
//!     assert_eq!(stored.record.provenance.owner, "root");
//!
//!     bus.stop().await;
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod messages;
mod store;
mod subscribers;

// ---- Public re-exports ----

pub use crate::core::{
    BusBuilder, BusConfig, ENV_DELIVERY_TIMEOUT_MS, ENV_QUEUE_CAPACITY, ENV_RETENTION_AGE_SECS,
    ENV_SUBSCRIBER_CAPACITY, ENV_SWEEP_INTERVAL_SECS, MessageBus,
};
pub use error::{BusError, ConfigError};
pub use messages::{Annotations, Message, Severity, annotations_from_pairs};
pub use store::{AnnotationRecord, LogEntry, LogRecord, MemoryLog, MessageLog, Provenance, RecordId};
pub use subscribers::{Subscribe, Subscription, SubscriptionId};

// Optional: durable SQLite log.
// Enable with: `--features sqlite` (on by default)
#[cfg(feature = "sqlite")]
pub use store::SqliteLog;

// Optional: built-in subscriber that logs messages through `tracing`.
// Enable with: `--features logging` (on by default)
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
