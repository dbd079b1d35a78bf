//! # Subscribers: registry, stream handles, and callback consumers.
//!
//! ## Architecture
//! ```text
//! subscribe(class) ──► Registry[class].insert(id, sender) ──► Subscription (Stream)
//!
//! Dispatcher[class]:
//!   snapshot(class) ──┬──► sender S1 ──► Subscription S1 ──► consumer polls
//!                     ├──► sender S2 ──► Subscription S2 ──► worker ──► Subscribe::on_message
//!                     └──► sender SN ──► ...
//! ```
//!
//! ## Consumer styles
//! - **Streams**: [`Subscription`] implements `futures::Stream<Item = Message>`.
//! - **Callbacks**: implement [`Subscribe`] and hand it to
//!   [`MessageBus::attach`](crate::MessageBus::attach); a worker drains the
//!   subscription and isolates panics.

#[cfg(feature = "logging")]
mod log;
mod registry;
mod subscribe;
mod subscription;
pub(crate) mod worker;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub(crate) use registry::{Endpoint, Registry};
pub use registry::SubscriptionId;
pub use subscribe::Subscribe;
pub use subscription::Subscription;
