//! # Callback subscriber trait
//!
//! `Subscribe` is the extension point for consumers that prefer a callback over
//! polling a [`Subscription`](crate::Subscription) stream. Attach one with
//! [`MessageBus::attach`](crate::MessageBus::attach); the bus drives it from a
//! dedicated worker task fed by that subscription.
//!
//! ## Contract
//! - `on_message` may be slow; it only holds back its own subscription, and
//!   through it the class dispatcher up to the configured delivery timeout.
//! - A panic inside `on_message` is caught and logged; the worker keeps going.
//!
//! ## Example (skeleton)
//! ```rust
//! use alertbus::{Message, Subscribe};
//!
//! struct Pager;
//!
//! #[async_trait::async_trait]
//! impl Subscribe for Pager {
//!     async fn on_message(&self, msg: &Message) {
//!         // page the on-call engineer...
//!         let _ = msg;
//!     }
//!     fn name(&self) -> &'static str { "pager" }
//! }
//! ```

use async_trait::async_trait;

use crate::messages::Message;

/// Contract for callback subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single delivered message.
    async fn on_message(&self, message: &Message);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
