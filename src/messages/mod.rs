//! Message data model: severity classes and posted messages.
//!
//! ## Contents
//! - [`Severity`] ordered classes, including the synthetic `All`, and the routing rule
//! - [`Message`] immutable payload carried from producers to subscribers
//! - [`Annotations`] key/value map attached to a message

mod message;
mod severity;

pub use message::{Annotations, Message, annotations_from_pairs};
pub(crate) use message::unix_now;
pub use severity::Severity;
