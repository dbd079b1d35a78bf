//! # Subscription handle.
//!
//! A [`Subscription`] is the consumer side of one registry endpoint. It is a
//! lazy, unbounded, non-restartable [`Stream`] of [`Message`]s that ends when the
//! subscription is removed or the bus stops. Dropping the handle unsubscribes.

use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::registry::{Registry, SubscriptionId};
use crate::messages::{Message, Severity};

/// Live stream of messages routed to one severity class.
///
/// ## Example
/// ```rust
/// use futures::StreamExt;
/// use alertbus::{BusConfig, MessageBus, Provenance, Severity};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), alertbus::BusError> {
/// let bus = MessageBus::builder(BusConfig::default()).build();
/// let mut alerts = bus.subscribe(Severity::Alert)?;
///
/// bus.post_message(Severity::Debug, Provenance::default(), "heartbeat", "D001", Default::default())
///     .await?;
///
/// let msg = alerts.next().await.expect("routed to Alert");
/// assert_eq!(msg.code, "D001");
/// bus.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    class: Severity,
    rx: mpsc::Receiver<Message>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        class: Severity,
        rx: mpsc::Receiver<Message>,
        registry: Weak<Registry>,
    ) -> Self {
        Self {
            id,
            class,
            rx,
            registry,
        }
    }

    /// Handle usable with [`MessageBus::unsubscribe`](crate::MessageBus::unsubscribe).
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Class this subscription receives.
    pub fn class(&self) -> Severity {
        self.class
    }

    /// Waits for the next message; `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Returns an already-delivered message without waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Removes this subscription. Messages already buffered are discarded.
    ///
    /// Same as dropping the handle: [`Drop`] unregisters it.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.class, self.id);
        }
    }
}
