//! # Severity router: the single ingress loop.
//!
//! Every posted message passes through one [`Router`], which gives all producers
//! a single total order. For each message it hands an `Arc` to the class queues
//! returned by [`Severity::routes`](crate::Severity::routes), in order:
//!
//! ```text
//! inbox ──► Router ──► queue[own]   ──► ack producer (post returns)
//!                 └──► queue[All]
//!                 └──► queue[Alert] (severity < Warning only)
//! ```
//!
//! ## Rules
//! - One message at a time; the next is not taken until all routes are accepted.
//! - Each class queue is bounded; a full queue blocks only the routing of this
//!   message into that class, until its dispatcher drains.
//! - The producer is acknowledged right after the own-class handoff, before `All`/`Alert`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::messages::{Message, Severity};

/// A message on its way into the router, plus the producer's acknowledgement.
pub(crate) struct Envelope {
    pub(crate) message: Message,
    pub(crate) accepted: oneshot::Sender<()>,
}

/// Sending halves of the seven class queues, indexed by [`Severity::index`].
pub(crate) type ClassQueues = [mpsc::Sender<Arc<Message>>; Severity::CLASSES.len()];

pub(crate) struct Router {
    inbox: mpsc::Receiver<Envelope>,
    queues: ClassQueues,
}

impl Router {
    pub(crate) fn new(inbox: mpsc::Receiver<Envelope>, queues: ClassQueues) -> Self {
        Self { inbox, queues }
    }

    /// Routes messages until the inbox closes or `token` is cancelled.
    pub(crate) async fn run(mut self, token: CancellationToken) {
        tracing::debug!("router started");
        loop {
            let envelope = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = self.inbox.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            if !self.route(envelope, &token).await {
                break;
            }
        }
        tracing::debug!("router stopped");
    }

    /// Returns `false` if routing was interrupted by cancellation or a closed queue.
    async fn route(&self, envelope: Envelope, token: &CancellationToken) -> bool {
        let Envelope { message, accepted } = envelope;
        let routes = message.severity.routes();
        let message = Arc::new(message);
        let mut accepted = Some(accepted);

        for class in routes {
            let queue = &self.queues[class.index()];
            let sent = tokio::select! {
                biased;
                _ = token.cancelled() => return false,
                sent = queue.send(Arc::clone(&message)) => sent,
            };
            if sent.is_err() {
                tracing::warn!(class = %class, "class queue closed; router stopping");
                return false;
            }
            if let Some(ack) = accepted.take() {
                // Producer may have given up waiting; routing continues regardless.
                let _ = ack.send(());
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Receivers = Vec<mpsc::Receiver<Arc<Message>>>;

    fn queues(capacity: usize) -> (ClassQueues, Receivers) {
        let mut rxs = Vec::new();
        let txs = std::array::from_fn(|_| {
            let (tx, rx) = mpsc::channel(capacity);
            rxs.push(rx);
            tx
        });
        (txs, rxs)
    }

    fn drain(rxs: &mut Receivers) -> Vec<Vec<String>> {
        rxs.iter_mut()
            .map(|rx| {
                let mut codes = Vec::new();
                while let Ok(m) = rx.try_recv() {
                    codes.push(m.code.clone());
                }
                codes
            })
            .collect()
    }

    async fn post(tx: &mpsc::Sender<Envelope>, sev: Severity, code: &str) {
        let (ack, acked) = oneshot::channel();
        tx.send(Envelope {
            message: Message::new(sev, "t", code),
            accepted: ack,
        })
        .await
        .unwrap();
        acked.await.unwrap();
    }

    #[tokio::test]
    async fn routes_each_severity_to_its_classes() {
        let (txs, mut rxs) = queues(16);
        let (in_tx, in_rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let handle = tokio::spawn(Router::new(in_rx, txs).run(token.clone()));

        post(&in_tx, Severity::Debug, "D").await;
        post(&in_tx, Severity::Info, "I").await;
        post(&in_tx, Severity::Warning, "W").await;
        post(&in_tx, Severity::Alert, "A").await;
        drop(in_tx);
        handle.await.unwrap();

        let got = drain(&mut rxs);
        assert_eq!(got[Severity::Debug.index()], vec!["D"]);
        assert_eq!(got[Severity::Info.index()], vec!["I"]);
        assert_eq!(got[Severity::Warning.index()], vec!["W"]);
        assert!(got[Severity::Error.index()].is_empty());
        assert_eq!(got[Severity::Alert.index()], vec!["D", "I", "A"]);
        assert_eq!(got[Severity::All.index()], vec!["D", "I", "W", "A"]);
    }

    #[tokio::test]
    async fn producer_is_released_after_own_class_handoff() {
        // All has room for nothing beyond one message; own classes have plenty.
        let (in_tx, in_rx) = mpsc::channel(1);
        let mut rxs = Vec::new();
        let txs: ClassQueues = std::array::from_fn(|i| {
            let cap = if i == Severity::All.index() { 1 } else { 16 };
            let (tx, rx) = mpsc::channel(cap);
            rxs.push(rx);
            tx
        });
        let token = CancellationToken::new();
        let handle = tokio::spawn(Router::new(in_rx, txs).run(token.clone()));

        post(&in_tx, Severity::Error, "E1").await;
        // E2's own-class handoff succeeds even though All is full.
        post(&in_tx, Severity::Error, "E2").await;

        token.cancel();
        handle.await.unwrap();

        let got = drain(&mut rxs);
        assert_eq!(got[Severity::Error.index()], vec!["E1", "E2"]);
        assert_eq!(got[Severity::All.index()], vec!["E1"]);
    }
}
