//! # Fan-out dispatcher, one per severity class.
//!
//! ```text
//! queue[class] ──► Dispatcher ──► snapshot(class) ──► try_send ──► subscriber 1
//!                      │                          ├─► try_send ──► subscriber 2
//!                      │                          └─► full ──► lag buffer[N]
//!                      │                                           │
//!                      └──◄── reserve() ready / deadline ◄─────────┘
//! ```
//!
//! ## Rules
//! - **Per-subscriber FIFO**: messages leave the class queue in routing order; a
//!   subscriber with a lag buffer receives new messages only through that buffer.
//! - **No sibling ordering**: subscribers are visited in snapshot order, which is arbitrary.
//! - **Backpressure** (with a delivery timeout): the dispatcher never waits on a
//!   subscriber. A full endpoint gets a lag buffer, drained as the subscriber
//!   frees capacity. Buffered messages older than the timeout are dropped for
//!   that subscriber (`BackpressureTimeout`, logged). The buffer holds at most
//!   the endpoint's capacity; beyond that the oldest entry is dropped early.
//! - **Backpressure** (no timeout): sends to all siblings run concurrently and the
//!   class waits for every one of them.
//! - **Disconnects**: a closed subscriber queue is pruned from the registry.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::BusError;
use crate::messages::{Message, Severity};
use crate::subscribers::{Endpoint, Registry, SubscriptionId};

type Reservation = Result<mpsc::OwnedPermit<Message>, mpsc::error::SendError<()>>;

/// Messages a full endpoint has not accepted yet.
struct Lagging {
    endpoint: Endpoint,
    pending: VecDeque<(Arc<Message>, Instant)>,
    reserving: bool,
}

impl Lagging {
    /// Removes entries whose deadline has passed. Deadlines grow front to back.
    fn take_expired(&mut self, now: Instant) -> Vec<Arc<Message>> {
        let mut expired = Vec::new();
        while let Some((_, deadline)) = self.pending.front() {
            if *deadline > now {
                break;
            }
            if let Some((message, _)) = self.pending.pop_front() {
                expired.push(message);
            }
        }
        expired
    }
}

pub(crate) struct Dispatcher {
    class: Severity,
    queue: mpsc::Receiver<Arc<Message>>,
    registry: Arc<Registry>,
    delivery_timeout: Option<Duration>,
    dropped: Arc<AtomicU64>,
    lagging: HashMap<SubscriptionId, Lagging>,
    reservations: FuturesUnordered<Pin<Box<dyn Future<Output = (SubscriptionId, Reservation)> + Send + Sync>>>,
}

impl Dispatcher {
    pub(crate) fn new(
        class: Severity,
        queue: mpsc::Receiver<Arc<Message>>,
        registry: Arc<Registry>,
        delivery_timeout: Option<Duration>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            class,
            queue,
            registry,
            delivery_timeout,
            dropped,
            lagging: HashMap::new(),
            reservations: FuturesUnordered::new(),
        }
    }

    /// Drains the class queue until it closes or `token` is cancelled.
    pub(crate) async fn run(mut self, token: CancellationToken) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some((id, reservation)) = self.reservations.next(), if !self.reservations.is_empty() => {
                    self.on_capacity(id, reservation);
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire(Instant::now());
                }
                next = self.queue.recv() => match next {
                    Some(message) => {
                        if !self.fan_out(message, &token).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        tracing::debug!(class = %self.class, "dispatcher stopped");
    }

    /// Delivers one message to every current subscriber. `false` on cancellation.
    async fn fan_out(&mut self, message: Arc<Message>, token: &CancellationToken) -> bool {
        let snapshot = self.registry.snapshot(self.class);
        self.lagging
            .retain(|id, _| snapshot.iter().any(|(live, _)| live == id));

        let Some(timeout) = self.delivery_timeout else {
            return self.fan_out_blocking(&message, snapshot, token).await;
        };

        for (id, endpoint) in snapshot {
            if let Some(lag) = self.lagging.get_mut(&id) {
                if lag.pending.len() >= lag.endpoint.max_capacity() {
                    if let Some((oldest, _)) = lag.pending.pop_front() {
                        record_drop(self.class, &self.dropped, id, &oldest, timeout);
                    }
                }
                lag.pending.push_back((Arc::clone(&message), Instant::now() + timeout));
                continue;
            }

            match endpoint.try_send(Message::clone(&message)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => self.prune(id),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(class = %self.class, subscription = %id, "subscriber lagging");
                    let mut pending = VecDeque::new();
                    pending.push_back((Arc::clone(&message), Instant::now() + timeout));
                    self.lagging.insert(
                        id,
                        Lagging {
                            endpoint,
                            pending,
                            reserving: false,
                        },
                    );
                    self.reserve(id);
                }
            }
        }
        true
    }

    async fn fan_out_blocking(
        &self,
        message: &Message,
        snapshot: Vec<(SubscriptionId, Endpoint)>,
        token: &CancellationToken,
    ) -> bool {
        let sends = snapshot.into_iter().map(|(id, endpoint)| {
            let message = message.clone();
            async move { (id, endpoint.send(message).await.is_ok()) }
        });
        let outcomes = tokio::select! {
            biased;
            _ = token.cancelled() => return false,
            outcomes = join_all(sends) => outcomes,
        };
        for (id, delivered) in outcomes {
            if !delivered {
                self.prune(id);
            }
        }
        true
    }

    /// Waits for one free slot on a lagging endpoint, at most one wait per endpoint.
    fn reserve(&mut self, id: SubscriptionId) {
        let Some(lag) = self.lagging.get_mut(&id) else {
            return;
        };
        if lag.reserving {
            return;
        }
        lag.reserving = true;
        let endpoint = lag.endpoint.clone();
        self.reservations
            .push(Box::pin(async move { (id, endpoint.reserve_owned().await) }));
    }

    fn on_capacity(&mut self, id: SubscriptionId, reservation: Reservation) {
        // A lag buffer that emptied while waiting just releases the permit.
        let Some(lag) = self.lagging.get_mut(&id) else {
            return;
        };
        lag.reserving = false;

        let Ok(permit) = reservation else {
            self.lagging.remove(&id);
            self.prune(id);
            return;
        };

        let timeout = self.delivery_timeout.unwrap_or_default();
        for message in lag.take_expired(Instant::now()) {
            record_drop(self.class, &self.dropped, id, &message, timeout);
        }

        if let Some((message, _)) = lag.pending.pop_front() {
            permit.send(Message::clone(&message));
        }
        while let Some((message, _)) = lag.pending.front() {
            match lag.endpoint.try_send(Message::clone(message)) {
                Ok(()) => {
                    lag.pending.pop_front();
                }
                Err(mpsc::error::TrySendError::Full(_)) => break,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.lagging.remove(&id);
                    self.prune(id);
                    return;
                }
            }
        }

        if lag.pending.is_empty() {
            self.lagging.remove(&id);
            tracing::debug!(class = %self.class, subscription = %id, "subscriber caught up");
        } else {
            self.reserve(id);
        }
    }

    fn expire(&mut self, now: Instant) {
        let timeout = self.delivery_timeout.unwrap_or_default();
        for (id, lag) in &mut self.lagging {
            for message in lag.take_expired(now) {
                record_drop(self.class, &self.dropped, *id, &message, timeout);
            }
        }
        self.lagging.retain(|_, lag| !lag.pending.is_empty());
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.lagging
            .values()
            .filter_map(|lag| lag.pending.front().map(|(_, deadline)| *deadline))
            .min()
    }

    fn prune(&self, id: SubscriptionId) {
        self.registry.remove(self.class, id);
        tracing::debug!(class = %self.class, subscription = %id, "pruned disconnected subscriber");
    }
}

fn record_drop(class: Severity, dropped: &AtomicU64, id: SubscriptionId, message: &Message, timeout: Duration) {
    dropped.fetch_add(1, Ordering::Relaxed);
    let err = BusError::BackpressureTimeout {
        subscription: id,
        timeout,
    };
    tracing::warn!(
        class = %class,
        subscription = %id,
        code = %message.code,
        label = err.as_label(),
        "dropped delivery: {err}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        queue: mpsc::Sender<Arc<Message>>,
        registry: Arc<Registry>,
        dropped: Arc<AtomicU64>,
        token: CancellationToken,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start(class: Severity, subscriber_capacity: usize, timeout: Option<Duration>) -> Harness {
        let (queue, rx) = mpsc::channel(16);
        let registry = Arc::new(Registry::new(subscriber_capacity));
        let dropped = Arc::new(AtomicU64::new(0));
        let token = CancellationToken::new();
        let dispatcher = Dispatcher::new(class, rx, Arc::clone(&registry), timeout, Arc::clone(&dropped));
        let handle = tokio::spawn(dispatcher.run(token.clone()));
        Harness {
            queue,
            registry,
            dropped,
            token,
            handle,
        }
    }

    fn msg(code: &str) -> Arc<Message> {
        Arc::new(Message::new(Severity::Error, "t", code))
    }

    #[tokio::test]
    async fn every_subscriber_gets_every_message_in_order() {
        let h = start(Severity::Error, 16, None);
        let (_a, mut ra) = h.registry.register(Severity::Error).unwrap();
        let (_b, mut rb) = h.registry.register(Severity::Error).unwrap();

        for code in ["E1", "E2", "E3"] {
            h.queue.send(msg(code)).await.unwrap();
        }

        for rx in [&mut ra, &mut rb] {
            for code in ["E1", "E2", "E3"] {
                assert_eq!(rx.recv().await.unwrap().code, code);
            }
        }
        h.token.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn stalled_subscriber_is_dropped_after_timeout() {
        let h = start(Severity::Error, 1, Some(Duration::from_millis(20)));
        let (_stalled, _never_read) = h.registry.register(Severity::Error).unwrap();
        let (_live, mut live) = h.registry.register(Severity::Error).unwrap();

        for code in ["E1", "E2", "E3"] {
            h.queue.send(msg(code)).await.unwrap();
        }
        for code in ["E1", "E2", "E3"] {
            assert_eq!(live.recv().await.unwrap().code, code);
        }

        // The stalled queue holds E1; E2 is pushed out of the lag buffer by E3,
        // which then expires.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.dropped.load(Ordering::Relaxed), 2);
        h.token.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn lagging_subscriber_does_not_slow_its_siblings() {
        let h = start(Severity::Error, 1, Some(Duration::from_secs(30)));
        let (_stalled, _never_read) = h.registry.register(Severity::Error).unwrap();
        let (_live, mut live) = h.registry.register(Severity::Error).unwrap();

        let codes: Vec<String> = (0..10).map(|i| format!("E{i}")).collect();
        let received = tokio::time::timeout(Duration::from_millis(500), async {
            for code in &codes {
                h.queue.send(msg(code)).await.unwrap();
                assert_eq!(live.recv().await.unwrap().code, *code);
            }
        })
        .await;
        assert!(received.is_ok(), "live subscriber waited on the stalled one");

        h.token.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn lagging_subscriber_catches_up_in_order() {
        let h = start(Severity::Error, 2, Some(Duration::from_secs(30)));
        let (_slow, mut slow) = h.registry.register(Severity::Error).unwrap();

        for code in ["E1", "E2", "E3", "E4"] {
            h.queue.send(msg(code)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        for code in ["E1", "E2", "E3", "E4"] {
            assert_eq!(slow.recv().await.unwrap().code, code);
        }
        assert_eq!(h.dropped.load(Ordering::Relaxed), 0);

        h.token.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn closed_subscriber_is_pruned() {
        let h = start(Severity::Error, 4, Some(Duration::from_millis(20)));
        let (_gone, rx) = h.registry.register(Severity::Error).unwrap();
        let (_live, mut live) = h.registry.register(Severity::Error).unwrap();
        drop(rx);

        h.queue.send(msg("E1")).await.unwrap();
        assert_eq!(live.recv().await.unwrap().code, "E1");
        assert_eq!(h.registry.len(Severity::Error), 1);
        assert_eq!(h.dropped.load(Ordering::Relaxed), 0);

        h.token.cancel();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_interrupts_blocked_delivery() {
        let h = start(Severity::Error, 1, None);
        let (_stalled, _never_read) = h.registry.register(Severity::Error).unwrap();

        h.queue.send(msg("E1")).await.unwrap();
        h.queue.send(msg("E2")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.token.cancel();
        tokio::time::timeout(Duration::from_secs(1), h.handle)
            .await
            .expect("dispatcher exits on cancel")
            .unwrap();
    }
}
