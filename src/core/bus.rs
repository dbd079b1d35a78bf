//! # MessageBus: ingestion, subscriptions, and lifecycle.
//!
//! The [`MessageBus`] owns the message log, the router ingress, the subscription
//! registry, and every background task. It is built and started by
//! [`BusBuilder::build`](super::BusBuilder::build) and runs until [`stop`](MessageBus::stop).
//!
//! ## Post path
//! ```text
//! post(provenance, message)
//!   ├─► validate (severity must not be All)
//!   ├─► log.append(record, annotations)      ── Err ──► StorageError, never routed
//!   ├─► ingress.send(Envelope)               (single queue: total order)
//!   └─► await ack ◄── router accepted own-class handoff
//!         │
//!         └─► returns RecordId (fan-out continues without the producer)
//! ```
//!
//! ## Shutdown path
//! ```text
//! stop()
//!   ├─► token.cancel()     → router, dispatchers, janitor, workers exit their loops
//!   ├─► registry.close()   → every Subscription stream ends
//!   └─► join all tasks     (in the background when called from a subscriber callback)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{BusBuilder, BusConfig, janitor, router::Envelope, shutdown};
use crate::error::BusError;
use crate::messages::{Annotations, Message, Severity};
use crate::store::{AnnotationRecord, LogEntry, LogRecord, MessageLog, Provenance, RecordId};
use crate::subscribers::{Registry, Subscribe, Subscription, SubscriptionId, worker};

/// Handle to a running bus. Share it as `Arc<MessageBus>` between producers and consumers.
pub struct MessageBus {
    cfg: BusConfig,
    log: Arc<dyn MessageLog>,
    ingress: mpsc::Sender<Envelope>,
    registry: Arc<Registry>,
    token: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
    dropped: Arc<AtomicU64>,
}

impl MessageBus {
    /// Returns a builder; call [`BusBuilder::build`] to start the bus.
    pub fn builder(cfg: BusConfig) -> BusBuilder {
        BusBuilder::new(cfg)
    }

    pub(super) fn new_internal(
        cfg: BusConfig,
        log: Arc<dyn MessageLog>,
        ingress: mpsc::Sender<Envelope>,
        registry: Arc<Registry>,
        token: CancellationToken,
        tasks: JoinSet<()>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            cfg,
            log,
            ingress,
            registry,
            token,
            tasks: Mutex::new(tasks),
            dropped,
        }
    }

    // ---------------------------
    // Ingestion
    // ---------------------------

    /// Builds a message stamped with the current time and posts it.
    ///
    /// See [`post`](Self::post).
    pub async fn post_message(
        &self,
        severity: Severity,
        provenance: Provenance,
        text: impl Into<String>,
        code: impl Into<String>,
        annotations: Annotations,
    ) -> Result<RecordId, BusError> {
        let message = Message::new(severity, text, code).with_annotations(annotations);
        self.post(provenance, message).await
    }

    /// Records `message` in the log, then hands it to the router.
    ///
    /// Returns once the append has committed and the message has been accepted
    /// into its own class queue. Delivery to subscribers happens afterwards.
    ///
    /// # Errors
    /// - [`BusError::Validation`]: the severity is `All`; nothing is recorded.
    /// - [`BusError::Storage`]: the append failed; the message is not routed.
    /// - [`BusError::Closed`]: the bus is stopping or stopped.
    #[tracing::instrument(skip(self, provenance, message), fields(severity = %message.severity, code = %message.code))]
    pub async fn post(&self, provenance: Provenance, message: Message) -> Result<RecordId, BusError> {
        message.validate()?;
        if self.token.is_cancelled() {
            return Err(BusError::Closed);
        }

        let record = LogRecord::from_message(&message, provenance);
        let id = self.log.append(&record, &message.annotations).await?;

        let (accepted, acked) = oneshot::channel();
        let envelope = Envelope { message, accepted };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(BusError::Closed),
            sent = self.ingress.send(envelope) => sent.map_err(|_| BusError::Closed)?,
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(BusError::Closed),
            ack = acked => ack.map_err(|_| BusError::Closed)?,
        }

        tracing::trace!(id, "message posted");
        Ok(id)
    }

    // ---------------------------
    // Subscriptions
    // ---------------------------

    /// Subscribes to `class`. The returned stream sees messages routed after this call.
    ///
    /// # Errors
    /// [`BusError::Closed`] once the bus has been stopped.
    pub fn subscribe(&self, class: Severity) -> Result<Subscription, BusError> {
        let (id, rx) = self.registry.register(class)?;
        tracing::debug!(class = %class, subscription = %id, "subscribed");
        Ok(Subscription::new(id, class, rx, Arc::downgrade(&self.registry)))
    }

    /// Removes a subscription by id. Returns `true` if it was registered.
    ///
    /// The subscriber's stream yields whatever was already buffered, then ends.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.registry.remove_any(id);
        if removed {
            tracing::debug!(subscription = %id, "unsubscribed");
        }
        removed
    }

    /// Attaches a callback subscriber to `class`, driven by its own worker task.
    ///
    /// The worker stops when the returned id is unsubscribed or the bus stops.
    pub async fn attach(&self, class: Severity, subscriber: Arc<dyn Subscribe>) -> Result<SubscriptionId, BusError> {
        let mut tasks = self.tasks.lock().await;
        // Workers of removed subscriptions have exited; reap them.
        while let Some(res) = tasks.try_join_next() {
            log_join_error(res);
        }
        Self::spawn_worker(&self.registry, &mut tasks, &self.token, class, subscriber)
    }

    pub(super) fn spawn_worker(
        registry: &Arc<Registry>,
        tasks: &mut JoinSet<()>,
        token: &CancellationToken,
        class: Severity,
        subscriber: Arc<dyn Subscribe>,
    ) -> Result<SubscriptionId, BusError> {
        let (id, rx) = registry.register(class)?;
        let stream = Subscription::new(id, class, rx, Arc::downgrade(registry));
        tasks.spawn(worker::run(subscriber, stream, token.child_token()));
        Ok(id)
    }

    /// Number of live subscriptions on `class`.
    pub fn subscriber_count(&self, class: Severity) -> usize {
        self.registry.len(class)
    }

    // ---------------------------
    // Log access
    // ---------------------------

    /// Reads a posted message back from the log.
    pub async fn fetch(&self, id: RecordId) -> Result<Option<LogEntry>, BusError> {
        self.log.fetch(id).await
    }

    /// Annotation rows of a logged message.
    pub async fn annotations(&self, id: RecordId) -> Result<Vec<AnnotationRecord>, BusError> {
        self.log.annotations(id).await
    }

    /// Deletes log records older than `threshold` (unix seconds). Best-effort:
    /// storage errors are logged and reported as zero removals.
    pub async fn purge_older_than(&self, threshold: i64) -> u64 {
        janitor::purge(self.log.as_ref(), threshold).await
    }

    /// The message log behind this bus.
    pub fn log(&self) -> &Arc<dyn MessageLog> {
        &self.log
    }

    // ---------------------------
    // Lifecycle
    // ---------------------------

    pub fn config(&self) -> &BusConfig {
        &self.cfg
    }

    /// Deliveries dropped because a subscriber exceeded the delivery timeout.
    pub fn dropped_deliveries(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Stops every task and ends every subscription stream. Idempotent.
    ///
    /// Called from inside [`Subscribe::on_message`], the calling worker is one of
    /// the tasks being stopped: the bus is cancelled and closed, and the tasks are
    /// joined in the background instead of awaited.
    pub async fn stop(&self) {
        self.token.cancel();
        self.registry.close();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        if worker::in_callback() {
            tokio::spawn(join_all_tasks(tasks));
            return;
        }
        join_all_tasks(tasks).await;
        tracing::debug!("message bus stopped");
    }

    /// Runs until SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere) or [`stop`](Self::stop), then stops.
    pub async fn run_until_signal(&self) -> std::io::Result<()> {
        let res = tokio::select! {
            res = shutdown::wait_for_shutdown_signal() => res,
            _ = self.token.cancelled() => Ok(()),
        };
        if res.is_ok() {
            tracing::info!("shutdown requested");
        }
        self.stop().await;
        res
    }
}

async fn join_all_tasks(mut tasks: JoinSet<()>) {
    while let Some(res) = tasks.join_next().await {
        log_join_error(res);
    }
}

fn log_join_error(res: Result<(), tokio::task::JoinError>) {
    if let Err(err) = res {
        if err.is_panic() {
            tracing::warn!("bus task panicked: {err}");
        }
    }
}

impl Drop for MessageBus {
    fn drop(&mut self) {
        self.token.cancel();
        self.registry.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::store::MemoryLog;

    /// Log whose appends always fail.
    struct BrokenLog;

    #[async_trait]
    impl MessageLog for BrokenLog {
        async fn append(&self, _: &LogRecord, _: &Annotations) -> Result<RecordId, BusError> {
            Err(BusError::storage("append", "read-only file system"))
        }
        async fn purge_older_than(&self, _: i64) -> Result<u64, BusError> {
            Err(BusError::storage("purge", "read-only file system"))
        }
        async fn fetch(&self, _: RecordId) -> Result<Option<LogEntry>, BusError> {
            Ok(None)
        }
        async fn annotations(&self, _: RecordId) -> Result<Vec<AnnotationRecord>, BusError> {
            Ok(Vec::new())
        }
        async fn len(&self) -> Result<u64, BusError> {
            Ok(0)
        }
    }

    fn prov() -> Provenance {
        Provenance::new("root", "admin", "0700")
    }

    #[tokio::test]
    async fn append_failure_is_never_routed() {
        let bus = MessageBus::builder(BusConfig::default())
            .with_log(Arc::new(BrokenLog))
            .build();
        let mut all = bus.subscribe(Severity::All).unwrap();

        let err = bus
            .post(prov(), Message::new(Severity::Error, "disk full", "E100"))
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "bus_storage");

        bus.stop().await;
        assert!(all.recv().await.is_none());
    }

    #[tokio::test]
    async fn catch_all_severity_is_rejected() {
        let bus = MessageBus::builder(BusConfig::default()).build();
        let err = bus
            .post(prov(), Message::new(Severity::All, "x", "X"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Validation { .. }));
        assert_eq!(bus.log().len().await.unwrap(), 0);
        bus.stop().await;
    }

    #[tokio::test]
    async fn post_after_stop_is_closed() {
        let bus = MessageBus::builder(BusConfig::default()).build();
        bus.stop().await;
        bus.stop().await;

        assert!(!bus.is_running());
        let err = bus
            .post_message(Severity::Info, prov(), "late", "I999", Annotations::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Closed));
        assert!(matches!(bus.subscribe(Severity::Info), Err(BusError::Closed)));
    }

    #[tokio::test]
    async fn purge_errors_are_swallowed() {
        let bus = MessageBus::builder(BusConfig::default())
            .with_log(Arc::new(BrokenLog))
            .build();
        assert_eq!(bus.purge_older_than(i64::MAX).await, 0);
        bus.stop().await;
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let bus = MessageBus::builder(BusConfig::default()).build();
        let sub = bus.subscribe(Severity::Critical).unwrap();
        assert_eq!(bus.subscriber_count(Severity::Critical), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(Severity::Critical), 0);
        bus.stop().await;
    }

    #[tokio::test]
    async fn stalled_subscriber_does_not_block_producers() {
        let cfg = BusConfig {
            delivery_timeout: Duration::from_millis(20),
            queue_capacity: 1,
            subscriber_capacity: 1,
            ..BusConfig::default()
        };
        let bus = MessageBus::builder(cfg).with_log(Arc::new(MemoryLog::new())).build();
        let _stalled = bus.subscribe(Severity::Warning).unwrap();

        let posted = tokio::time::timeout(Duration::from_secs(2), async {
            for i in 0..5 {
                bus.post_message(Severity::Warning, prov(), "slow", format!("W{i}"), Annotations::new())
                    .await
                    .unwrap();
            }
        })
        .await;
        assert!(posted.is_ok(), "producers must not be blocked indefinitely");

        bus.stop().await;
        assert!(bus.dropped_deliveries() >= 1);
    }

    struct Nop;

    #[async_trait]
    impl Subscribe for Nop {
        async fn on_message(&self, _: &Message) {}
    }

    #[tokio::test]
    async fn attach_churn_does_not_accumulate_tasks() {
        let bus = MessageBus::builder(BusConfig::default()).build();
        let base = bus.tasks.lock().await.len();

        for _ in 0..500 {
            let id = bus.attach(Severity::Info, Arc::new(Nop)).await.unwrap();
            assert!(bus.unsubscribe(id));
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = bus.attach(Severity::Info, Arc::new(Nop)).await.unwrap();

        assert!(bus.tasks.lock().await.len() <= base + 2);
        assert_eq!(bus.subscriber_count(Severity::Info), 1);
        bus.unsubscribe(id);
        bus.stop().await;
    }

    /// Stops the bus it is attached to on the first message.
    struct StopOnMessage {
        bus: std::sync::OnceLock<std::sync::Weak<MessageBus>>,
    }

    #[async_trait]
    impl Subscribe for StopOnMessage {
        async fn on_message(&self, _: &Message) {
            if let Some(bus) = self.bus.get().and_then(std::sync::Weak::upgrade) {
                bus.stop().await;
            }
        }
    }

    #[tokio::test]
    async fn stop_from_a_callback_does_not_hang() {
        let bus = MessageBus::builder(BusConfig::default()).build();
        let stopper = Arc::new(StopOnMessage {
            bus: std::sync::OnceLock::new(),
        });
        let _ = stopper.bus.set(Arc::downgrade(&bus));
        bus.attach(Severity::Critical, stopper).await.unwrap();

        bus.post_message(Severity::Critical, prov(), "halt", "C999", Annotations::new())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while bus.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("callback stopped the bus");
        tokio::time::timeout(Duration::from_secs(1), bus.stop())
            .await
            .expect("outer stop returns");
    }

    #[tokio::test]
    async fn run_until_signal_returns_after_stop() {
        let bus = MessageBus::builder(BusConfig::default()).build();
        let runner = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.run_until_signal().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        bus.stop().await;

        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("runner exits")
            .unwrap()
            .unwrap();
    }
}
