use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{
    bus::MessageBus,
    config::BusConfig,
    dispatcher::Dispatcher,
    janitor::Janitor,
    router::{ClassQueues, Router},
};
use crate::messages::Severity;
use crate::store::{MemoryLog, MessageLog};
use crate::subscribers::{Registry, Subscribe};

/// Builder for constructing a running [`MessageBus`].
pub struct BusBuilder {
    cfg: BusConfig,
    log: Option<Arc<dyn MessageLog>>,
    subscribers: Vec<(Severity, Arc<dyn Subscribe>)>,
}

impl BusBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: BusConfig) -> Self {
        Self {
            cfg,
            log: None,
            subscribers: Vec::new(),
        }
    }

    /// Sets the message log. Defaults to a fresh [`MemoryLog`].
    pub fn with_log(mut self, log: Arc<dyn MessageLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Attaches a callback subscriber to `class` from the start.
    pub fn with_subscriber(mut self, class: Severity, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push((class, subscriber));
        self
    }

    /// Builds the bus and starts its tasks.
    ///
    /// Spawns, all under one cancellation token:
    /// - the router ingress loop
    /// - one dispatcher per class (7)
    /// - the retention janitor
    /// - one worker per subscriber given to [`with_subscriber`](Self::with_subscriber)
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Arc<MessageBus> {
        let cfg = self.cfg;
        let token = CancellationToken::new();
        let registry = Arc::new(Registry::new(cfg.subscriber_capacity_clamped()));
        let dropped = Arc::new(AtomicU64::new(0));
        let log: Arc<dyn MessageLog> = self.log.unwrap_or_else(|| Arc::new(MemoryLog::new()));
        let mut tasks = JoinSet::new();

        let capacity = cfg.queue_capacity_clamped();
        let mut receivers = Vec::with_capacity(Severity::CLASSES.len());
        let queues: ClassQueues = std::array::from_fn(|_| {
            let (tx, rx) = mpsc::channel(capacity);
            receivers.push(rx);
            tx
        });

        for (class, rx) in Severity::CLASSES.into_iter().zip(receivers) {
            let dispatcher = Dispatcher::new(
                class,
                rx,
                Arc::clone(&registry),
                cfg.delivery_timeout(),
                Arc::clone(&dropped),
            );
            tasks.spawn(dispatcher.run(token.child_token()));
        }

        let (ingress, inbox) = mpsc::channel(1);
        tasks.spawn(Router::new(inbox, queues).run(token.child_token()));

        let janitor = Janitor::new(
            Arc::clone(&log),
            cfg.retention_age,
            cfg.sweep_interval_clamped(),
        );
        tasks.spawn(janitor.run(token.child_token()));

        for (class, sub) in self.subscribers {
            if let Err(err) = MessageBus::spawn_worker(&registry, &mut tasks, &token, class, sub) {
                tracing::warn!(class = %class, label = err.as_label(), "failed to attach subscriber: {err}");
            }
        }

        tracing::debug!(log = log.name(), ?cfg, "message bus started");
        Arc::new(MessageBus::new_internal(
            cfg, log, ingress, registry, token, tasks, dropped,
        ))
    }
}
