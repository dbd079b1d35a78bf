//! # Custom Subscriber Example
//!
//! Shows how to implement a callback subscriber that keeps per-severity counters,
//! next to the built-in [`alertbus::LogWriter`].
//!
//! The counter is attached to `All`; the log writer to `Alert`, so only
//! debug/info/alert messages are echoed through `tracing`.
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example subscriber
//! ```

use std::{
    sync::Arc,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use alertbus::{Annotations, BusConfig, Message, MessageBus, Provenance, Severity, Subscribe};

struct CountingSubscriber {
    counts: [AtomicU64; 6],
}

impl CountingSubscriber {
    fn new() -> Self {
        Self {
            counts: Default::default(),
        }
    }

    fn print_stats(&self) {
        println!();
        println!("Messages seen on `all`:");
        for sev in Severity::CONCRETE {
            let n = self.counts[sev.index()].load(Ordering::Relaxed);
            println!(" ├─► {:<9} {n}", sev.as_str());
        }
    }
}

#[async_trait::async_trait]
impl Subscribe for CountingSubscriber {
    async fn on_message(&self, msg: &Message) {
        if let Some(slot) = self.counts.get(msg.severity.index()) {
            slot.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let counter = Arc::new(CountingSubscriber::new());
    let bus = MessageBus::builder(BusConfig::from_env()?)
        .with_subscriber(Severity::All, counter.clone())
        .with_subscriber(Severity::Alert, Arc::new(alertbus::LogWriter::new()))
        .build();

    let who = Provenance::new("demo", "demo", "0600");
    let plan = [
        (Severity::Info, "service started", "I001"),
        (Severity::Debug, "heartbeat", "D001"),
        (Severity::Warning, "slow request", "W010"),
        (Severity::Error, "disk full", "E100"),
        (Severity::Debug, "heartbeat", "D001"),
        (Severity::Critical, "replica lost", "C002"),
    ];
    for (sev, text, code) in plan {
        bus.post_message(sev, who.clone(), text, code, Annotations::new())
            .await?;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    bus.stop().await;
    counter.print_stats();
    Ok(())
}
