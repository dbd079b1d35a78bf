//! # Alert Stream Example
//!
//! Consumes the `alert` class as a `Stream` while a background producer posts
//! mixed-severity messages. Only debug/info/alert messages reach the consumer;
//! the janitor trims the log on a short retention window.
//!
//! ## Run
//! ```bash
//! ALERTBUS_RETENTION_AGE_SECS=1 ALERTBUS_SWEEP_INTERVAL_SECS=1 cargo run --example alert_stream
//! ```

use std::time::Duration;

use alertbus::{BusConfig, MessageBus, MessageLog, Provenance, Severity, annotations_from_pairs};
use futures::StreamExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let bus = MessageBus::builder(BusConfig::from_env()?).build();
    let alerts = bus.subscribe(Severity::Alert)?;

    let producer = {
        let bus = bus.clone();
        tokio::spawn(async move {
            let who = Provenance::new("monitor", "ops", "0644");
            for round in 0..5u32 {
                for sev in Severity::CONCRETE {
                    let info = annotations_from_pairs(["round".to_string(), round.to_string()])?;
                    bus.post_message(sev, who.clone(), format!("{sev} check"), format!("P{round}"), info)
                        .await?;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            anyhow::Ok(())
        })
    };

    let consumer = tokio::spawn(
        alerts
            .take(15)
            .for_each(|m| async move {
                println!("[{}] {:<8} {} {}", m.timestamp, m.severity, m.code, m.text);
            }),
    );

    producer.await??;
    consumer.await?;

    println!("log holds {} records", bus.log().len().await?);
    bus.stop().await;
    Ok(())
}
