//! # Callback worker: drives one [`Subscribe`] from one [`Subscription`].
//!
//! ```text
//! dispatcher ──► [subscription queue] ──► worker ──► subscriber.on_message()
//!                    (bounded)                └────► panic → warn!, continue
//! ```
//!
//! ## Rules
//! - **FIFO**: messages are handled in delivery order, one at a time.
//! - **Isolation**: panics are caught with `catch_unwind` and logged.
//! - **Exit**: when the subscription stream ends (unsubscribe or bus stop) or the
//!   runtime token is cancelled.
//!
//! **Warning**: `AssertUnwindSafe` is used, which can leave shared state inconsistent
//! if the subscriber panics while holding a lock.

use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::{Subscribe, Subscription};

tokio::task_local! {
    static IN_CALLBACK: ();
}

/// `true` while running inside a [`Subscribe::on_message`] call driven by a worker.
pub(crate) fn in_callback() -> bool {
    IN_CALLBACK.try_with(|_| ()).is_ok()
}

/// Runs until the subscription ends or `token` is cancelled.
pub(crate) async fn run(sub: Arc<dyn Subscribe>, mut stream: Subscription, token: CancellationToken) {
    let name = sub.name();
    tracing::debug!(subscriber = name, class = %stream.class(), subscription = %stream.id(), "subscriber worker started");

    loop {
        let msg = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = stream.recv() => match next {
                Some(msg) => msg,
                None => break,
            },
        };

        let fut = IN_CALLBACK.scope((), sub.on_message(&msg));
        if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            let info = {
                let any = &*panic_err;
                if let Some(msg) = any.downcast_ref::<&'static str>() {
                    (*msg).to_string()
                } else if let Some(msg) = any.downcast_ref::<String>() {
                    msg.clone()
                } else {
                    "unknown panic".to_string()
                }
            };
            tracing::warn!(subscriber = name, code = %msg.code, panic = %info, "subscriber panicked");
        }
    }

    tracing::debug!(subscriber = name, subscription = %stream.id(), "subscriber worker stopped");
}
