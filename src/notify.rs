// src/notify.rs

//! Webhook side channel.
//!
//! Plugins (and the retry wrapper) use a [`Notifier`] for user-visible
//! notifications. Delivery is fire-and-forget: nothing in the engine waits on
//! or depends on the outcome of `send`.

use serde_json::Value;
use tracing::info;

pub trait Notifier: Send + Sync {
    fn send(&self, endpoint: &str, payload: Value);
}

/// Default notifier: records the notification in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn send(&self, endpoint: &str, payload: Value) {
        info!(%endpoint, %payload, "webhook notification");
    }
}
