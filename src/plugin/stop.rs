// src/plugin/stop.rs

//! Cooperative stop signal shared between a plugin and its scheduling loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Single-set, multi-reader stop flag.
///
/// Once set it stays set for the lifetime of the plugin instance. Readers
/// either poll [`StopSignal::is_set`] or park on [`StopSignal::wait_timeout`],
/// which doubles as a cancellable sleep.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    token: CancellationToken,
    set: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Returns `true` only for the call that actually flipped it.
    pub fn set(&self) -> bool {
        let first = !self.set.swap(true, Ordering::SeqCst);
        self.token.cancel();
        first
    }

    pub fn is_set(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the signal is set.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }

    /// Sleep for `timeout` or until the signal is set, whichever comes first.
    ///
    /// Returns `true` if the signal is set when the wait ends.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => true,
            _ = tokio::time::sleep(timeout) => self.is_set(),
        }
    }

    /// The underlying token, for jobs that want to hand it to other libraries.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
