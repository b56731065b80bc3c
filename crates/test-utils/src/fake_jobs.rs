use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use plugvisor::notify::Notifier;
use plugvisor::plugin::{BoxFuture, Job, StopSignal};
use serde_json::Value;

/// Succeeds immediately and counts its runs.
#[derive(Debug, Clone, Default)]
pub struct CountingJob {
    runs: Arc<AtomicUsize>,
}

impl CountingJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn shared(&self) -> Arc<dyn Job> {
        Arc::new(self.clone())
    }
}

impl Job for CountingJob {
    fn run(&self, _stop: StopSignal) -> BoxFuture<'_, anyhow::Result<()>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

/// Fails its first `failures` runs (all of them when `None`), then succeeds.
#[derive(Debug, Clone)]
pub struct FailingJob {
    runs: Arc<AtomicUsize>,
    failures: Option<usize>,
}

impl FailingJob {
    pub fn always() -> Self {
        Self {
            runs: Arc::default(),
            failures: None,
        }
    }

    pub fn times(failures: usize) -> Self {
        Self {
            runs: Arc::default(),
            failures: Some(failures),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn shared(&self) -> Arc<dyn Job> {
        Arc::new(self.clone())
    }
}

impl Job for FailingJob {
    fn run(&self, _stop: StopSignal) -> BoxFuture<'_, anyhow::Result<()>> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = self.failures.is_none_or(|n| run <= n);
        Box::pin(async move {
            if fail {
                Err(anyhow!("boom (run {run})"))
            } else {
                Ok(())
            }
        })
    }
}

/// Blocks until the stop signal fires, or forever when `stubborn`.
#[derive(Debug, Clone, Default)]
pub struct BlockingJob {
    runs: Arc<AtomicUsize>,
    stubborn: bool,
}

impl BlockingJob {
    pub fn cooperative() -> Self {
        Self::default()
    }

    /// Ignores the stop signal; only an abort ends the run.
    pub fn stubborn() -> Self {
        Self {
            runs: Arc::default(),
            stubborn: true,
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn shared(&self) -> Arc<dyn Job> {
        Arc::new(self.clone())
    }
}

impl Job for BlockingJob {
    fn run(&self, stop: StopSignal) -> BoxFuture<'_, anyhow::Result<()>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let stubborn = self.stubborn;
        Box::pin(async move {
            if stubborn {
                std::future::pending::<()>().await;
            }
            stop.wait().await;
            Ok(())
        })
    }
}

/// Records every notification it is asked to send.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(String, Value)>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, endpoint: &str, payload: Value) {
        self.sent
            .lock()
            .unwrap()
            .push((endpoint.to_string(), payload));
    }
}
