// src/plugin/mod.rs

//! Plugin lifecycle contract.
//!
//! A [`Plugin`] is a schedulable unit driven by exactly one Tokio task:
//!
//! - `start()` is the blocking (awaited) main entry. It returns `Err` on
//!   failure; the scheduling variants decide whether to retry.
//! - `stop()` is cooperative: it sets the instance's [`StopSignal`] and
//!   returns immediately. Calling it twice is harmless.
//! - `force_stop()` is the hard escalation used by the manager when a plugin
//!   does not wind down within its grace period.
//!
//! The actual work lives in a [`Job`]; the variants in [`variants`] wrap a job
//! with a re-invocation rule (once, daemon, interval, cron) or replace it with
//! a supervised child process.

pub mod descriptor;
pub mod factory;
pub mod retry;
pub mod stop;
pub mod variants;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::ManagerConfig;
use crate::errors::Result;
use crate::notify::{Notifier, TracingNotifier};
use crate::types::ScheduleKind;

pub use descriptor::{DEFAULT_IMPLEMENTATION, PluginDescriptor, ProcessSpec, Schedule};
pub use factory::{JobConstructor, JobFactories};
pub use retry::{RetryPolicy, RetryState, run_with_retry};
pub use stop::StopSignal;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait Plugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    /// Run the plugin until it completes, fails, or observes its stop signal.
    fn start(&self) -> BoxFuture<'_, Result<()>>;

    /// Request a cooperative stop. Idempotent and non-blocking.
    fn stop(&self);

    /// Best-effort hard interruption. Default: nothing beyond `stop()`.
    fn force_stop(&self) {
        self.stop();
    }

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn requires_root(&self) -> bool {
        self.descriptor().requires_root
    }

    fn restart_on_failure(&self) -> bool {
        self.descriptor().restart_on_failure
    }

    fn kind(&self) -> ScheduleKind {
        self.descriptor().kind()
    }
}

/// A unit of work invoked by a scheduling variant.
///
/// `run` receives a clone of the plugin's stop signal; long-running jobs
/// should return promptly once it is set.
pub trait Job: Send + Sync {
    fn run(&self, stop: StopSignal) -> BoxFuture<'_, anyhow::Result<()>>;
}

/// Closure-backed [`Job`]. Each call to `run` creates a fresh future.
pub struct JobFn<F> {
    f: F,
}

impl<F, Fut> Job for JobFn<F>
where
    F: Fn(StopSignal) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn run(&self, stop: StopSignal) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin((self.f)(stop))
    }
}

/// Wrap a closure as a shared job.
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn Job>
where
    F: Fn(StopSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(JobFn { f })
}

/// Shared services handed to every plugin at construction time.
#[derive(Clone)]
pub struct PluginContext {
    pub config: Arc<ManagerConfig>,
    pub notifier: Arc<dyn Notifier>,
}

impl PluginContext {
    pub fn new(config: Arc<ManagerConfig>) -> Self {
        Self {
            config,
            notifier: Arc::new(TracingNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
