// src/plugin/variants/one_time.rs

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use serde_json::json;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use crate::errors::{PlugvisorError, Result};
use crate::plugin::{
    BoxFuture, Job, Plugin, PluginContext, PluginDescriptor, StopSignal, lock,
};
use crate::types::OneTimeState;

/// Runs its job exactly once, in a task of its own so that `force_stop` can
/// abort an in-progress run. Failures are never retried.
pub struct OneTimePlugin {
    descriptor: PluginDescriptor,
    ctx: PluginContext,
    job: Arc<dyn Job>,
    stop: StopSignal,
    state: Mutex<OneTimeState>,
    run: Mutex<Option<AbortHandle>>,
}

impl OneTimePlugin {
    pub fn new(descriptor: PluginDescriptor, ctx: PluginContext, job: Arc<dyn Job>) -> Self {
        Self {
            descriptor,
            ctx,
            job,
            stop: StopSignal::new(),
            state: Mutex::new(OneTimeState::Pending),
            run: Mutex::new(None),
        }
    }

    pub fn state(&self) -> OneTimeState {
        *lock(&self.state)
    }

    fn set_state(&self, state: OneTimeState) {
        *lock(&self.state) = state;
    }
}

impl Plugin for OneTimePlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let name = self.descriptor.name.clone();
            self.set_state(OneTimeState::Running);

            let job = Arc::clone(&self.job);
            let stop = self.stop.clone();

            let run = tokio::spawn(async move { job.run(stop).await });
            *lock(&self.run) = Some(run.abort_handle());

            let outcome = run.await;
            lock(&self.run).take();

            match outcome {
                Ok(Ok(())) => {
                    info!(plugin = %name, "one-time run completed");
                    self.set_state(OneTimeState::Completed);
                    Ok(())
                }
                Ok(Err(err)) => {
                    let message = format!("{err:#}");
                    error!(plugin = %name, error = %message, "one-time run failed");
                    self.set_state(OneTimeState::Failed);
                    if let Some(endpoint) = self.descriptor.webhook.as_deref() {
                        self.ctx.notifier.send(
                            endpoint,
                            json!({ "plugin": name, "event": "failed", "error": message }),
                        );
                    }
                    Err(PlugvisorError::runtime(&name, err))
                }
                Err(join_err) if join_err.is_cancelled() => {
                    warn!(plugin = %name, "one-time run was killed");
                    self.set_state(OneTimeState::Killed);
                    Err(PlugvisorError::runtime(&name, anyhow!("run was force-stopped")))
                }
                Err(join_err) => {
                    self.set_state(OneTimeState::Failed);
                    Err(PlugvisorError::runtime(&name, anyhow!("run panicked: {join_err}")))
                }
            }
        })
    }

    fn stop(&self) {
        if self.stop.set() {
            info!(plugin = %self.descriptor.name, "stop requested");
        }
    }

    fn force_stop(&self) {
        self.stop.set();
        if let Some(run) = lock(&self.run).take() {
            warn!(plugin = %self.descriptor.name, "aborting in-progress one-time run");
            run.abort();
        }
    }
}
