// src/plugin/variants/daemon.rs

use std::sync::Arc;

use tracing::info;

use crate::errors::Result;
use crate::plugin::{
    BoxFuture, Job, Plugin, PluginContext, PluginDescriptor, StopSignal, run_with_retry,
};

/// Runs its job once and expects it to block until the stop signal fires.
///
/// A normal return is final; only failures are re-run (under the retry
/// policy, when `restart_on_failure` is set).
pub struct DaemonPlugin {
    descriptor: PluginDescriptor,
    ctx: PluginContext,
    job: Arc<dyn Job>,
    stop: StopSignal,
}

impl DaemonPlugin {
    pub fn new(descriptor: PluginDescriptor, ctx: PluginContext, job: Arc<dyn Job>) -> Self {
        Self {
            descriptor,
            ctx,
            job,
            stop: StopSignal::new(),
        }
    }
}

impl Plugin for DaemonPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(plugin = %self.descriptor.name, "daemon starting");
            let result = run_with_retry(&self.descriptor, &self.ctx, &self.stop, || {
                self.job.run(self.stop.clone())
            })
            .await;
            info!(plugin = %self.descriptor.name, ok = result.is_ok(), "daemon exited");
            result
        })
    }

    fn stop(&self) {
        if self.stop.set() {
            info!(plugin = %self.descriptor.name, "stop requested");
        }
    }
}
