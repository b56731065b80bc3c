// src/plugin/variants/interval.rs

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::errors::{PlugvisorError, Result};
use crate::plugin::{
    BoxFuture, Job, Plugin, PluginContext, PluginDescriptor, StopSignal, run_with_retry,
};

/// Re-runs its job with a fixed pause between invocations.
///
/// Each invocation goes through the retry wrapper when `restart_on_failure`
/// is set; otherwise the first failure ends the loop. The pause is measured
/// from the end of one invocation to the start of the next.
pub struct IntervalPlugin {
    descriptor: PluginDescriptor,
    ctx: PluginContext,
    job: Arc<dyn Job>,
    every: Duration,
    stop: StopSignal,
}

impl IntervalPlugin {
    pub fn new(
        descriptor: PluginDescriptor,
        ctx: PluginContext,
        job: Arc<dyn Job>,
        every: Duration,
    ) -> Self {
        Self {
            descriptor,
            ctx,
            job,
            every,
            stop: StopSignal::new(),
        }
    }

    async fn invoke(&self) -> Result<()> {
        if self.descriptor.restart_on_failure {
            run_with_retry(&self.descriptor, &self.ctx, &self.stop, || {
                self.job.run(self.stop.clone())
            })
            .await
        } else {
            self.job
                .run(self.stop.clone())
                .await
                .map_err(|err| PlugvisorError::runtime(&self.descriptor.name, err))
        }
    }
}

impl Plugin for IntervalPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let name = self.descriptor.name.as_str();
            info!(plugin = %name, every_ms = self.every.as_millis() as u64, "interval loop started");

            while !self.stop.is_set() {
                if let Err(err) = self.invoke().await {
                    error!(plugin = %name, error = %err, "interval loop stopping after unrecoverable failure");
                    return Err(err);
                }

                debug!(plugin = %name, "waiting for next interval");
                if self.stop.wait_timeout(self.every).await {
                    break;
                }
            }

            info!(plugin = %name, "interval loop stopped");
            Ok(())
        })
    }

    fn stop(&self) {
        if self.stop.set() {
            info!(plugin = %self.descriptor.name, "stop requested");
        }
    }
}
