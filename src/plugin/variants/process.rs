// src/plugin/variants/process.rs

use std::sync::Mutex;

use anyhow::anyhow;
use tracing::{info, warn};

use crate::errors::Result;
use crate::exec::process;
use crate::plugin::{
    BoxFuture, Plugin, PluginContext, PluginDescriptor, ProcessSpec, StopSignal, lock,
    run_with_retry,
};

/// Launches and supervises an external child process.
///
/// While the stop signal is unset the child is polled for exit every
/// `process_poll`. A non-zero exit is a failure handed to the retry wrapper;
/// a clean exit ends the plugin. `stop()` triggers terminate → wait → kill.
pub struct ProcessPlugin {
    descriptor: PluginDescriptor,
    ctx: PluginContext,
    spec: ProcessSpec,
    stop: StopSignal,
    pid: Mutex<Option<u32>>,
}

impl ProcessPlugin {
    pub fn new(descriptor: PluginDescriptor, ctx: PluginContext, spec: ProcessSpec) -> Self {
        Self {
            descriptor,
            ctx,
            spec,
            stop: StopSignal::new(),
            pid: Mutex::new(None),
        }
    }

    /// Pid of the currently running child, if any.
    pub fn pid(&self) -> Option<u32> {
        *lock(&self.pid)
    }

    async fn supervise_once(&self) -> anyhow::Result<()> {
        let name = self.descriptor.name.as_str();
        let mut child = process::spawn(&self.spec, name)?;
        *lock(&self.pid) = child.id();

        let poll = self.ctx.config.process_poll;
        let grace = self.spec.grace.unwrap_or(self.ctx.config.process_grace);

        let outcome = loop {
            tokio::select! {
                _ = self.stop.wait() => {
                    break process::terminate(&mut child, grace, name)
                        .await
                        .map_err(anyhow::Error::from);
                }
                _ = tokio::time::sleep(poll) => {
                    match child.try_wait() {
                        Ok(Some(status)) if status.success() => {
                            info!(plugin = %name, %status, "process exited cleanly");
                            break Ok(());
                        }
                        Ok(Some(status)) => {
                            break Err(anyhow!("process exited with {status}"));
                        }
                        Ok(None) => {}
                        Err(e) => break Err(anyhow!("polling process failed: {e}")),
                    }
                }
            }
        };

        lock(&self.pid).take();
        outcome
    }
}

impl Plugin for ProcessPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            run_with_retry(&self.descriptor, &self.ctx, &self.stop, || self.supervise_once()).await
        })
    }

    fn stop(&self) {
        if self.stop.set() {
            info!(plugin = %self.descriptor.name, "stop requested");
        }
    }

    fn force_stop(&self) {
        self.stop.set();
        if let Some(pid) = self.pid() {
            warn!(plugin = %self.descriptor.name, pid, "force-killing process");
            process::kill_pid(pid);
        }
    }
}
