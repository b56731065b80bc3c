// src/exec/command.rs

//! Built-in `command` job: run a shell command once per invocation.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tokio::process::Command;
use tracing::{info, warn};

use crate::exec::process::drain_lines;
use crate::plugin::{BoxFuture, Job, PluginDescriptor, StopSignal};

/// Shell command job.
///
/// The command line comes from `kwargs.cmd`, or else from the positional
/// `args` joined with spaces. An optional `kwargs.cwd` sets the working
/// directory. If the stop signal fires mid-run the process is killed and the
/// run counts as successful.
#[derive(Debug, Clone)]
pub struct CommandJob {
    plugin: String,
    cmd: String,
    cwd: Option<PathBuf>,
}

impl CommandJob {
    pub fn new(plugin: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            cmd: cmd.into(),
            cwd: None,
        }
    }

    pub fn from_descriptor(descriptor: &PluginDescriptor) -> Result<Self> {
        let cmd = match descriptor.kwarg_str("cmd") {
            Some(cmd) => cmd.to_string(),
            None => descriptor
                .args
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" "),
        };

        if cmd.trim().is_empty() {
            bail!(
                "plugin '{}' needs a `cmd` keyword argument or positional args",
                descriptor.name
            );
        }

        let mut job = Self::new(&descriptor.name, cmd);
        job.cwd = descriptor.kwarg_str("cwd").map(PathBuf::from);
        Ok(job)
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    async fn run_inner(&self, stop: StopSignal) -> Result<()> {
        info!(plugin = %self.plugin, cmd = %self.cmd, "starting command");

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning command for plugin '{}'", self.plugin))?;

        drain_lines(child.stdout.take(), &self.plugin, "stdout");
        drain_lines(child.stderr.take(), &self.plugin, "stderr");

        tokio::select! {
            status = child.wait() => {
                let status = status.with_context(|| {
                    format!("waiting for command of plugin '{}'", self.plugin)
                })?;
                let code = status.code().unwrap_or(-1);
                info!(plugin = %self.plugin, exit_code = code, success = status.success(), "command exited");
                if status.success() {
                    Ok(())
                } else {
                    Err(anyhow!("command `{}` exited with code {}", self.cmd, code))
                }
            }
            _ = stop.wait() => {
                info!(plugin = %self.plugin, "stop requested; killing command");
                if let Err(e) = child.kill().await {
                    warn!(plugin = %self.plugin, error = %e, "failed to kill command on stop");
                }
                Ok(())
            }
        }
    }
}

impl Job for CommandJob {
    fn run(&self, stop: StopSignal) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.run_inner(stop))
    }
}
