// src/exec/process.rs

//! Child process plumbing for supervised plugins.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::errors::{PlugvisorError, Result};
use crate::plugin::ProcessSpec;

/// Launch the child described by `spec`.
///
/// stdout/stderr are drained into the log at debug level so the child never
/// blocks on a full pipe. The child is killed if its handle is dropped.
pub fn spawn(spec: &ProcessSpec, plugin: &str) -> Result<Child> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd.spawn().map_err(|e| {
        PlugvisorError::ProcessSupervision(format!(
            "failed to launch '{}' for plugin '{}': {}",
            spec.program, plugin, e
        ))
    })?;

    info!(plugin = %plugin, program = %spec.program, pid = ?child.id(), "process launched");

    drain_lines(child.stdout.take(), plugin, "stdout");
    drain_lines(child.stderr.take(), plugin, "stderr");

    Ok(child)
}

/// Consume a child output stream line by line, logging at debug.
pub fn drain_lines<R>(stream: Option<R>, plugin: &str, label: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else {
        return;
    };
    let plugin = plugin.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(plugin = %plugin, "{}: {}", label, line);
        }
    });
}

/// Stop a child: graceful terminate, wait up to `grace`, then kill.
///
/// Each escalation step is logged. Fails only if the child cannot be killed.
pub async fn terminate(child: &mut Child, grace: Duration, plugin: &str) -> Result<()> {
    if let Some(status) = child.try_wait()? {
        debug!(plugin = %plugin, %status, "process already exited");
        return Ok(());
    }

    info!(plugin = %plugin, grace_ms = grace.as_millis() as u64, "terminating process");
    request_terminate(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(plugin = %plugin, %status, "process exited after terminate");
            Ok(())
        }
        Ok(Err(e)) => Err(PlugvisorError::ProcessSupervision(format!(
            "waiting for process of plugin '{}': {}",
            plugin, e
        ))),
        Err(_) => {
            warn!(plugin = %plugin, "process ignored terminate within grace period; killing");
            child.kill().await.map_err(|e| {
                PlugvisorError::ProcessSupervision(format!(
                    "failed to kill process of plugin '{}': {}",
                    plugin, e
                ))
            })?;
            info!(plugin = %plugin, "process killed");
            Ok(())
        }
    }
}

#[cfg(unix)]
fn request_terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain syscall on a pid we own; failure is reported via errno.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            warn!(pid, error = %std::io::Error::last_os_error(), "SIGTERM failed");
        }
    }
}

#[cfg(not(unix))]
fn request_terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "failed to request process termination");
    }
}

/// Forcefully kill a process by pid. Used by `force_stop` paths that do not
/// own the `Child` handle.
#[cfg(unix)]
pub fn kill_pid(pid: u32) {
    // SAFETY: see `request_terminate`.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "SIGKILL failed");
    }
}

#[cfg(not(unix))]
pub fn kill_pid(_pid: u32) {}

/// Whether the current process has root privileges.
#[cfg(unix)]
pub fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn running_as_root() -> bool {
    false
}
