// src/ipc/control.rs

//! External control protocol: operator/CLI ↔ manager.
//!
//! One request frame per connection, answered by one response frame, after
//! which the server closes the connection.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{PlugvisorError, Result};
use crate::ipc::frame::{read_frame, write_frame};
use crate::manager::ManagerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    Start,
    Stop,
    Restart,
    List,
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlCommand::Start => "start",
            ControlCommand::Stop => "stop",
            ControlCommand::Restart => "restart",
            ControlCommand::List => "list",
        };
        f.write_str(s)
    }
}

/// `{cmd, plugin_name, args, kwargs, force}`.
///
/// Empty `args`/`kwargs` mean "use the registered values".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub cmd: ControlCommand,
    #[serde(default)]
    pub plugin_name: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    #[serde(default)]
    pub force: bool,
}

impl ControlRequest {
    pub fn new(cmd: ControlCommand) -> Self {
        Self {
            cmd,
            plugin_name: None,
            args: Vec::new(),
            kwargs: Map::new(),
            force: false,
        }
    }

    pub fn list() -> Self {
        Self::new(ControlCommand::List)
    }

    pub fn start(plugin: impl Into<String>) -> Self {
        Self::new(ControlCommand::Start).plugin(plugin)
    }

    pub fn stop(plugin: impl Into<String>) -> Self {
        Self::new(ControlCommand::Stop).plugin(plugin)
    }

    pub fn restart(plugin: impl Into<String>) -> Self {
        Self::new(ControlCommand::Restart).plugin(plugin)
    }

    pub fn plugin(mut self, name: impl Into<String>) -> Self {
        self.plugin_name = Some(name.into());
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// `{status, message, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            status: ResponseStatus::Ok,
            message: message.into(),
            data,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// Accept control connections until `shutdown` fires.
///
/// Each connection is handled on its own task; a misbehaving client only
/// ever affects its own connection.
pub async fn serve(
    listener: TcpListener,
    handle: ManagerHandle,
    recv_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "control server listening");
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "failed to accept control connection");
                    continue;
                }
            },
        };

        debug!(%peer, "control connection accepted");
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &handle, recv_timeout).await {
                warn!(%peer, error = %e, "control connection failed");
            }
        });
    }

    info!("control server stopped");
    Ok(())
}

/// Serve exactly one request on `stream`.
///
/// Malformed or timed-out requests are answered with `{status: error}` when
/// the stream is still writable; the error is also returned for logging.
pub async fn handle_connection<S>(
    mut stream: S,
    handle: &ManagerHandle,
    recv_timeout: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let received = tokio::time::timeout(recv_timeout, read_frame::<_, ControlRequest>(&mut stream))
        .await
        .unwrap_or_else(|_| {
            Err(PlugvisorError::ConnectionError(format!(
                "no request received within {recv_timeout:?}"
            )))
        });

    let request = match received {
        Ok(request) => request,
        Err(err) => {
            let _ = write_frame(&mut stream, &ControlResponse::error(err.to_string())).await;
            return Err(err);
        }
    };

    debug!(cmd = %request.cmd, plugin = ?request.plugin_name, "control request");
    let response = match handle.request(request).await {
        Ok(response) => response,
        Err(err) => ControlResponse::error(err.to_string()),
    };
    write_frame(&mut stream, &response).await
}

/// Client side: connect to `addr`, send `request`, wait for the response.
///
/// Connecting and receiving are each bounded by `timeout`.
pub async fn send_request(
    addr: &str,
    request: &ControlRequest,
    timeout: Duration,
) -> Result<ControlResponse> {
    let mut stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| PlugvisorError::ConnectionError(format!("connecting to {addr} timed out")))?
        .map_err(|e| PlugvisorError::ConnectionError(format!("connecting to {addr}: {e}")))?;

    write_frame(&mut stream, request).await?;

    tokio::time::timeout(timeout, read_frame(&mut stream))
        .await
        .map_err(|_| {
            PlugvisorError::ConnectionError(format!("no response from {addr} within {timeout:?}"))
        })?
}
