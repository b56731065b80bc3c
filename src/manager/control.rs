// src/manager/control.rs

//! Request channel into a running [`Manager`](super::Manager).

use tokio::sync::{mpsc, oneshot};

use crate::errors::{PlugvisorError, Result};
use crate::ipc::control::{ControlRequest, ControlResponse};

/// A control request plus the slot its response goes back through.
#[derive(Debug)]
pub struct ControlMessage {
    pub request: ControlRequest,
    pub reply: oneshot::Sender<ControlResponse>,
}

/// Cloneable sender side used by the IPC server and in-process callers.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<ControlMessage>,
}

impl ManagerHandle {
    /// Send `request` to the manager loop and wait for its response.
    pub async fn request(&self, request: ControlRequest) -> Result<ControlResponse> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControlMessage { request, reply })
            .await
            .map_err(|_| PlugvisorError::ConnectionError("manager is not running".to_string()))?;
        rx.await.map_err(|_| {
            PlugvisorError::ConnectionError("manager dropped the request".to_string())
        })
    }
}

/// Create a bounded control channel.
pub fn control_channel(capacity: usize) -> (ManagerHandle, mpsc::Receiver<ControlMessage>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ManagerHandle { tx }, rx)
}
