// src/ipc/supervision.rs

//! Internal supervision protocol: manager ↔ a plugin hosted in a worker
//! process.
//!
//! Commands (`setup`, `start`, `stop`, `ping`) flow from the supervisor to
//! the worker; events (`ready`, `error`, `result`, `log`, `pong`, `stopped`)
//! flow back. Every frame carries an `id`. A reply echoes the id of the
//! command it answers, so replies can be matched even when other traffic is
//! interleaved on the same connection.
//!
//! `start` is answered with `ready` as soon as the run is launched; the
//! run's outcome arrives later as a `result` or `error` event with the same
//! id. Events that answer no pending request (late outcomes, `log` lines)
//! are delivered on the client's event stream.
//!
//! The [`Manager`](crate::manager::Manager) runs plugins in-process and never
//! spawns workers itself. [`SupervisionClient`] is exposed for embedders that
//! want process isolation: accept a `plugvisor worker --connect ADDR`
//! connection with [`SupervisionClient::accept`], then drive it with
//! `setup` / `start` / `stop`. [`serve_worker`] is the worker side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{PlugvisorError, Result};
use crate::ipc::frame::{read_frame_opt, write_frame};
use crate::plugin::{Plugin, lock};

/// Id used by events that do not answer a command.
pub const UNSOLICITED_ID: u64 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum SupervisionCommand {
    Setup {
        plugin_name: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
    },
    Start,
    Stop,
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum SupervisionEvent {
    Ready,
    Error {
        message: String,
    },
    #[serde(rename = "result")]
    RunResult {
        #[serde(default)]
        data: Value,
    },
    Log {
        level: String,
        message: String,
    },
    Pong,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub id: u64,
    #[serde(flatten)]
    pub command: SupervisionCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub id: u64,
    #[serde(flatten)]
    pub event: SupervisionEvent,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<SupervisionEvent>>>>;

/// Supervisor side of a persistent worker connection.
pub struct SupervisionClient<W> {
    writer: AsyncMutex<W>,
    next_id: AtomicU64,
    pending: Pending,
    worker: Mutex<String>,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl<W> SupervisionClient<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap an established connection.
    ///
    /// Returns the client and the stream of events that matched no pending
    /// request. Each request waits at most `timeout` for its reply.
    pub fn new<R>(
        reader: R,
        writer: W,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<EventFrame>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(route_events(reader, Arc::clone(&pending), events_tx));

        let client = Self {
            writer: AsyncMutex::new(writer),
            next_id: AtomicU64::new(UNSOLICITED_ID + 1),
            pending,
            worker: Mutex::new("worker".to_string()),
            timeout,
            reader,
        };
        (client, events_rx)
    }

    /// Send `command` and wait for the event carrying the same id.
    pub async fn request(&self, command: SupervisionCommand) -> Result<EventFrame> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        let frame = CommandFrame { id, command };
        let sent = {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &frame).await
        };
        if let Err(err) = sent {
            lock(&self.pending).remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(event)) => Ok(EventFrame { id, event }),
            Ok(Err(_)) => Err(PlugvisorError::ConnectionError(
                "worker connection closed before reply".to_string(),
            )),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(PlugvisorError::ConnectionError(format!(
                    "no reply to request {id} within {:?}",
                    self.timeout
                )))
            }
        }
    }

    /// Ask the worker to build `plugin_name` with the given arguments.
    pub async fn setup(
        &self,
        plugin_name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<()> {
        *lock(&self.worker) = plugin_name.to_string();
        let reply = self
            .request(SupervisionCommand::Setup {
                plugin_name: plugin_name.to_string(),
                args,
                kwargs,
            })
            .await?;
        match reply.event {
            SupervisionEvent::Ready => Ok(()),
            SupervisionEvent::Error { message } => Err(PlugvisorError::PluginConstruction {
                name: plugin_name.to_string(),
                source: anyhow!(message),
            }),
            other => Err(unexpected("setup", &other)),
        }
    }

    /// Launch the run. Returns the request id its outcome will carry.
    pub async fn start(&self) -> Result<u64> {
        let reply = self.request(SupervisionCommand::Start).await?;
        match reply.event {
            SupervisionEvent::Ready => Ok(reply.id),
            SupervisionEvent::Error { message } => Err(self.worker_error(message)),
            other => Err(unexpected("start", &other)),
        }
    }

    /// Stop the hosted plugin and wait for the worker to confirm.
    pub async fn stop(&self) -> Result<()> {
        let reply = self.request(SupervisionCommand::Stop).await?;
        match reply.event {
            SupervisionEvent::Stopped => Ok(()),
            SupervisionEvent::Error { message } => Err(self.worker_error(message)),
            other => Err(unexpected("stop", &other)),
        }
    }

    pub async fn ping(&self) -> Result<()> {
        let reply = self.request(SupervisionCommand::Ping).await?;
        match reply.event {
            SupervisionEvent::Pong => Ok(()),
            other => Err(unexpected("ping", &other)),
        }
    }

    fn worker_error(&self, message: String) -> PlugvisorError {
        PlugvisorError::runtime(&lock(&self.worker), anyhow!(message))
    }
}

impl SupervisionClient<OwnedWriteHalf> {
    /// Wait for a worker to connect to `listener` and wrap the connection.
    pub async fn accept(
        listener: &TcpListener,
        timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<EventFrame>)> {
        let (stream, peer) = tokio::time::timeout(timeout, listener.accept())
            .await
            .map_err(|_| {
                PlugvisorError::ConnectionError(format!(
                    "no worker connected within {timeout:?}"
                ))
            })??;
        info!(%peer, "worker connected");
        let (read, write) = stream.into_split();
        Ok(Self::new(read, write, timeout))
    }
}

impl<W> Drop for SupervisionClient<W> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn unexpected(request: &str, event: &SupervisionEvent) -> PlugvisorError {
    PlugvisorError::IpcProtocol(format!("unexpected reply to {request}: {event:?}"))
}

async fn route_events<R>(
    mut reader: R,
    pending: Pending,
    events: mpsc::UnboundedSender<EventFrame>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame: EventFrame = match read_frame_opt(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("worker closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "dropping worker connection");
                break;
            }
        };

        let waiter = lock(&pending).remove(&frame.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(frame.event);
            }
            None => {
                let _ = events.send(frame);
            }
        }
    }

    // Fail every outstanding request.
    lock(&pending).clear();
}

/// Worker side: host one plugin and answer supervision commands until the
/// supervisor closes the connection.
///
/// `build` constructs the plugin named in `setup`. When the connection
/// ends, a still-running plugin is stopped (and force-stopped after
/// `stop_timeout`).
pub async fn serve_worker<R, W, F>(
    mut reader: R,
    writer: W,
    build: F,
    stop_timeout: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    F: Fn(&str, Vec<Value>, Map<String, Value>) -> Result<Arc<dyn Plugin>>,
{
    let writer = Arc::new(AsyncMutex::new(writer));
    let mut plugin: Option<Arc<dyn Plugin>> = None;
    let mut run: Option<JoinHandle<()>> = None;

    while let Some(frame) = read_frame_opt::<_, CommandFrame>(&mut reader).await? {
        let id = frame.id;
        debug!(id, command = ?frame.command, "supervision command");

        let reply = match frame.command {
            SupervisionCommand::Ping => SupervisionEvent::Pong,

            SupervisionCommand::Setup {
                plugin_name,
                args,
                kwargs,
            } => {
                if is_running(&run) {
                    SupervisionEvent::Error {
                        message: "a plugin is already running in this worker".to_string(),
                    }
                } else {
                    match build(&plugin_name, args, kwargs) {
                        Ok(built) => {
                            info!(plugin = %plugin_name, "worker plugin ready");
                            plugin = Some(built);
                            SupervisionEvent::Ready
                        }
                        Err(e) => SupervisionEvent::Error {
                            message: e.to_string(),
                        },
                    }
                }
            }

            SupervisionCommand::Start => match &plugin {
                None => SupervisionEvent::Error {
                    message: "start received before setup".to_string(),
                },
                Some(_) if is_running(&run) => SupervisionEvent::Error {
                    message: "plugin is already running".to_string(),
                },
                Some(p) => {
                    // Ready must precede anything the run reports under this id.
                    send(&writer, id, SupervisionEvent::Ready).await?;
                    run = Some(spawn_run(id, Arc::clone(p), Arc::clone(&writer)));
                    continue;
                }
            },

            SupervisionCommand::Stop => {
                if let Some(p) = &plugin {
                    stop_run(p.as_ref(), run.take(), stop_timeout).await;
                }
                SupervisionEvent::Stopped
            }
        };

        send(&writer, id, reply).await?;
    }

    if let Some(p) = &plugin {
        stop_run(p.as_ref(), run.take(), stop_timeout).await;
    }
    info!("supervisor closed the connection; worker exiting");
    Ok(())
}

fn is_running(run: &Option<JoinHandle<()>>) -> bool {
    run.as_ref().is_some_and(|handle| !handle.is_finished())
}

fn spawn_run<W>(id: u64, plugin: Arc<dyn Plugin>, writer: Arc<AsyncMutex<W>>) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let started = SupervisionEvent::Log {
            level: "info".to_string(),
            message: format!("plugin '{}' started", plugin.name()),
        };
        let _ = send(&writer, UNSOLICITED_ID, started).await;

        let outcome = match plugin.start().await {
            Ok(()) => SupervisionEvent::RunResult { data: Value::Null },
            Err(e) => SupervisionEvent::Error {
                message: e.to_string(),
            },
        };
        if let Err(e) = send(&writer, id, outcome).await {
            warn!(error = %e, "failed to report run outcome");
        }
    })
}

async fn stop_run(plugin: &dyn Plugin, run: Option<JoinHandle<()>>, stop_timeout: Duration) {
    plugin.stop();
    let Some(mut run) = run else {
        return;
    };
    if tokio::time::timeout(stop_timeout, &mut run).await.is_err() {
        warn!(plugin = %plugin.name(), "plugin did not stop in time; forcing");
        plugin.force_stop();
        run.abort();
        let _ = run.await;
    }
}

async fn send<W>(writer: &Arc<AsyncMutex<W>>, id: u64, event: SupervisionEvent) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer.lock().await;
    write_frame(&mut *writer, &EventFrame { id, event }).await
}
