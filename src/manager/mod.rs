// src/manager/mod.rs

//! Plugin registry and lifecycle orchestration.
//!
//! The [`Manager`] owns:
//! - the registry of descriptors (written only by `register`),
//! - one Tokio task per running plugin instance,
//! - the terminal state of instances that have exited.
//!
//! All mutation happens on the task that owns the manager. Remote callers
//! go through a [`ManagerHandle`] and the loop in [`Manager::run`].

pub mod control;
pub mod signals;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{ConfigFile, ManagerConfig};
use crate::errors::{PlugvisorError, Result};
use crate::exec::running_as_root;
use crate::ipc::control::{self as control_ipc, ControlCommand, ControlRequest, ControlResponse};
use crate::notify::Notifier;
use crate::plugin::{JobFactories, Plugin, PluginContext, PluginDescriptor};
use crate::types::{PluginState, ScheduleKind};

pub use control::{ControlMessage, ManagerHandle, control_channel};
pub use signals::wait_for_shutdown_signal;

/// Capacity of the control request channel used by `run_forever`.
const CONTROL_CAPACITY: usize = 64;

/// Snapshot of one registered plugin, as returned by `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStatus {
    pub name: String,
    pub kind: ScheduleKind,
    pub state: PluginState,
    pub requires_root: bool,
    pub restart_on_failure: bool,
}

struct Instance {
    plugin: Arc<dyn Plugin>,
    handle: JoinHandle<Result<()>>,
}

pub struct Manager {
    ctx: PluginContext,
    factories: JobFactories,
    registry: BTreeMap<String, PluginDescriptor>,
    instances: BTreeMap<String, Instance>,
    outcomes: BTreeMap<String, PluginState>,
    is_root: bool,
    stopped: bool,
}

impl Manager {
    pub fn new(config: Arc<ManagerConfig>, factories: JobFactories) -> Self {
        Self {
            ctx: PluginContext::new(config),
            factories,
            registry: BTreeMap::new(),
            instances: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            is_root: running_as_root(),
            stopped: false,
        }
    }

    /// Build a manager from a loaded config and register every plugin
    /// section that converts cleanly. Bad sections are logged and skipped.
    pub fn from_config(config: &ConfigFile, factories: JobFactories) -> Self {
        let mut manager = Self::new(Arc::new(config.manager.clone()), factories);
        for (name, descriptor) in config.descriptors() {
            let registered = descriptor.and_then(|d| manager.register(d));
            if let Err(e) = registered {
                error!(plugin = %name, error = %e, "skipping plugin");
            }
        }
        manager
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        let ctx = self.ctx.clone();
        self.ctx = ctx.with_notifier(notifier);
        self
    }

    /// Override the detected privilege level used by `requires_root` checks.
    pub fn with_root_privileges(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.ctx.config
    }

    pub fn factories_mut(&mut self) -> &mut JobFactories {
        &mut self.factories
    }

    /// Add a descriptor to the registry. Duplicate names are rejected and
    /// leave the registry untouched.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<()> {
        if self.registry.contains_key(&descriptor.name) {
            return Err(PlugvisorError::DuplicatePlugin(descriptor.name));
        }
        info!(plugin = %descriptor.name, kind = %descriptor.kind(), "plugin registered");
        self.registry.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn descriptor(&self, name: &str) -> Option<&PluginDescriptor> {
        self.registry.get(name)
    }

    pub fn plugin_names(&self) -> impl Iterator<Item = &str> {
        self.registry.keys().map(String::as_str)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.instances
            .get(name)
            .is_some_and(|instance| !instance.handle.is_finished())
    }

    /// Start every registered plugin that is not already running.
    ///
    /// Root-only plugins are skipped when not running as root, and a plugin
    /// whose construction fails is logged and skipped. Returns how many
    /// instances were started.
    pub fn start_all(&mut self) -> usize {
        let descriptors: Vec<PluginDescriptor> = self
            .registry
            .values()
            .filter(|d| !self.is_running(&d.name))
            .cloned()
            .collect();

        let mut started = 0;
        for descriptor in descriptors {
            if descriptor.requires_root && !self.is_root {
                warn!(plugin = %descriptor.name, "requires root privileges; skipping");
                continue;
            }
            match self.spawn_instance(&descriptor) {
                Ok(()) => started += 1,
                Err(e) => error!(plugin = %descriptor.name, error = %e, "failed to start plugin"),
            }
        }
        info!(started, registered = self.registry.len(), "plugins started");
        started
    }

    /// Start one registered plugin.
    ///
    /// `args`/`kwargs` replace the registered values for this instance only.
    /// `force` bypasses the root-privilege check.
    pub fn start_plugin(
        &mut self,
        name: &str,
        args: Option<Vec<Value>>,
        kwargs: Option<Map<String, Value>>,
        force: bool,
    ) -> Result<()> {
        let registered = self
            .registry
            .get(name)
            .ok_or_else(|| PlugvisorError::PluginNotFound(name.to_string()))?;

        if self.is_running(name) {
            return Err(PlugvisorError::AlreadyRunning(name.to_string()));
        }
        if registered.requires_root && !self.is_root && !force {
            return Err(PlugvisorError::PermissionDenied(name.to_string()));
        }

        let descriptor = registered.with_overrides(args, kwargs);
        self.spawn_instance(&descriptor)
    }

    /// Stop one plugin. Stopping a plugin that is not running succeeds.
    pub async fn stop_plugin(&mut self, name: &str) -> Result<()> {
        if !self.registry.contains_key(name) {
            return Err(PlugvisorError::PluginNotFound(name.to_string()));
        }
        let Some(instance) = self.instances.remove(name) else {
            debug!(plugin = %name, "stop requested but plugin is not running");
            return Ok(());
        };
        let state = self.shut_down(name, instance).await;
        self.outcomes.insert(name.to_string(), state);
        Ok(())
    }

    pub async fn restart_plugin(
        &mut self,
        name: &str,
        args: Option<Vec<Value>>,
        kwargs: Option<Map<String, Value>>,
        force: bool,
    ) -> Result<()> {
        self.stop_plugin(name).await?;
        self.start_plugin(name, args, kwargs, force)
    }

    /// Stop every running instance: long-running kinds first, then
    /// one-time runs. A second call is a no-op.
    pub async fn stop_all(&mut self) {
        if self.stopped {
            debug!("stop_all already ran");
            return;
        }
        self.stopped = true;
        info!(running = self.instances.len(), "stopping all plugins");

        let instances = std::mem::take(&mut self.instances);
        let (long_running, one_time): (Vec<_>, Vec<_>) = instances
            .into_iter()
            .partition(|(_, instance)| instance.plugin.kind().is_long_running());

        for (name, instance) in long_running.into_iter().chain(one_time) {
            let state = self.shut_down(&name, instance).await;
            self.outcomes.insert(name, state);
        }
        info!("all plugins stopped");
    }

    /// Status of every registered plugin, in name order.
    pub async fn list(&mut self) -> Vec<PluginStatus> {
        self.reap_finished().await;
        self.registry
            .values()
            .map(|d| PluginStatus {
                name: d.name.clone(),
                kind: d.kind(),
                state: self.state_of(&d.name),
                requires_root: d.requires_root,
                restart_on_failure: d.restart_on_failure,
            })
            .collect()
    }

    /// Execute one control request. Errors become `{status: error}`.
    pub async fn handle_request(&mut self, request: ControlRequest) -> ControlResponse {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => ControlResponse::error(e.to_string()),
        }
    }

    async fn dispatch(&mut self, request: ControlRequest) -> Result<ControlResponse> {
        if request.cmd == ControlCommand::List {
            let plugins = self.list().await;
            let message = format!("{} plugin(s) registered", plugins.len());
            return Ok(ControlResponse::ok(message, serde_json::to_value(plugins)?));
        }

        let name = request.plugin_name.as_deref().ok_or_else(|| {
            PlugvisorError::IpcProtocol(format!("'{}' requires plugin_name", request.cmd))
        })?;
        let args = (!request.args.is_empty()).then(|| request.args.clone());
        let kwargs = (!request.kwargs.is_empty()).then(|| request.kwargs.clone());

        match request.cmd {
            ControlCommand::Start => self.start_plugin(name, args, kwargs, request.force)?,
            ControlCommand::Stop => self.stop_plugin(name).await?,
            ControlCommand::Restart => {
                self.restart_plugin(name, args, kwargs, request.force).await?
            }
            ControlCommand::List => {}
        }

        self.reap_finished().await;
        Ok(ControlResponse::ok(
            format!("{} {}", past_tense(request.cmd), name),
            json!({ "plugin": name, "state": self.state_of(name) }),
        ))
    }

    /// Serve control requests until `shutdown` fires or every handle is
    /// dropped, then stop all plugins.
    pub async fn run(
        &mut self,
        mut requests: mpsc::Receiver<ControlMessage>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!("manager loop started");
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                message = requests.recv() => match message {
                    Some(m) => m,
                    None => {
                        info!("control channel closed; exiting");
                        break;
                    }
                },
            };

            let response = self.handle_request(message.request).await;
            if message.reply.send(response).is_err() {
                debug!("control caller went away before the response");
            }
        }

        self.stop_all().await;
        info!("manager loop exiting");
        Ok(())
    }

    /// Start everything, serve the control protocol on `listen_addr`, and
    /// block until Ctrl-C or SIGTERM. Then stop everything.
    pub async fn run_forever(mut self) -> Result<()> {
        let addr = self.config().listen_addr.clone();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            PlugvisorError::ConnectionError(format!("binding control socket {addr}: {e}"))
        })?;

        let (handle, requests) = control_channel(CONTROL_CAPACITY);
        let shutdown = CancellationToken::new();

        let server = tokio::spawn(control_ipc::serve(
            listener,
            handle,
            self.config().recv_timeout,
            shutdown.clone(),
        ));

        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = wait_for_shutdown_signal().await {
                    error!(error = %e, "failed to listen for shutdown signals");
                    return;
                }
                shutdown.cancel();
            });
        }

        self.start_all();
        let result = self.run(requests, shutdown.clone()).await;

        shutdown.cancel();
        match server.await {
            Ok(Err(e)) => warn!(error = %e, "control server failed"),
            Err(e) => warn!(error = %e, "control server task panicked"),
            Ok(Ok(())) => {}
        }
        result
    }

    fn spawn_instance(&mut self, descriptor: &PluginDescriptor) -> Result<()> {
        let plugin = self.factories.construct(&self.ctx, descriptor)?;
        let span = info_span!("plugin", name = %descriptor.name);

        let task_plugin = Arc::clone(&plugin);
        let handle = tokio::spawn(
            async move {
                info!(kind = %task_plugin.kind(), "plugin starting");
                let result = task_plugin.start().await;
                match &result {
                    Ok(()) => info!("plugin exited"),
                    Err(e) => error!(error = %e, "plugin exited with error"),
                }
                result
            }
            .instrument(span),
        );

        self.outcomes.remove(&descriptor.name);
        self.instances
            .insert(descriptor.name.clone(), Instance { plugin, handle });
        Ok(())
    }

    /// Stop a single instance and wait for its task, escalating to
    /// `force_stop` and finally to aborting the task.
    ///
    /// An instance whose task already ended keeps its `Finished` / `Failed`
    /// state; so does a one-time run that ends within `one_time_timeout`.
    async fn shut_down(&self, name: &str, mut instance: Instance) -> PluginState {
        let config = &self.ctx.config;
        let kind = instance.plugin.kind();

        if instance.handle.is_finished() {
            debug!(plugin = %name, "plugin had already exited");
            return exit_state(instance.handle.await);
        }

        let timeout = if kind.is_long_running() {
            instance.plugin.stop();
            config.stop_timeout
        } else {
            config.one_time_timeout
        };

        match tokio::time::timeout(timeout, &mut instance.handle).await {
            Ok(joined) if !kind.is_long_running() => return exit_state(joined),
            Ok(_) => {
                info!(plugin = %name, "plugin stopped");
                return PluginState::Stopped;
            }
            Err(_) => {}
        }

        warn!(
            plugin = %name,
            timeout_ms = timeout.as_millis() as u64,
            "plugin did not stop in time; forcing"
        );
        instance.plugin.force_stop();

        if tokio::time::timeout(config.stop_timeout, &mut instance.handle)
            .await
            .is_err()
        {
            error!(plugin = %name, "plugin ignored force_stop; aborting its task");
            instance.handle.abort();
            let _ = instance.handle.await;
        }
        PluginState::Stopped
    }

    /// Move instances whose task has ended into `outcomes`.
    async fn reap_finished(&mut self) {
        let finished: Vec<String> = self
            .instances
            .iter()
            .filter(|(_, instance)| instance.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        for name in finished {
            let Some(instance) = self.instances.remove(&name) else {
                continue;
            };
            let state = exit_state(instance.handle.await);
            self.outcomes.insert(name, state);
        }
    }

    fn state_of(&self, name: &str) -> PluginState {
        if let Some(instance) = self.instances.get(name) {
            if !instance.handle.is_finished() {
                return PluginState::Running;
            }
        }
        self.outcomes
            .get(name)
            .copied()
            .unwrap_or(PluginState::NeverStarted)
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        for (name, instance) in &self.instances {
            if !instance.handle.is_finished() {
                debug!(plugin = %name, "manager dropped; aborting plugin task");
                instance.plugin.stop();
                instance.handle.abort();
            }
        }
    }
}

/// Terminal state of a task that ended on its own.
fn exit_state(joined: std::result::Result<Result<()>, JoinError>) -> PluginState {
    match joined {
        Ok(Ok(())) => PluginState::Finished,
        Ok(Err(_)) | Err(_) => PluginState::Failed,
    }
}

fn past_tense(cmd: ControlCommand) -> &'static str {
    match cmd {
        ControlCommand::Start => "started",
        ControlCommand::Stop => "stopped",
        ControlCommand::Restart => "restarted",
        ControlCommand::List => "listed",
    }
}
