// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::plugin::RetryPolicy;
use crate::types::DurationValue;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// listen_addr = "127.0.0.1:7421"
/// stop_timeout = "5s"
///
/// [plugin.heartbeat]
/// kind = "interval"
/// every = "30s"
/// kwargs = { cmd = "echo alive" }
///
/// [plugin.nightly]
/// kind = "cron"
/// cron = "0 3 * * *"
/// args = ["./backup.sh"]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    /// Manager-wide settings from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Plugin definitions from `[plugin.<name>]`.
    #[serde(default)]
    pub plugin: BTreeMap<String, PluginSection>,
}

/// Validated configuration.
///
/// The `[config]` section has been turned into a [`ManagerConfig`]. Plugin
/// sections are kept raw: each is converted into a descriptor at
/// registration time so that one bad plugin does not block the others.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub manager: ManagerConfig,
    pub plugins: BTreeMap<String, PluginSection>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        manager: ManagerConfig,
        plugins: BTreeMap<String, PluginSection>,
    ) -> Self {
        Self { manager, plugins }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// TCP address of the control protocol listener.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// How long to wait for a long-running plugin to stop before forcing it.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: DurationValue,

    /// How long to wait for a one-time plugin before force-stopping it.
    #[serde(default = "default_stop_timeout")]
    pub one_time_timeout: DurationValue,

    /// Receive timeout for control connections.
    #[serde(default = "default_recv_timeout")]
    pub recv_timeout: DurationValue,

    /// Pause after a failing cron run.
    #[serde(default = "default_cron_error_delay")]
    pub cron_error_delay: DurationValue,

    /// Exit-poll period for supervised processes.
    #[serde(default = "default_process_poll")]
    pub process_poll: DurationValue,

    /// Terminate → kill grace period for supervised processes.
    #[serde(default = "default_process_grace")]
    pub process_grace: DurationValue,

    /// Default retry budget; `0` or negative = unbounded.
    #[serde(default)]
    pub max_attempts: i64,

    #[serde(default = "default_base_delay")]
    pub base_delay: DurationValue,

    #[serde(default = "default_max_delay")]
    pub max_delay: DurationValue,
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            stop_timeout: default_stop_timeout(),
            one_time_timeout: default_stop_timeout(),
            recv_timeout: default_recv_timeout(),
            cron_error_delay: default_cron_error_delay(),
            process_poll: default_process_poll(),
            process_grace: default_process_grace(),
            max_attempts: 0,
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7421";

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_stop_timeout() -> DurationValue {
    DurationValue::Seconds(5)
}

fn default_recv_timeout() -> DurationValue {
    DurationValue::Seconds(30)
}

fn default_cron_error_delay() -> DurationValue {
    DurationValue::Seconds(60)
}

fn default_process_poll() -> DurationValue {
    "500ms".into()
}

fn default_process_grace() -> DurationValue {
    DurationValue::Seconds(10)
}

fn default_base_delay() -> DurationValue {
    DurationValue::Seconds(1)
}

fn default_max_delay() -> DurationValue {
    DurationValue::Seconds(300)
}

/// `[plugin.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginSection {
    /// `one_time`, `daemon`, `interval`, `cron` or `process`.
    pub kind: String,

    /// Job factory name; defaults to `command`.
    #[serde(default)]
    pub implementation: Option<String>,

    #[serde(default)]
    pub requires_root: bool,

    #[serde(default = "default_true")]
    pub restart_on_failure: bool,

    #[serde(default)]
    pub args: Vec<Value>,

    #[serde(default)]
    pub kwargs: Map<String, Value>,

    #[serde(default)]
    pub webhook: Option<String>,

    /// Interval plugins: pause between runs.
    #[serde(default)]
    pub every: Option<DurationValue>,

    /// Cron plugins: five-field expression.
    #[serde(default)]
    pub cron: Option<String>,

    /// Cron plugins: run once immediately on start.
    #[serde(default)]
    pub run_on_startup: bool,

    /// Process plugins: program followed by its arguments.
    #[serde(default)]
    pub command: Option<Vec<String>>,

    /// Process plugins: working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Process plugins: terminate → kill grace period.
    #[serde(default)]
    pub grace: Option<DurationValue>,

    #[serde(default)]
    pub max_attempts: Option<i64>,

    #[serde(default)]
    pub base_delay: Option<DurationValue>,

    #[serde(default)]
    pub max_delay: Option<DurationValue>,
}

impl PluginSection {
    /// A section of the given kind with every optional field unset.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            implementation: None,
            requires_root: false,
            restart_on_failure: true,
            args: Vec::new(),
            kwargs: Map::new(),
            webhook: None,
            every: None,
            cron: None,
            run_on_startup: false,
            command: None,
            cwd: None,
            grace: None,
            max_attempts: None,
            base_delay: None,
            max_delay: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Manager-wide settings, built once at startup and shared by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub listen_addr: String,
    pub stop_timeout: Duration,
    pub one_time_timeout: Duration,
    pub recv_timeout: Duration,
    pub cron_error_delay: Duration,
    pub process_poll: Duration,
    pub process_grace: Duration,
    /// Default retry policy; plugins may override individual fields.
    pub retry: RetryPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            stop_timeout: Duration::from_secs(5),
            one_time_timeout: Duration::from_secs(5),
            recv_timeout: Duration::from_secs(30),
            cron_error_delay: Duration::from_secs(60),
            process_poll: Duration::from_millis(500),
            process_grace: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}
