// src/plugin/descriptor.rs

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::cron::CronExpression;
use crate::plugin::retry::RetryPolicy;
use crate::types::ScheduleKind;

/// Name of the job implementation used when a descriptor does not name one.
pub const DEFAULT_IMPLEMENTATION: &str = "command";

/// How (and how often) a plugin's work is invoked.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    OneTime,
    Daemon,
    Interval {
        every: Duration,
    },
    Cron {
        expression: CronExpression,
        run_on_startup: bool,
    },
    Process(ProcessSpec),
}

impl Schedule {
    pub fn kind(&self) -> ScheduleKind {
        match self {
            Schedule::OneTime => ScheduleKind::OneTime,
            Schedule::Daemon => ScheduleKind::Daemon,
            Schedule::Interval { .. } => ScheduleKind::Interval,
            Schedule::Cron { .. } => ScheduleKind::Cron,
            Schedule::Process(_) => ScheduleKind::Process,
        }
    }
}

/// Command line of an externally supervised child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Overrides the manager-wide terminate → kill grace period.
    pub grace: Option<Duration>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            grace: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }
}

/// Immutable registration record for one plugin.
///
/// Built once (from config or code) and owned by the manager's registry.
/// Starting a plugin with different arguments goes through
/// [`PluginDescriptor::with_overrides`], which returns a modified copy.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginDescriptor {
    pub name: String,
    /// Job factory name, see [`crate::plugin::factory::JobFactories`].
    pub implementation: String,
    pub requires_root: bool,
    pub restart_on_failure: bool,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub webhook: Option<String>,
    pub schedule: Schedule,
    pub retry: RetryPolicy,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            name: name.into(),
            implementation: DEFAULT_IMPLEMENTATION.to_string(),
            requires_root: false,
            restart_on_failure: true,
            args: Vec::new(),
            kwargs: Map::new(),
            webhook: None,
            schedule,
            retry: RetryPolicy::default(),
        }
    }

    pub fn kind(&self) -> ScheduleKind {
        self.schedule.kind()
    }

    pub fn kwarg_str(&self, key: &str) -> Option<&str> {
        self.kwargs.get(key).and_then(Value::as_str)
    }

    /// Copy of this descriptor with positional and/or keyword arguments
    /// replaced. `None` keeps the registered values.
    pub fn with_overrides(
        &self,
        args: Option<Vec<Value>>,
        kwargs: Option<Map<String, Value>>,
    ) -> Self {
        let mut copy = self.clone();
        if let Some(args) = args {
            copy.args = args;
        }
        if let Some(kwargs) = kwargs {
            copy.kwargs = kwargs;
        }
        copy
    }
}
