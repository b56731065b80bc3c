// src/config/validate.rs

use std::net::SocketAddr;
use std::time::Duration;

use chrono::Local;

use crate::config::model::{ConfigFile, ConfigSection, ManagerConfig, PluginSection, RawConfigFile};
use crate::cron::CronExpression;
use crate::errors::{PlugvisorError, Result};
use crate::plugin::{
    DEFAULT_IMPLEMENTATION, PluginDescriptor, ProcessSpec, RetryPolicy, Schedule,
};
use crate::types::{DurationValue, ScheduleKind};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = PlugvisorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let manager = ManagerConfig::try_from(&raw.config)?;
        Ok(ConfigFile::new_unchecked(manager, raw.plugin))
    }
}

impl TryFrom<&ConfigSection> for ManagerConfig {
    type Error = PlugvisorError;

    fn try_from(cfg: &ConfigSection) -> std::result::Result<Self, Self::Error> {
        cfg.listen_addr.parse::<SocketAddr>().map_err(|e| {
            config_error(format!(
                "[config].listen_addr '{}' is not a socket address: {}",
                cfg.listen_addr, e
            ))
        })?;

        let retry = RetryPolicy {
            max_attempts: cfg.max_attempts,
            base_delay: duration("[config].base_delay", &cfg.base_delay)?,
            max_delay: duration("[config].max_delay", &cfg.max_delay)?,
            ..RetryPolicy::default()
        };
        validate_retry("[config]", &retry)?;

        Ok(ManagerConfig {
            listen_addr: cfg.listen_addr.clone(),
            stop_timeout: positive("[config].stop_timeout", &cfg.stop_timeout)?,
            one_time_timeout: positive("[config].one_time_timeout", &cfg.one_time_timeout)?,
            recv_timeout: positive("[config].recv_timeout", &cfg.recv_timeout)?,
            cron_error_delay: duration("[config].cron_error_delay", &cfg.cron_error_delay)?,
            process_poll: positive("[config].process_poll", &cfg.process_poll)?,
            process_grace: duration("[config].process_grace", &cfg.process_grace)?,
            retry,
        })
    }
}

impl ConfigFile {
    /// Convert every plugin section into a descriptor, keeping failures
    /// per plugin so the caller can skip the bad ones.
    pub fn descriptors(&self) -> Vec<(String, Result<PluginDescriptor>)> {
        self.plugins
            .iter()
            .map(|(name, section)| (name.clone(), section.to_descriptor(name, &self.manager)))
            .collect()
    }
}

impl PluginSection {
    /// Validate this section and build the plugin's descriptor.
    ///
    /// Retry fields not set here fall back to `defaults.retry`.
    pub fn to_descriptor(&self, name: &str, defaults: &ManagerConfig) -> Result<PluginDescriptor> {
        if name.trim().is_empty() || name.chars().any(char::is_whitespace) {
            return Err(config_error(format!(
                "plugin name '{}' must be non-empty and contain no whitespace",
                name
            )));
        }

        let kind: ScheduleKind = self
            .kind
            .parse()
            .map_err(|e| config_error(format!("plugin '{}': {}", name, e)))?;

        let schedule = match kind {
            ScheduleKind::OneTime => Schedule::OneTime,
            ScheduleKind::Daemon => Schedule::Daemon,
            ScheduleKind::Interval => {
                let every = self.every.as_ref().ok_or_else(|| {
                    config_error(format!("interval plugin '{}' requires `every`", name))
                })?;
                Schedule::Interval {
                    every: positive(&format!("plugin '{}' every", name), every)?,
                }
            }
            ScheduleKind::Cron => {
                let expr = self.cron.as_deref().ok_or_else(|| {
                    config_error(format!("cron plugin '{}' requires `cron`", name))
                })?;
                let expression = CronExpression::parse(expr)
                    .map_err(|e| config_error(format!("plugin '{}': {}", name, e)))?;
                // Reject expressions that parse but can never fire (`0 0 30 2 *`).
                expression
                    .next(Local::now().naive_local())
                    .map_err(|e| config_error(format!("plugin '{}': {}", name, e)))?;
                Schedule::Cron {
                    expression,
                    run_on_startup: self.run_on_startup,
                }
            }
            ScheduleKind::Process => Schedule::Process(self.process_spec(name)?),
        };

        let retry = RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.retry.max_attempts),
            base_delay: match &self.base_delay {
                Some(v) => duration(&format!("plugin '{}' base_delay", name), v)?,
                None => defaults.retry.base_delay,
            },
            max_delay: match &self.max_delay {
                Some(v) => duration(&format!("plugin '{}' max_delay", name), v)?,
                None => defaults.retry.max_delay,
            },
            jitter: defaults.retry.jitter,
        };
        validate_retry(&format!("plugin '{}'", name), &retry)?;

        Ok(PluginDescriptor {
            name: name.to_string(),
            implementation: self
                .implementation
                .clone()
                .unwrap_or_else(|| DEFAULT_IMPLEMENTATION.to_string()),
            requires_root: self.requires_root,
            restart_on_failure: self.restart_on_failure,
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            webhook: self.webhook.clone(),
            schedule,
            retry,
        })
    }

    fn process_spec(&self, name: &str) -> Result<ProcessSpec> {
        let command = self.command.as_deref().unwrap_or_default();
        let Some((program, args)) = command.split_first() else {
            return Err(config_error(format!(
                "process plugin '{}' requires a non-empty `command`",
                name
            )));
        };

        let mut spec = ProcessSpec::new(program.clone());
        spec.args = args.to_vec();
        spec.cwd = self.cwd.clone();
        if let Some(grace) = &self.grace {
            spec.grace = Some(duration(&format!("plugin '{}' grace", name), grace)?);
        }
        Ok(spec)
    }
}

fn validate_retry(scope: &str, retry: &RetryPolicy) -> Result<()> {
    if retry.base_delay.is_zero() {
        return Err(config_error(format!("{} base_delay must be > 0", scope)));
    }
    if retry.base_delay > retry.max_delay {
        return Err(config_error(format!(
            "{} base_delay ({:?}) must not exceed max_delay ({:?})",
            scope, retry.base_delay, retry.max_delay
        )));
    }
    Ok(())
}

fn duration(field: &str, value: &DurationValue) -> Result<Duration> {
    value
        .to_duration()
        .map_err(|e| config_error(format!("{}: {}", field, e)))
}

fn positive(field: &str, value: &DurationValue) -> Result<Duration> {
    let d = duration(field, value)?;
    if d.is_zero() {
        return Err(config_error(format!("{} must be > 0", field)));
    }
    Ok(d)
}

fn config_error(msg: String) -> PlugvisorError {
    PlugvisorError::ConfigError(msg)
}
