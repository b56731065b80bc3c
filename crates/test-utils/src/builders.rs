#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use plugvisor::config::{ConfigFile, ConfigSection, ManagerConfig, PluginSection, RawConfigFile};
use plugvisor::cron::CronExpression;
use plugvisor::plugin::{PluginContext, PluginDescriptor, RetryPolicy, Schedule};
use serde_json::Value;

/// Manager settings with every timeout shrunk to test scale.
pub fn fast_config() -> ManagerConfig {
    ManagerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        stop_timeout: Duration::from_millis(500),
        one_time_timeout: Duration::from_millis(200),
        recv_timeout: Duration::from_secs(2),
        cron_error_delay: Duration::from_millis(50),
        process_poll: Duration::from_millis(20),
        process_grace: Duration::from_millis(500),
        retry: fast_retry(0),
    }
}

/// Retry policy with millisecond delays.
pub fn fast_retry(max_attempts: i64) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        jitter: 0.1,
    }
}

pub fn test_context() -> PluginContext {
    PluginContext::new(Arc::new(fast_config()))
}

/// Builder for `PluginDescriptor`; starts from fast retry settings.
pub struct DescriptorBuilder {
    descriptor: PluginDescriptor,
}

impl DescriptorBuilder {
    pub fn new(name: &str, schedule: Schedule) -> Self {
        let mut descriptor = PluginDescriptor::new(name, schedule);
        descriptor.retry = fast_retry(0);
        Self { descriptor }
    }

    pub fn one_time(name: &str) -> Self {
        Self::new(name, Schedule::OneTime)
    }

    pub fn daemon(name: &str) -> Self {
        Self::new(name, Schedule::Daemon)
    }

    pub fn interval(name: &str, every: Duration) -> Self {
        Self::new(name, Schedule::Interval { every })
    }

    pub fn cron(name: &str, expression: &str, run_on_startup: bool) -> Self {
        let expression = CronExpression::parse(expression).expect("valid cron expression");
        Self::new(
            name,
            Schedule::Cron {
                expression,
                run_on_startup,
            },
        )
    }

    pub fn implementation(mut self, name: &str) -> Self {
        self.descriptor.implementation = name.to_string();
        self
    }

    pub fn requires_root(mut self, val: bool) -> Self {
        self.descriptor.requires_root = val;
        self
    }

    pub fn restart_on_failure(mut self, val: bool) -> Self {
        self.descriptor.restart_on_failure = val;
        self
    }

    pub fn max_attempts(mut self, n: i64) -> Self {
        self.descriptor.retry.max_attempts = n;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.descriptor.retry = policy;
        self
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.descriptor.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.descriptor.kwargs.insert(key.to_string(), value.into());
        self
    }

    pub fn webhook(mut self, endpoint: &str) -> Self {
        self.descriptor.webhook = Some(endpoint.to_string());
        self
    }

    pub fn build(self) -> PluginDescriptor {
        self.descriptor
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                plugin: BTreeMap::new(),
            },
        }
    }

    pub fn with_plugin(mut self, name: &str, section: PluginSection) -> Self {
        self.config.plugin.insert(name.to_string(), section);
        self
    }

    pub fn with_listen_addr(mut self, addr: &str) -> Self {
        self.config.config.listen_addr = addr.to_string();
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `PluginSection` for an interval plugin running `cmd`.
pub fn interval_section(every: &str, cmd: &str) -> PluginSection {
    let mut section = PluginSection::new("interval");
    section.every = Some(every.into());
    section.kwargs.insert("cmd".to_string(), Value::from(cmd));
    section
}
