use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduling discipline a plugin runs under.
///
/// - `OneTime`: run once in its own task; can be force-killed.
/// - `Daemon`: run once, expected to block until stopped.
/// - `Interval`: re-run after a fixed pause.
/// - `Cron`: re-run whenever a cron expression matches.
/// - `Process`: launch and supervise an external child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    OneTime,
    Daemon,
    Interval,
    Cron,
    Process,
}

impl ScheduleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleKind::OneTime => "one_time",
            ScheduleKind::Daemon => "daemon",
            ScheduleKind::Interval => "interval",
            ScheduleKind::Cron => "cron",
            ScheduleKind::Process => "process",
        }
    }

    /// Kinds that are expected to keep running until asked to stop.
    pub fn is_long_running(self) -> bool {
        !matches!(self, ScheduleKind::OneTime)
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "one_time" | "onetime" | "once" => Ok(ScheduleKind::OneTime),
            "daemon" => Ok(ScheduleKind::Daemon),
            "interval" => Ok(ScheduleKind::Interval),
            "cron" => Ok(ScheduleKind::Cron),
            "process" | "external_process" => Ok(ScheduleKind::Process),
            other => Err(format!(
                "invalid plugin kind: {other} (expected one_time, daemon, interval, cron or process)"
            )),
        }
    }
}

/// Observable state of a registered plugin, as reported by `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    NeverStarted,
    Running,
    Stopped,
    Finished,
    Failed,
}

/// Terminal state of a one-time run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OneTimeState {
    Pending,
    Running,
    Completed,
    Failed,
    Killed,
}

/// Duration as written in config files: a bare integer of seconds, or a
/// string such as `"250ms"`, `"3s"`, `"1m"`, `"2h"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub fn to_duration(&self) -> Result<Duration, String> {
        match self {
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(s) => parse_duration(s),
        }
    }
}

impl From<&str> for DurationValue {
    fn from(s: &str) -> Self {
        DurationValue::Text(s.to_string())
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => scaled_secs(value, 60),
        "h" => scaled_secs(value, 60 * 60),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

fn scaled_secs(value: u64, unit_secs: u64) -> Result<Duration, String> {
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration {} x {}s is too large", value, unit_secs))
}
