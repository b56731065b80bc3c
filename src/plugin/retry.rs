// src/plugin/retry.rs

//! Retry / backoff wrapper shared by every scheduling variant that wants
//! crash resilience.
//!
//! The delay before retry `n` (1-based) is `base_delay × 2^(n-1)`, clamped to
//! `max_delay`, then scaled by a uniform factor in `[1 - jitter, 1 + jitter]`.
//! The ideal value is derived from the attempt number alone, so jitter never
//! feeds back into later delays.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tracing::{error, info, warn};

use crate::errors::{PlugvisorError, Result};
use crate::plugin::{PluginContext, PluginDescriptor, StopSignal};

/// Backoff parameters for one plugin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries; `0` or negative means unbounded.
    pub max_attempts: i64,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for the un-jittered delay.
    pub max_delay: Duration,
    /// Relative jitter, `0.1` = ±10%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn is_bounded(&self) -> bool {
        self.max_attempts > 0
    }

    /// Un-jittered delay before retry `attempt` (1-based).
    pub fn ideal_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(exp);
        let max_secs = self.max_delay.as_secs_f64();

        if !secs.is_finite() || secs > max_secs {
            self.max_delay
        } else {
            Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
        }
    }

    /// Delay before retry `attempt` with uniform jitter applied.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let ideal = self.ideal_delay(attempt);
        if self.jitter <= 0.0 {
            return ideal;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        Duration::try_from_secs_f64(ideal.as_secs_f64() * factor.max(0.0))
            .unwrap_or(Duration::MAX)
    }
}

/// Per-instance attempt counter.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    attempts: u32,
}

impl RetryState {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Record a failure and return the delay before the next attempt, or
    /// `None` when the policy's attempt budget is exhausted.
    pub fn next_delay(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        if policy.is_bounded() && i64::from(self.attempts) >= policy.max_attempts {
            return None;
        }
        self.attempts = self.attempts.saturating_add(1);
        Some(policy.jittered_delay(self.attempts))
    }
}

/// Run `attempt` until it succeeds, the policy gives up, or `stop` is set.
///
/// - Success resets the counter and returns `Ok(())`.
/// - With `restart_on_failure = false` the first error is returned as-is.
/// - A stop observed after a failure (or during the backoff sleep) ends the
///   loop with `Ok(())`.
pub async fn run_with_retry<F, Fut>(
    descriptor: &PluginDescriptor,
    ctx: &PluginContext,
    stop: &StopSignal,
    mut attempt: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let name = descriptor.name.as_str();
    let policy = &descriptor.retry;
    let mut state = RetryState::default();

    loop {
        let err = match attempt().await {
            Ok(()) => {
                if state.attempts() > 0 {
                    info!(plugin = %name, retries = state.attempts(), "plugin recovered");
                }
                state.reset();
                return Ok(());
            }
            Err(err) => err,
        };

        let message = format!("{err:#}");
        error!(plugin = %name, retries = state.attempts(), error = %message, "plugin run failed");

        if !descriptor.restart_on_failure {
            return Err(PlugvisorError::runtime(name, err));
        }

        if stop.is_set() {
            info!(plugin = %name, "stop requested; not retrying");
            return Ok(());
        }

        let Some(delay) = state.next_delay(policy) else {
            warn!(
                plugin = %name,
                max_attempts = policy.max_attempts,
                "giving up after {} retries",
                state.attempts()
            );
            if let Some(endpoint) = descriptor.webhook.as_deref() {
                ctx.notifier.send(
                    endpoint,
                    json!({
                        "plugin": name,
                        "event": "gave_up",
                        "retries": state.attempts(),
                        "error": message,
                    }),
                );
            }
            return Err(PlugvisorError::runtime(name, err));
        };

        warn!(
            plugin = %name,
            attempt = state.attempts(),
            delay_ms = delay.as_millis() as u64,
            "retrying after backoff"
        );

        if stop.wait_timeout(delay).await {
            info!(plugin = %name, "stop requested during backoff");
            return Ok(());
        }
    }
}
