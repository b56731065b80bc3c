// src/plugin/variants/cron.rs

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tracing::{debug, error, info};

use crate::cron::{CronExpression, truncate_to_minute};
use crate::errors::Result;
use crate::plugin::{BoxFuture, Job, Plugin, PluginContext, PluginDescriptor, StopSignal, lock};

/// Runs its job whenever a cron expression matches.
///
/// - With `run_on_startup`, the job runs once as soon as the loop starts,
///   regardless of the schedule.
/// - Each whole-minute bucket fires at most once.
/// - A failing run is logged and followed by a cancellable pause
///   (`cron_error_delay`); the schedule itself keeps going.
///
/// Wall-clock time comes from a [`WallClock`], local time by default.
pub struct CronPlugin {
    descriptor: PluginDescriptor,
    ctx: PluginContext,
    job: Arc<dyn Job>,
    expression: CronExpression,
    run_on_startup: bool,
    stop: StopSignal,
    last_fired: Mutex<Option<NaiveDateTime>>,
    clock: WallClock,
}

/// Source of "now" for cron matching.
pub type WallClock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

fn local_clock() -> WallClock {
    Arc::new(|| Local::now().naive_local())
}

impl CronPlugin {
    pub fn new(
        descriptor: PluginDescriptor,
        ctx: PluginContext,
        job: Arc<dyn Job>,
        expression: CronExpression,
        run_on_startup: bool,
    ) -> Self {
        Self {
            descriptor,
            ctx,
            job,
            expression,
            run_on_startup,
            stop: StopSignal::new(),
            last_fired: Mutex::new(None),
            clock: local_clock(),
        }
    }

    /// Replace the wall clock used to compute and claim cron slots.
    pub fn with_clock(mut self, clock: WallClock) -> Self {
        self.clock = clock;
        self
    }

    /// Whole-minute bucket of the most recent scheduled run.
    pub fn last_fired(&self) -> Option<NaiveDateTime> {
        *lock(&self.last_fired)
    }

    /// Run the job once. Returns `false` if the stop signal fired during the
    /// post-failure pause.
    async fn invoke(&self) -> bool {
        let name = self.descriptor.name.as_str();
        match self.job.run(self.stop.clone()).await {
            Ok(()) => true,
            Err(err) => {
                let delay = self.ctx.config.cron_error_delay;
                let message = format!("{err:#}");
                error!(
                    plugin = %name,
                    error = %message,
                    delay_ms = delay.as_millis() as u64,
                    "cron run failed; pausing before resuming schedule"
                );
                !self.stop.wait_timeout(delay).await
            }
        }
    }

    /// Claim the bucket for `now` if it matches and has not fired yet.
    fn claim_bucket(&self, now: NaiveDateTime) -> bool {
        let bucket = truncate_to_minute(now);
        if !self.expression.matches(bucket) {
            return false;
        }
        let mut last = lock(&self.last_fired);
        if *last == Some(bucket) {
            return false;
        }
        *last = Some(bucket);
        true
    }
}

impl Plugin for CronPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn start(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let name = self.descriptor.name.as_str();
            info!(plugin = %name, cron = %self.expression, "cron loop started");

            if self.run_on_startup && !self.stop.is_set() {
                info!(plugin = %name, "running once at startup");
                if !self.invoke().await {
                    return Ok(());
                }
            }

            while !self.stop.is_set() {
                let now = (self.clock)();
                let next = self.expression.next(now)?;
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                debug!(plugin = %name, %next, wait_ms = wait.as_millis() as u64, "waiting for next cron slot");

                if self.stop.wait_timeout(wait).await {
                    break;
                }

                if !self.claim_bucket((self.clock)()) {
                    debug!(plugin = %name, "woke outside a pending cron slot; recomputing");
                    continue;
                }

                if !self.invoke().await {
                    break;
                }
            }

            info!(plugin = %name, "cron loop stopped");
            Ok(())
        })
    }

    fn stop(&self) {
        if self.stop.set() {
            info!(plugin = %self.descriptor.name, "stop requested");
        }
    }
}
