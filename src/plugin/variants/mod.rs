// src/plugin/variants/mod.rs

//! Scheduling variants of the plugin contract.

pub mod cron;
pub mod daemon;
pub mod interval;
pub mod one_time;
pub mod process;

use std::sync::Arc;

use crate::plugin::{Job, Plugin, PluginContext, PluginDescriptor, Schedule};

pub use cron::CronPlugin;
pub use daemon::DaemonPlugin;
pub use interval::IntervalPlugin;
pub use one_time::OneTimePlugin;
pub use process::ProcessPlugin;

/// Wrap `job` in the variant selected by the descriptor's schedule.
///
/// `Schedule::Process` ignores `job`: the supervised child is the work.
pub fn build_plugin(
    ctx: &PluginContext,
    descriptor: PluginDescriptor,
    job: Arc<dyn Job>,
) -> Arc<dyn Plugin> {
    let ctx = ctx.clone();
    match descriptor.schedule.clone() {
        Schedule::OneTime => Arc::new(OneTimePlugin::new(descriptor, ctx, job)),
        Schedule::Daemon => Arc::new(DaemonPlugin::new(descriptor, ctx, job)),
        Schedule::Interval { every } => {
            Arc::new(IntervalPlugin::new(descriptor, ctx, job, every))
        }
        Schedule::Cron {
            expression,
            run_on_startup,
        } => Arc::new(CronPlugin::new(
            descriptor,
            ctx,
            job,
            expression,
            run_on_startup,
        )),
        Schedule::Process(spec) => Arc::new(ProcessPlugin::new(descriptor, ctx, spec)),
    }
}
