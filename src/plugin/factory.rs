// src/plugin/factory.rs

//! Registry of job constructors, keyed by a descriptor's `implementation`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;

use crate::errors::{PlugvisorError, Result};
use crate::exec::CommandJob;
use crate::plugin::variants::{ProcessPlugin, build_plugin};
use crate::plugin::{Job, Plugin, PluginContext, PluginDescriptor, Schedule};

pub type JobConstructor =
    Arc<dyn Fn(&PluginContext, &PluginDescriptor) -> anyhow::Result<Arc<dyn Job>> + Send + Sync>;

/// Maps implementation names to job constructors.
///
/// [`JobFactories::new`] pre-registers the built-in `command` job.
#[derive(Clone)]
pub struct JobFactories {
    constructors: BTreeMap<String, JobConstructor>,
}

impl JobFactories {
    pub fn new() -> Self {
        let mut factories = Self::empty();
        factories.register("command", |_ctx, descriptor| {
            let job: Arc<dyn Job> = Arc::new(CommandJob::from_descriptor(descriptor)?);
            Ok(job)
        });
        factories
    }

    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&PluginContext, &PluginDescriptor) -> anyhow::Result<Arc<dyn Job>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Build a live plugin instance for `descriptor`.
    ///
    /// Unknown implementations and constructor errors surface as
    /// [`PlugvisorError::PluginConstruction`].
    pub fn construct(
        &self,
        ctx: &PluginContext,
        descriptor: &PluginDescriptor,
    ) -> Result<Arc<dyn Plugin>> {
        if let Schedule::Process(spec) = &descriptor.schedule {
            return Ok(Arc::new(ProcessPlugin::new(
                descriptor.clone(),
                ctx.clone(),
                spec.clone(),
            )));
        }

        let construction_error = |source: anyhow::Error| PlugvisorError::PluginConstruction {
            name: descriptor.name.clone(),
            source,
        };

        let constructor = self.constructors.get(&descriptor.implementation).ok_or_else(|| {
            construction_error(anyhow!(
                "unknown implementation '{}'",
                descriptor.implementation
            ))
        })?;

        let job = constructor(ctx, descriptor).map_err(construction_error)?;
        Ok(build_plugin(ctx, descriptor.clone(), job))
    }
}

impl Default for JobFactories {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JobFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFactories")
            .field("implementations", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
