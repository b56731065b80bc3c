// src/lib.rs

pub mod cli;
pub mod config;
pub mod cron;
pub mod errors;
pub mod exec;
pub mod ipc;
pub mod logging;
pub mod manager;
pub mod notify;
pub mod plugin;
pub mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::cli::{CliArgs, Command, StartArgs};
use crate::config::{ConfigFile, DEFAULT_LISTEN_ADDR, default_config_path, load_and_validate};
use crate::errors::PlugvisorError;
use crate::ipc::control::{ControlRequest, ControlResponse, send_request};
use crate::manager::Manager;
use crate::plugin::{JobFactories, Plugin, PluginContext};

/// How long client commands wait for the manager when no config is at hand.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);

    match &args.command {
        Command::Run => {
            let cfg = load_and_validate(&config_path)?;
            info!(config = %config_path.display(), plugins = cfg.plugins.len(), "config loaded");
            Manager::from_config(&cfg, JobFactories::new())
                .run_forever()
                .await?;
            Ok(())
        }
        Command::Check => {
            let cfg = load_and_validate(&config_path)?;
            print_check(&config_path, &cfg)
        }
        Command::Start(start) => client(&args, &config_path, start_request(start, false)).await,
        Command::Restart(start) => client(&args, &config_path, start_request(start, true)).await,
        Command::Stop { plugin } => client(&args, &config_path, ControlRequest::stop(plugin)).await,
        Command::List => client(&args, &config_path, ControlRequest::list()).await,
        Command::Worker { connect } => {
            let cfg = load_and_validate(&config_path)?;
            run_worker(cfg, connect).await
        }
    }
}

fn start_request(start: &StartArgs, restart: bool) -> ControlRequest {
    let request = if restart {
        ControlRequest::restart(&start.plugin)
    } else {
        ControlRequest::start(&start.plugin)
    };
    request
        .args(start.args.clone())
        .kwargs(start.kwargs_map())
        .force(start.force)
}

/// Send one request to a running manager and print its response.
async fn client(args: &CliArgs, config_path: &Path, request: ControlRequest) -> Result<()> {
    // The config is optional for client commands; it only supplies defaults.
    let cfg = load_and_validate(config_path).ok();
    let addr = args
        .addr
        .clone()
        .or_else(|| cfg.as_ref().map(|c| c.manager.listen_addr.clone()))
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
    let timeout = cfg
        .as_ref()
        .map(|c| c.manager.recv_timeout)
        .unwrap_or(CLIENT_TIMEOUT);

    debug!(%addr, cmd = %request.cmd, "sending control request");
    let response = send_request(&addr, &request, timeout).await?;
    print_response(&response)?;

    if !response.is_ok() {
        bail!("{}", response.message);
    }
    Ok(())
}

fn print_response(response: &ControlResponse) -> Result<()> {
    if !response.message.is_empty() {
        println!("{}", response.message);
    }
    if !response.data.is_null() {
        println!("{}", serde_json::to_string_pretty(&response.data)?);
    }
    Ok(())
}

/// Connect to a supervisor and host whichever plugin it sets up.
async fn run_worker(cfg: ConfigFile, connect: &str) -> Result<()> {
    let stream = tokio::net::TcpStream::connect(connect).await?;
    info!(supervisor = %connect, "worker connected");
    let (reader, writer) = stream.into_split();

    let stop_timeout = cfg.manager.stop_timeout;
    let ctx = PluginContext::new(Arc::new(cfg.manager.clone()));
    let factories = JobFactories::new();

    let build = move |name: &str,
                      args: Vec<Value>,
                      kwargs: Map<String, Value>|
          -> errors::Result<Arc<dyn Plugin>> {
        let section = cfg
            .plugins
            .get(name)
            .ok_or_else(|| PlugvisorError::PluginNotFound(name.to_string()))?;
        let args = Some(args).filter(|a| !a.is_empty());
        let kwargs = Some(kwargs).filter(|k| !k.is_empty());
        let descriptor = section
            .to_descriptor(name, &cfg.manager)?
            .with_overrides(args, kwargs);
        factories.construct(&ctx, &descriptor)
    };

    ipc::serve_worker(reader, writer, build, stop_timeout).await?;
    Ok(())
}

/// `check` output: manager settings and one line per plugin.
fn print_check(config_path: &Path, cfg: &ConfigFile) -> Result<()> {
    let m = &cfg.manager;
    println!("plugvisor check: {}", config_path.display());
    println!("  config.listen_addr = {}", m.listen_addr);
    println!("  config.stop_timeout = {:?}", m.stop_timeout);
    println!("  config.one_time_timeout = {:?}", m.one_time_timeout);
    println!("  config.recv_timeout = {:?}", m.recv_timeout);
    println!(
        "  config.retry = max_attempts {} base {:?} max {:?}",
        m.retry.max_attempts, m.retry.base_delay, m.retry.max_delay
    );
    println!();

    let mut invalid = 0;
    println!("plugins ({}):", cfg.plugins.len());
    for (name, descriptor) in cfg.descriptors() {
        match descriptor {
            Ok(d) => {
                println!("  - {name} [{}]", d.kind());
                println!("      implementation: {}", d.implementation);
                if d.requires_root {
                    println!("      requires_root: true");
                }
                if !d.restart_on_failure {
                    println!("      restart_on_failure: false");
                }
                match &d.schedule {
                    plugin::Schedule::Interval { every } => println!("      every: {every:?}"),
                    plugin::Schedule::Cron {
                        expression,
                        run_on_startup,
                    } => {
                        println!("      cron: {expression}");
                        if *run_on_startup {
                            println!("      run_on_startup: true");
                        }
                    }
                    plugin::Schedule::Process(spec) => {
                        println!("      command: {} {}", spec.program, spec.args.join(" "));
                    }
                    plugin::Schedule::OneTime | plugin::Schedule::Daemon => {}
                }
            }
            Err(e) => {
                invalid += 1;
                println!("  - {name} INVALID: {e}");
            }
        }
    }

    debug!("check complete (no execution)");
    if invalid > 0 {
        bail!("{invalid} plugin section(s) are invalid");
    }
    Ok(())
}
