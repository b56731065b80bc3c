// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};

/// Command-line arguments for `plugvisor`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "plugvisor",
    version,
    about = "Schedule, supervise and remote-control plugins.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `$PLUGVISOR_CONFIG`, else `Plugvisor.toml` in the current
    /// working directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PLUGVISOR_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Control address for client commands; defaults to `[config].listen_addr`.
    #[arg(long, global = true, value_name = "HOST:PORT")]
    pub addr: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start every plugin, serve the control protocol, stop on Ctrl-C/SIGTERM.
    Run,
    /// Parse + validate the config and print the plugins, run nothing.
    Check,
    /// Start a registered plugin on a running manager.
    Start(StartArgs),
    /// Stop a plugin on a running manager.
    Stop {
        plugin: String,
    },
    /// Stop then start a plugin on a running manager.
    Restart(StartArgs),
    /// List plugins and their state.
    List,
    /// Host one plugin for a supervisor listening on `--connect`.
    Worker {
        #[arg(long, value_name = "HOST:PORT")]
        connect: String,
    },
}

#[derive(Debug, Clone, Args)]
pub struct StartArgs {
    pub plugin: String,

    /// Positional argument (repeatable). Parsed as JSON when possible.
    #[arg(long = "arg", value_name = "VALUE", value_parser = parse_value)]
    pub args: Vec<Value>,

    /// Keyword argument as KEY=VALUE (repeatable). VALUE is parsed as JSON
    /// when possible.
    #[arg(long = "kwarg", value_name = "KEY=VALUE", value_parser = parse_kwarg)]
    pub kwargs: Vec<(String, Value)>,

    /// Bypass the root-privilege check.
    #[arg(long)]
    pub force: bool,
}

impl StartArgs {
    pub fn kwargs_map(&self) -> Map<String, Value> {
        self.kwargs.iter().cloned().collect()
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_value(raw: &str) -> Result<Value, String> {
    Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}

fn parse_kwarg(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), parse_value(value)?))
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
