// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`command`] holds the built-in `command` job, which runs a shell command
//!   per invocation using `tokio::process::Command`.
//! - [`process`] holds the spawn / terminate / kill helpers used by the
//!   supervised-process variant.

pub mod command;
pub mod process;

pub use command::CommandJob;
pub use process::running_as_root;
