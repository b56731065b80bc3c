// src/config/mod.rs

//! Configuration loading and validation for plugvisor.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate the manager settings and turn plugin sections into
//!   descriptors (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_and_validate};
pub use model::{
    ConfigFile, ConfigSection, DEFAULT_LISTEN_ADDR, ManagerConfig, PluginSection, RawConfigFile,
};
