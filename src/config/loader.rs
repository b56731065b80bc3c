// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_raw(&contents)
}

/// Parse TOML text into a `RawConfigFile`.
pub fn parse_raw(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a configuration file from path and validate the `[config]` section.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Turns `[config]` into a [`crate::config::ManagerConfig`], failing on
///   bad durations, addresses or retry bounds.
///
/// Plugin sections are validated later, one by one, when they are registered.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    ConfigFile::try_from(raw_config)
}

/// Same as [`load_and_validate`] for in-memory TOML.
pub fn parse_and_validate(contents: &str) -> Result<ConfigFile> {
    ConfigFile::try_from(parse_raw(contents)?)
}

/// Default config path: `Plugvisor.toml`, or `$PLUGVISOR_CONFIG` when set.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("PLUGVISOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("Plugvisor.toml"))
}
