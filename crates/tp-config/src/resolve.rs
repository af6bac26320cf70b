//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths → defaults.

use crate::CONFIG_FILENAME;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Where the configuration was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Direct path to the config file.
pub const ENV_CONFIG_PATH: &str = "TP_CONFIG";
/// Directory containing supervisor.json.
pub const ENV_CONFIG_DIR: &str = "TP_CONFIG_DIR";

/// Application name for XDG directories.
const APP_NAME: &str = "telemetry-pipeline";

/// Resolve the configuration file from the process environment.
///
/// Explicit locations (CLI argument, `TP_CONFIG`) are returned even when the
/// file does not exist so the loader can report it; discovered locations are
/// returned only when present.
pub fn resolve_config_path(cli_path: Option<&Path>) -> (Option<PathBuf>, ConfigSource) {
    resolve_config_path_with(cli_path, |key| std::env::var(key).ok(), xdg_config_dir())
}

/// Resolution with injectable environment lookup and XDG directory.
pub fn resolve_config_path_with<F>(
    cli_path: Option<&Path>,
    env: F,
    xdg_dir: Option<PathBuf>,
) -> (Option<PathBuf>, ConfigSource)
where
    F: Fn(&str) -> Option<String>,
{
    // 1. CLI argument
    if let Some(path) = cli_path {
        return (Some(path.to_path_buf()), ConfigSource::CliArgument);
    }

    // 2. Environment variable (direct path)
    if let Some(path) = env(ENV_CONFIG_PATH).filter(|p| !p.is_empty()) {
        return (Some(PathBuf::from(path)), ConfigSource::Environment);
    }

    // 3. Environment variable (config dir)
    if let Some(dir) = env(ENV_CONFIG_DIR).filter(|p| !p.is_empty()) {
        let path = PathBuf::from(dir).join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    // 4. XDG config directory
    if let Some(dir) = xdg_dir {
        let path = dir.join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::XdgConfig);
        }
    }

    // 5. Built-in defaults
    (None, ConfigSource::BuiltinDefault)
}

/// Get the XDG config directory for the pipeline.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}
