//! Config file location and loading for the CLI.

use std::path::{Path, PathBuf};

use brewsync_core::config::BridgeConfig;

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";
const APP_DIR_NAME: &str = "brewsync";

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or_else(|| CliError::Config("Failed to resolve config directory".to_string()))
}

pub fn default_data_dir() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| CliError::Config("Failed to resolve data directory".to_string()))
}

pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf, CliError> {
    explicit.map_or_else(default_config_path, |path| Ok(path.to_path_buf()))
}

/// Load the config file (defaults when missing), then apply environment
/// overrides and the default data directory.
pub fn load_config(path: &Path) -> Result<BridgeConfig, CliError> {
    load_config_with(path, |key| std::env::var(key).ok(), default_data_dir()?)
}

pub fn load_config_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
    data_dir: PathBuf,
) -> Result<BridgeConfig, CliError> {
    let mut config = BridgeConfig::load_from_path(path)?;
    config.apply_env_overrides(lookup)?;
    config.store.set_default_data_dir(data_dir);
    Ok(config)
}
