pub mod auth_cmd;
pub mod completions;
pub mod config;
pub mod pull;
pub mod push;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use brewsync_core::config::BridgeConfig;
use brewsync_core::{Bootstrap, ErrorReporter};

use crate::auth::SessionStore;
use crate::config::load_config;
use crate::error::CliError;

/// Global options shared by every command.
pub struct CommandContext {
    pub config_path: PathBuf,
    pub profile: String,
}

impl CommandContext {
    pub fn load_config(&self) -> Result<BridgeConfig, CliError> {
        load_config(&self.config_path)
    }

    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(&self.profile)
    }

    /// Session manager and store for the effective config.
    pub fn bootstrap(&self, reporter: ErrorReporter) -> Result<Bootstrap, CliError> {
        let config = self.load_config()?;
        Ok(Bootstrap::from_config(
            config,
            Arc::new(self.session_store()),
            reporter,
        )?)
    }
}
