//! Bridge configuration.
//!
//! Selects the remote store variant, the auth backend and the remote-call
//! policy (timeout, write retry) once at startup. Stored as JSON by the CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{normalize_base_url, normalize_text_option};
use crate::{Error, Result};

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_REST_TABLE: &str = "collections";

const ENV_SIGN_IN_EMAIL: &str = "BREWSYNC_SIGN_IN_EMAIL";
const ENV_REQUEST_TIMEOUT_SECS: &str = "BREWSYNC_REQUEST_TIMEOUT_SECS";
const ENV_DATA_DIR: &str = "BREWSYNC_DATA_DIR";
const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
const ENV_SUPABASE_ANON_KEY: &str = "SUPABASE_ANON_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            auth: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            retry: RetryPolicy::None,
        }
    }
}

/// Which remote store variant backs the collections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// On-device files only; subscriptions never fire.
    Local {
        #[serde(default)]
        data_dir: Option<PathBuf>,
    },
    /// Request/response store (PostgREST table); changes are polled.
    Rest {
        url: String,
        anon_key: String,
        #[serde(default = "default_rest_table")]
        table: String,
        #[serde(default = "default_poll_interval_ms")]
        poll_interval_ms: u64,
    },
    /// Push-capable store with a server-sent event stream per collection.
    Realtime {
        url: String,
        #[serde(default)]
        path_prefix: Option<String>,
    },
    /// In-process store, for demos and tests.
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Local { data_dir: None }
    }
}

impl StoreConfig {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Rest { .. } => "rest",
            Self::Realtime { .. } => "realtime",
            Self::Memory => "memory",
        }
    }

    /// Fill in the local data directory when the config leaves it unset.
    pub fn set_default_data_dir(&mut self, default_dir: impl Into<PathBuf>) {
        if let Self::Local { data_dir } = self {
            if data_dir.is_none() {
                *data_dir = Some(default_dir.into());
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    /// Identifier the bootstrap signs in with when no session exists.
    #[serde(default)]
    pub sign_in_identifier: Option<String>,
    /// Whether private collections require an authenticated session.
    #[serde(default = "default_true")]
    pub required: bool,
}

/// What to do when a write to the remote store fails.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Log, report and abandon the write.
    #[default]
    None,
    /// Try up to `attempts` times in total, sleeping `delay_ms` in between.
    Fixed { attempts: u32, delay_ms: u64 },
}

impl RetryPolicy {
    #[must_use]
    pub fn max_attempts(self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { attempts, .. } => attempts.max(1),
        }
    }

    #[must_use]
    pub const fn delay(self) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay_ms, .. } => Duration::from_millis(delay_ms),
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Whether the bootstrap must wait for an authenticated session.
    #[must_use]
    pub fn auth_required(&self) -> bool {
        self.auth.as_ref().is_some_and(|auth| auth.required)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::Configuration(format!(
                "Failed to parse config at {}: {}",
                path.display(),
                error
            ))
        })?;
        config.normalize()?;
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut normalized = self.clone();
        normalized.normalize()?;
        let serialized = serde_json::to_string_pretty(&normalized)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// Apply environment overrides through `lookup` (usually `std::env::var`).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = normalize_text_option(lookup(ENV_REQUEST_TIMEOUT_SECS)) {
            self.request_timeout_secs = raw.parse().map_err(|_| {
                Error::Configuration(format!(
                    "{ENV_REQUEST_TIMEOUT_SECS} must be a whole number of seconds"
                ))
            })?;
        }

        if let Some(dir) = normalize_text_option(lookup(ENV_DATA_DIR)) {
            if let StoreConfig::Local { data_dir } = &mut self.store {
                *data_dir = Some(PathBuf::from(dir));
            }
        }

        match (
            normalize_text_option(lookup(ENV_SUPABASE_URL)),
            normalize_text_option(lookup(ENV_SUPABASE_ANON_KEY)),
        ) {
            (Some(supabase_url), Some(supabase_anon_key)) => {
                let existing = self.auth.take();
                self.auth = Some(AuthConfig {
                    supabase_url,
                    supabase_anon_key,
                    sign_in_identifier: existing
                        .as_ref()
                        .and_then(|auth| auth.sign_in_identifier.clone()),
                    required: existing.as_ref().map_or(true, |auth| auth.required),
                });
            }
            (None, None) => {}
            _ => {
                return Err(Error::Configuration(format!(
                    "{ENV_SUPABASE_URL} and {ENV_SUPABASE_ANON_KEY} must be set together"
                )));
            }
        }

        if let Some(email) = normalize_text_option(lookup(ENV_SIGN_IN_EMAIL)) {
            if let Some(auth) = self.auth.as_mut() {
                auth.sign_in_identifier = Some(email);
            }
        }

        self.normalize()
    }

    /// Trim values and validate URLs.
    pub fn normalize(&mut self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(Error::Configuration(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        match &mut self.store {
            StoreConfig::Rest {
                url,
                anon_key,
                table,
                poll_interval_ms,
            } => {
                *url = normalize_base_url(url.as_str(), "store.url").map_err(Error::Configuration)?;
                *anon_key = normalize_text_option(Some(anon_key.clone())).ok_or_else(|| {
                    Error::Configuration("store.anon_key must not be empty".to_string())
                })?;
                *table = normalize_text_option(Some(table.clone()))
                    .unwrap_or_else(default_rest_table);
                if *poll_interval_ms == 0 {
                    return Err(Error::Configuration(
                        "store.poll_interval_ms must be greater than zero".to_string(),
                    ));
                }
            }
            StoreConfig::Realtime { url, path_prefix } => {
                *url = normalize_base_url(url.as_str(), "store.url").map_err(Error::Configuration)?;
                *path_prefix = normalize_text_option(path_prefix.take())
                    .map(|prefix| prefix.trim_matches('/').to_string())
                    .filter(|prefix| !prefix.is_empty());
            }
            StoreConfig::Local { .. } | StoreConfig::Memory => {}
        }

        if let Some(auth) = self.auth.as_mut() {
            auth.supabase_url = normalize_base_url(&auth.supabase_url, "auth.supabase_url")
                .map_err(Error::Configuration)?;
            auth.supabase_anon_key = normalize_text_option(Some(auth.supabase_anon_key.clone()))
                .ok_or_else(|| {
                    Error::Configuration("auth.supabase_anon_key must not be empty".to_string())
                })?;
            auth.sign_in_identifier = normalize_text_option(auth.sign_in_identifier.take());
        }

        Ok(())
    }
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_rest_table() -> String {
    DEFAULT_REST_TABLE.to_string()
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_config_defaults_to_local_store_without_auth() {
        let config: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.store.kind(), "local");
        assert!(!config.auth_required());
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn parses_realtime_store_with_required_auth() {
        let mut config: BridgeConfig = serde_json::from_str(
            r#"{
                "store": {"backend": "realtime", "url": "https://taproom.example.com/", "path_prefix": "/brewery/"},
                "auth": {"supabase_url": "https://demo.supabase.co", "supabase_anon_key": "anon", "sign_in_identifier": "a@b.com"},
                "retry": {"kind": "fixed", "attempts": 3, "delay_ms": 250}
            }"#,
        )
        .unwrap();
        config.normalize().unwrap();

        assert_eq!(
            config.store,
            StoreConfig::Realtime {
                url: "https://taproom.example.com".to_string(),
                path_prefix: Some("brewery".to_string()),
            }
        );
        assert!(config.auth_required());
        assert_eq!(config.retry.max_attempts(), 3);
        assert_eq!(config.retry.delay(), Duration::from_millis(250));
    }

    #[test]
    fn rejects_unknown_top_level_fields() {
        let result = serde_json::from_str::<BridgeConfig>(r#"{"backend": "rest"}"#);
        assert!(result.unwrap_err().to_string().contains("unknown field"));
    }

    #[test]
    fn rest_store_requires_http_url() {
        let mut config = BridgeConfig {
            store: StoreConfig::Rest {
                url: "db.example.com".to_string(),
                anon_key: "anon".to_string(),
                table: DEFAULT_REST_TABLE.to_string(),
                poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            },
            ..BridgeConfig::default()
        };
        let error = config.normalize().unwrap_err();
        assert!(error.to_string().contains("http:// or https://"));
    }

    #[test]
    fn env_overrides_configure_auth_and_timeout() {
        let env = HashMap::from([
            (ENV_SUPABASE_URL, "https://demo.supabase.co/"),
            (ENV_SUPABASE_ANON_KEY, "anon"),
            (ENV_SIGN_IN_EMAIL, "brewer@example.com"),
            (ENV_REQUEST_TIMEOUT_SECS, "3"),
            (ENV_DATA_DIR, "/tmp/brewsync"),
        ]);
        let mut config = BridgeConfig::default();
        config
            .apply_env_overrides(|key| env.get(key).map(ToString::to_string))
            .unwrap();

        let auth = config.auth.clone().unwrap();
        assert_eq!(auth.supabase_url, "https://demo.supabase.co");
        assert_eq!(auth.sign_in_identifier.as_deref(), Some("brewer@example.com"));
        assert!(auth.required);
        assert_eq!(config.request_timeout_secs, 3);
        assert_eq!(
            config.store,
            StoreConfig::Local {
                data_dir: Some(PathBuf::from("/tmp/brewsync"))
            }
        );
    }

    #[test]
    fn env_overrides_reject_partial_supabase_config() {
        let mut config = BridgeConfig::default();
        let result = config.apply_env_overrides(|key| {
            (key == ENV_SUPABASE_URL).then(|| "https://demo.supabase.co".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn save_and_load_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brewsync").join("config.json");
        let config = BridgeConfig {
            store: StoreConfig::Memory,
            retry: RetryPolicy::Fixed {
                attempts: 2,
                delay_ms: 10,
            },
            ..BridgeConfig::default()
        };

        config.save_to_path(&path).unwrap();
        assert_eq!(BridgeConfig::load_from_path(&path).unwrap(), config);
    }

    #[test]
    fn default_data_dir_only_fills_unset_local_dir() {
        let mut store = StoreConfig::default();
        store.set_default_data_dir("/var/lib/brewsync");
        store.set_default_data_dir("/ignored");
        assert_eq!(
            store,
            StoreConfig::Local {
                data_dir: Some(PathBuf::from("/var/lib/brewsync"))
            }
        );
    }
}
