use std::env;
use std::path::{Path, PathBuf};

use brewsync_core::config::{
    AuthConfig, BridgeConfig, StoreConfig, DEFAULT_POLL_INTERVAL_MS, DEFAULT_REST_TABLE,
};

use crate::cli::{ConfigCommands, StoreBackend};
use crate::commands::CommandContext;
use crate::error::CliError;

/// Values passed to `config init`; unset fields keep their current value.
#[derive(Debug, Default)]
pub struct ConfigInit {
    pub store: Option<StoreBackend>,
    pub store_url: Option<String>,
    pub store_anon_key: Option<String>,
    pub table: Option<String>,
    pub path_prefix: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub email: Option<String>,
    pub no_auth_required: bool,
    pub request_timeout_secs: Option<u64>,
}

pub fn run_config(command: ConfigCommands, context: &CommandContext) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            store,
            store_url,
            store_anon_key,
            table,
            path_prefix,
            data_dir,
            supabase_url,
            supabase_anon_key,
            email,
            no_auth_required,
            request_timeout_secs,
        } => run_config_init(
            &context.config_path,
            ConfigInit {
                store,
                store_url,
                store_anon_key,
                table,
                path_prefix,
                data_dir,
                supabase_url: supabase_url.or_else(|| env::var("SUPABASE_URL").ok()),
                supabase_anon_key: supabase_anon_key
                    .or_else(|| env::var("SUPABASE_ANON_KEY").ok()),
                email,
                no_auth_required,
                request_timeout_secs,
            },
        ),
        ConfigCommands::Show => {
            let config = context.load_config()?;
            eprintln!("# {}", context.config_path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

pub fn run_config_init(path: &Path, init: ConfigInit) -> Result<(), CliError> {
    let mut config = BridgeConfig::load_from_path(path)?;
    apply_init(&mut config, init)?;
    config.save_to_path(path)?;
    println!(
        "Config initialized at {} ({} store)",
        path.display(),
        config.store.kind()
    );

    match &config.auth {
        Some(auth) if auth.sign_in_identifier.is_some() => {
            println!("Run `brewsync auth login` to sign in.");
        }
        Some(_) => println!("Run `brewsync auth login --email <email>` to sign in."),
        None => println!("Auth is not configured; collections sync without sign-in."),
    }
    Ok(())
}

pub fn apply_init(config: &mut BridgeConfig, init: ConfigInit) -> Result<(), CliError> {
    let ConfigInit {
        store,
        store_url,
        store_anon_key,
        table,
        path_prefix,
        data_dir,
        supabase_url,
        supabase_anon_key,
        email,
        no_auth_required,
        request_timeout_secs,
    } = init;

    match (supabase_url, supabase_anon_key) {
        (Some(supabase_url), Some(supabase_anon_key)) => {
            let existing = config.auth.take();
            config.auth = Some(AuthConfig {
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
            return Err(CliError::Config(
                "--supabase-url and --supabase-anon-key must be set together".to_string(),
            ));
        }
    }
    if email.is_some() || no_auth_required {
        let auth = config.auth.as_mut().ok_or(CliError::AuthNotConfigured)?;
        if email.is_some() {
            auth.sign_in_identifier = email;
        }
        if no_auth_required {
            auth.required = false;
        }
    }

    let backend = store.unwrap_or(match config.store {
        StoreConfig::Local { .. } => StoreBackend::Local,
        StoreConfig::Rest { .. } => StoreBackend::Rest,
        StoreConfig::Realtime { .. } => StoreBackend::Realtime,
        StoreConfig::Memory => StoreBackend::Memory,
    });
    let previous = std::mem::take(&mut config.store);
    config.store = match backend {
        StoreBackend::Local => {
            let existing_dir = match previous {
                StoreConfig::Local { data_dir } => data_dir,
                _ => None,
            };
            StoreConfig::Local {
                data_dir: data_dir.or(existing_dir),
            }
        }
        StoreBackend::Rest => {
            let (existing_url, existing_key, existing_table, poll_interval_ms) = match previous {
                StoreConfig::Rest {
                    url,
                    anon_key,
                    table,
                    poll_interval_ms,
                } => (Some(url), Some(anon_key), Some(table), poll_interval_ms),
                _ => (None, None, None, DEFAULT_POLL_INTERVAL_MS),
            };
            // A Supabase project serves its tables next to its auth API.
            let project = config.auth.as_ref();
            StoreConfig::Rest {
                url: store_url
                    .or(existing_url)
                    .or_else(|| project.map(|auth| auth.supabase_url.clone()))
                    .ok_or_else(|| missing_flag("--store-url", "rest"))?,
                anon_key: store_anon_key
                    .or(existing_key)
                    .or_else(|| project.map(|auth| auth.supabase_anon_key.clone()))
                    .ok_or_else(|| missing_flag("--store-anon-key", "rest"))?,
                table: table
                    .or(existing_table)
                    .unwrap_or_else(|| DEFAULT_REST_TABLE.to_string()),
                poll_interval_ms,
            }
        }
        StoreBackend::Realtime => {
            let (existing_url, existing_prefix) = match previous {
                StoreConfig::Realtime { url, path_prefix } => (Some(url), path_prefix),
                _ => (None, None),
            };
            StoreConfig::Realtime {
                url: store_url
                    .or(existing_url)
                    .ok_or_else(|| missing_flag("--store-url", "realtime"))?,
                path_prefix: path_prefix.or(existing_prefix),
            }
        }
        StoreBackend::Memory => StoreConfig::Memory,
    };

    if let Some(secs) = request_timeout_secs {
        config.request_timeout_secs = secs;
    }
    config.normalize()?;
    Ok(())
}

fn missing_flag(flag: &str, backend: &str) -> CliError {
    CliError::Config(format!("{flag} is required for the {backend} store"))
}
