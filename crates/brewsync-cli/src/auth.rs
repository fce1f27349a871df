//! Keychain-backed session persistence and auth client helpers.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;

use brewsync_core::auth::{
    resolve_optional_supabase_config, AuthError, AuthResult, AuthSession, SessionPersistence,
    SupabaseAuthClient,
};
use brewsync_core::config::BridgeConfig;

use crate::error::CliError;

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "brewsync-cli";

/// Stores the serialized session in the OS keychain, one entry per profile.
#[derive(Clone)]
pub struct SessionStore {
    username: String,
}

impl SessionStore {
    pub fn new(profile_name: &str) -> Self {
        Self {
            username: format!("supabase_session:{profile_name}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> AuthResult<Entry> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| AuthError::SecureStorage(error.to_string()))
    }
}

impl SessionPersistence for SessionStore {
    #[cfg(not(test))]
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AuthError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let store = Self::test_store();
        let guard = store
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        if let Some(raw) = guard.get(&self.username) {
            Ok(Some(serde_json::from_str(raw)?))
        } else {
            Ok(None)
        }
    }

    #[cfg(not(test))]
    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let raw = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&raw)
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        Ok(())
    }

    #[cfg(test)]
    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let raw = serde_json::to_string(session)?;
        let store = Self::test_store();
        let mut guard = store
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        guard.insert(self.username.clone(), raw);
        Ok(())
    }

    #[cfg(not(test))]
    fn clear_session(&self) -> AuthResult<()> {
        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AuthError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn clear_session(&self) -> AuthResult<()> {
        let store = Self::test_store();
        let mut guard = store
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        guard.remove(&self.username);
        Ok(())
    }
}

/// Auth client for the configured Supabase project.
pub fn auth_client(config: &BridgeConfig) -> Result<SupabaseAuthClient, CliError> {
    let auth = config.auth.as_ref();
    let Some((url, anon_key)) = resolve_optional_supabase_config(
        auth.map(|auth| auth.supabase_url.clone()),
        auth.map(|auth| auth.supabase_anon_key.clone()),
    )?
    else {
        return Err(CliError::AuthNotConfigured);
    };
    Ok(SupabaseAuthClient::new(
        url,
        anon_key,
        config.request_timeout(),
    )?)
}

/// Explicit email, or the one the config signs in with.
pub fn resolve_email(explicit: Option<String>, config: &BridgeConfig) -> Result<String, CliError> {
    explicit
        .or_else(|| {
            config
                .auth
                .as_ref()
                .and_then(|auth| auth.sign_in_identifier.clone())
        })
        .ok_or_else(|| {
            CliError::Config(
                "No email given. Pass --email or set one with `brewsync config init --email`."
                    .to_string(),
            )
        })
}
