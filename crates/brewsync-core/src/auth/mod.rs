//! Session state and passwordless sign-in.

mod manager;
mod supabase;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::{is_email_like, unix_timestamp_now};

pub use manager::{SessionListener, SessionManager};
pub use supabase::{normalize_auth_url, resolve_optional_supabase_config, SupabaseAuthClient};

const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub user: AuthUser,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_timestamp_now() + EXPIRY_SKEW_SECONDS
    }

    /// Identity shown to the client: the email when known, else the user id.
    #[must_use]
    pub fn identity(&self) -> &str {
        self.user.email.as_deref().unwrap_or(&self.user.id)
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Authentication status of this process.
///
/// `Anonymous -> Pending -> Authenticated`; only a sign-out goes back to
/// `Anonymous`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Session {
    #[default]
    Anonymous,
    /// A challenge was requested for `identifier` and awaits confirmation.
    Pending { identifier: String },
    Authenticated(AuthSession),
}

impl Session {
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Authenticated(session) => Some(session.identity()),
            Self::Anonymous | Self::Pending { .. } => None,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Pending { .. } => "pending",
            Self::Authenticated(_) => "authenticated",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Supabase auth is not configured for this build.")]
    NotConfigured,
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("Invalid sign-in identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("No sign-in is pending")]
    NoPendingSignIn,
    #[error("Auth request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Session manager was shut down")]
    Closed,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

pub trait SessionPersistence: Send + Sync + 'static {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

/// Process-local session persistence; nothing survives a restart.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    slot: Arc<Mutex<Option<AuthSession>>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn with_session(session: AuthSession) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(session))),
        }
    }
}

impl SessionPersistence for MemorySessionStore {
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear_session(&self) -> AuthResult<()> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }
}

/// Challenge-based (passwordless) authentication backend.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Ask the backend to deliver an out-of-band challenge to `identifier`.
    async fn send_challenge(&self, identifier: &str) -> AuthResult<()>;

    /// Exchange the one-time token from the challenge for a session.
    async fn verify_challenge(&self, identifier: &str, token: &str) -> AuthResult<AuthSession>;

    async fn refresh(&self, refresh_token: &str) -> AuthResult<AuthSession>;

    async fn sign_out(&self, access_token: &str) -> AuthResult<()>;
}

/// Trim and shape-check a sign-in identifier.
pub fn validate_identifier(identifier: &str) -> AuthResult<String> {
    let trimmed = identifier.trim();
    if is_email_like(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(AuthError::InvalidIdentifier(trimmed.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::mpsc;

    use super::*;

    pub fn session_for(email: &str) -> AuthSession {
        AuthSession {
            access_token: format!("access-{email}"),
            refresh_token: format!("refresh-{email}"),
            expires_at: unix_timestamp_now() + 3600,
            user: AuthUser {
                id: format!("user-{email}"),
                email: Some(email.to_string()),
            },
        }
    }

    /// Provider double that records challenges and accepts the token `"123456"`.
    pub struct RecordingProvider {
        challenges: mpsc::UnboundedSender<String>,
        fail_challenges: AtomicBool,
    }

    impl RecordingProvider {
        pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    challenges: tx,
                    fail_challenges: AtomicBool::new(false),
                }),
                rx,
            )
        }

        pub fn fail_challenges(&self) {
            self.fail_challenges.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AuthProvider for RecordingProvider {
        async fn send_challenge(&self, identifier: &str) -> AuthResult<()> {
            let _ = self.challenges.send(identifier.to_string());
            if self.fail_challenges.load(Ordering::SeqCst) {
                return Err(AuthError::Api("email rate limit exceeded (429)".to_string()));
            }
            Ok(())
        }

        async fn verify_challenge(&self, identifier: &str, token: &str) -> AuthResult<AuthSession> {
            if token == "123456" {
                Ok(session_for(identifier))
            } else {
                Err(AuthError::Api("Token has expired or is invalid (403)".to_string()))
            }
        }

        async fn refresh(&self, refresh_token: &str) -> AuthResult<AuthSession> {
            let email = refresh_token
                .strip_prefix("refresh-")
                .ok_or_else(|| AuthError::Api("Invalid Refresh Token (400)".to_string()))?;
            Ok(session_for(email))
        }

        async fn sign_out(&self, _access_token: &str) -> AuthResult<()> {
            Ok(())
        }
    }
}
