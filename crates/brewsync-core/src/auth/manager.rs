//! Session manager: owns the sign-in state machine and gates data sync.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use super::{
    validate_identifier, AuthError, AuthProvider, AuthResult, AuthSession, Session,
    SessionPersistence,
};
use crate::report::{ErrorReporter, SyncFailure};
use crate::store::CredentialSource;

/// Callback invoked once per session transition with the new state.
pub type SessionListener = Arc<dyn Fn(&Session) + Send + Sync>;

/// Explicitly constructed session owner shared (by clone) with every
/// component that needs to know who is signed in.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    state: watch::Sender<Session>,
    listeners: Mutex<Vec<SessionListener>>,
    provider: Option<Arc<dyn AuthProvider>>,
    persistence: Arc<dyn SessionPersistence>,
    reporter: ErrorReporter,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(
        provider: Option<Arc<dyn AuthProvider>>,
        persistence: Arc<dyn SessionPersistence>,
        reporter: ErrorReporter,
        timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(Session::Anonymous);
        Self {
            inner: Arc::new(Inner {
                state,
                listeners: Mutex::new(Vec::new()),
                provider,
                persistence,
                reporter,
                timeout,
            }),
        }
    }

    /// Synchronous snapshot of the current state.
    pub fn current_session(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    pub fn on_session_change(&self, listener: impl Fn(&Session) + Send + Sync + 'static) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Start a passwordless sign-in for `identifier`.
    ///
    /// The session is `Pending` when this returns; the challenge itself is sent
    /// on a spawned task, so this must run inside a Tokio runtime. Challenge
    /// failures are reported, not returned.
    pub fn request_sign_in(&self, identifier: &str) -> AuthResult<()> {
        let identifier = match validate_identifier(identifier) {
            Ok(identifier) => identifier,
            Err(error) => {
                self.report_challenge_failure(&error);
                return Err(error);
            }
        };
        let Some(provider) = self.inner.provider.clone() else {
            let error = AuthError::NotConfigured;
            self.report_challenge_failure(&error);
            return Err(error);
        };
        if self.current_session().is_authenticated() {
            tracing::debug!("Ignoring sign-in request; session is already authenticated");
            return Ok(());
        }

        self.transition(Session::Pending {
            identifier: identifier.clone(),
        });

        let manager = self.clone();
        tokio::spawn(async move {
            match manager.bounded(provider.send_challenge(&identifier)).await {
                Ok(()) => tracing::info!("Sign-in challenge sent to {}", identifier),
                Err(error) => manager.report_challenge_failure(&error),
            }
        });
        Ok(())
    }

    /// Confirm the pending sign-in with the one-time token from the challenge.
    pub async fn complete_sign_in(&self, token: &str) -> AuthResult<AuthSession> {
        let Session::Pending { identifier } = self.current_session() else {
            return Err(AuthError::NoPendingSignIn);
        };
        let provider = self.provider()?;
        let session = self
            .bounded(provider.verify_challenge(&identifier, token))
            .await?;
        self.confirm(session.clone())?;
        Ok(session)
    }

    /// Apply a session confirmed outside this process (e.g. a link callback).
    pub fn confirm(&self, session: AuthSession) -> AuthResult<()> {
        self.inner.persistence.save_session(&session)?;
        tracing::info!("Signed in as {}", session.identity());
        self.transition(Session::Authenticated(session));
        Ok(())
    }

    /// Resume a persisted session, refreshing it when expired.
    pub async fn restore(&self) -> AuthResult<Session> {
        let Some(stored_session) = self.inner.persistence.load_session()? else {
            return Ok(self.current_session());
        };

        if !stored_session.is_expired() {
            self.transition(Session::Authenticated(stored_session));
            return Ok(self.current_session());
        }

        let refreshed = match self.provider() {
            Ok(provider) => {
                self.bounded(provider.refresh(&stored_session.refresh_token))
                    .await
            }
            Err(error) => Err(error),
        };
        match refreshed {
            Ok(session) => self.confirm(session)?,
            Err(error) => {
                tracing::warn!("Failed to refresh persisted session: {}", error);
                self.inner.persistence.clear_session()?;
            }
        }
        Ok(self.current_session())
    }

    /// Sign out and return to `Anonymous`. Remote logout is best effort.
    pub async fn sign_out(&self) -> AuthResult<()> {
        if let (Session::Authenticated(session), Some(provider)) =
            (self.current_session(), self.inner.provider.clone())
        {
            if let Err(error) = self.bounded(provider.sign_out(&session.access_token)).await {
                tracing::warn!("Remote sign-out failed: {}", error);
            }
        }
        self.inner.persistence.clear_session()?;
        self.transition(Session::Anonymous);
        Ok(())
    }

    /// Wait until the session reaches `Authenticated`.
    pub async fn wait_until_authenticated(&self) -> AuthResult<AuthSession> {
        let mut receiver = self.watch();
        let state = receiver
            .wait_for(Session::is_authenticated)
            .await
            .map_err(|_| AuthError::Closed)?;
        match &*state {
            Session::Authenticated(session) => Ok(session.clone()),
            Session::Anonymous | Session::Pending { .. } => Err(AuthError::Closed),
        }
    }

    fn provider(&self) -> AuthResult<Arc<dyn AuthProvider>> {
        self.inner.provider.clone().ok_or(AuthError::NotConfigured)
    }

    async fn bounded<T>(&self, future: impl Future<Output = AuthResult<T>>) -> AuthResult<T> {
        tokio::time::timeout(self.inner.timeout, future)
            .await
            .map_err(|_| AuthError::Timeout(self.inner.timeout))?
    }

    fn transition(&self, next: Session) {
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });
        if !changed {
            return;
        }

        tracing::debug!("Session is now {}", next.label());
        let listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(&next);
        }
    }

    fn report_challenge_failure(&self, error: &AuthError) {
        self.inner.reporter.report(SyncFailure::AuthChallengeFailed {
            reason: error.to_string(),
        });
    }
}

impl CredentialSource for SessionManager {
    fn access_token(&self) -> Option<String> {
        match &*self.inner.state.borrow() {
            Session::Authenticated(session) => Some(session.access_token.clone()),
            Session::Anonymous | Session::Pending { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    use super::*;
    use crate::auth::testing::{session_for, RecordingProvider};
    use crate::auth::MemorySessionStore;

    fn manager_with(
        provider: Arc<RecordingProvider>,
        store: MemorySessionStore,
    ) -> (SessionManager, mpsc::UnboundedReceiver<SyncFailure>) {
        let (reporter, failures) = ErrorReporter::channel();
        let manager = SessionManager::new(
            Some(provider),
            Arc::new(store),
            reporter,
            Duration::from_secs(5),
        );
        (manager, failures)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn request_sign_in_is_pending_before_challenge_completes() {
        let (provider, mut challenges) = RecordingProvider::new();
        let (manager, _failures) = manager_with(provider, MemorySessionStore::default());

        manager.request_sign_in("a@b.com").unwrap();

        // Nothing has been polled yet on a current-thread runtime.
        assert_eq!(
            manager.current_session(),
            Session::Pending {
                identifier: "a@b.com".to_string()
            }
        );
        assert_eq!(challenges.recv().await.as_deref(), Some("a@b.com"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn malformed_identifier_stays_anonymous_and_is_reported() {
        let (provider, _challenges) = RecordingProvider::new();
        let (manager, mut failures) = manager_with(provider, MemorySessionStore::default());

        let result = manager.request_sign_in("not an email");

        assert!(matches!(result, Err(AuthError::InvalidIdentifier(_))));
        assert_eq!(manager.current_session(), Session::Anonymous);
        assert!(matches!(
            failures.try_recv(),
            Ok(SyncFailure::AuthChallengeFailed { .. })
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn backend_challenge_failure_keeps_pending() {
        let (provider, mut challenges) = RecordingProvider::new();
        provider.fail_challenges();
        let (manager, mut failures) = manager_with(provider, MemorySessionStore::default());

        manager.request_sign_in("a@b.com").unwrap();
        challenges.recv().await.unwrap();
        let failure = failures.recv().await.unwrap();

        assert!(failure.to_string().contains("rate limit"));
        assert_eq!(manager.current_session().label(), "pending");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn listeners_fire_once_per_transition() {
        let (provider, _challenges) = RecordingProvider::new();
        let (manager, _failures) = manager_with(provider, MemorySessionStore::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        manager.on_session_change(move |session| {
            recorded.lock().unwrap().push(session.label());
        });

        manager.request_sign_in("a@b.com").unwrap();
        manager.request_sign_in("a@b.com").unwrap();
        manager.complete_sign_in("123456").await.unwrap();
        manager.request_sign_in("a@b.com").unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["pending", "authenticated"]);
        assert_eq!(manager.current_session().identity(), Some("a@b.com"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn complete_sign_in_requires_pending_state() {
        let (provider, _challenges) = RecordingProvider::new();
        let (manager, _failures) = manager_with(provider, MemorySessionStore::default());

        let result = manager.complete_sign_in("123456").await;
        assert!(matches!(result, Err(AuthError::NoPendingSignIn)));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn wrong_token_leaves_session_pending() {
        let (provider, _challenges) = RecordingProvider::new();
        let (manager, _failures) = manager_with(provider, MemorySessionStore::default());

        manager.request_sign_in("a@b.com").unwrap();
        assert!(manager.complete_sign_in("000000").await.is_err());
        assert_eq!(manager.current_session().label(), "pending");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn restore_refreshes_expired_session() {
        let (provider, _challenges) = RecordingProvider::new();
        let mut expired = session_for("a@b.com");
        expired.expires_at = 0;
        let store = MemorySessionStore::with_session(expired);
        let (manager, _failures) = manager_with(provider, store.clone());

        let session = manager.restore().await.unwrap();

        assert!(session.is_authenticated());
        assert!(!store.load_session().unwrap().unwrap().is_expired());
        assert_eq!(manager.access_token().as_deref(), Some("access-a@b.com"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn restore_clears_session_that_cannot_be_refreshed() {
        let (provider, _challenges) = RecordingProvider::new();
        let mut broken = session_for("a@b.com");
        broken.expires_at = 0;
        broken.refresh_token = "garbage".to_string();
        let store = MemorySessionStore::with_session(broken);
        let (manager, _failures) = manager_with(provider, store.clone());

        let session = manager.restore().await.unwrap();

        assert_eq!(session, Session::Anonymous);
        assert!(store.load_session().unwrap().is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sign_out_returns_to_anonymous() {
        let (provider, _challenges) = RecordingProvider::new();
        let store = MemorySessionStore::with_session(session_for("a@b.com"));
        let (manager, _failures) = manager_with(provider, store.clone());
        manager.restore().await.unwrap();

        manager.sign_out().await.unwrap();

        assert_eq!(manager.current_session(), Session::Anonymous);
        assert!(manager.access_token().is_none());
        assert!(store.load_session().unwrap().is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn wait_until_authenticated_resolves_on_confirmation() {
        let (provider, _challenges) = RecordingProvider::new();
        let (manager, _failures) = manager_with(provider, MemorySessionStore::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        manager.on_session_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.wait_until_authenticated().await })
        };
        manager.confirm(session_for("a@b.com")).unwrap();

        let session = waiter.await.unwrap().unwrap();
        assert_eq!(session.identity(), "a@b.com");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sign_in_without_provider_is_not_configured() {
        let (reporter, mut failures) = ErrorReporter::channel();
        let manager = SessionManager::new(
            None,
            Arc::new(MemorySessionStore::default()),
            reporter,
            Duration::from_secs(1),
        );

        assert!(matches!(
            manager.request_sign_in("a@b.com"),
            Err(AuthError::NotConfigured)
        ));
        assert_eq!(manager.current_session(), Session::Anonymous);
        assert!(failures.try_recv().is_ok());
    }
}
