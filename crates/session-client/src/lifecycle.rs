//! Session lifecycle: login, logout, and forced logout
//!
//! `SessionState` is the application-facing view of the session:
//! - LoggedOut → Authenticated (login)
//! - Authenticated → Refreshing → Authenticated (refresh cycle)
//! - any → LoggedOut (logout, or the session expired)
//!
//! Listeners are notified only on an actual transition, so a session torn
//! down by several failing requests produces a single logout.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use session_auth::{CredentialStore, LoginCredentials, TokenApi};
use tracing::info;

use crate::coordinator::{RefreshCoordinator, SessionHooks};
use crate::error::{Error, Result};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    /// A refresh cycle is in flight; requests keep being accepted
    Refreshing,
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserRequested,
    /// Refresh failed or a refreshed credential was rejected
    SessionExpired,
}

impl LogoutReason {
    pub fn label(&self) -> &'static str {
        match self {
            LogoutReason::UserRequested => "user_requested",
            LogoutReason::SessionExpired => "session_expired",
        }
    }
}

/// Application-side observer of login and logout.
pub trait SessionListener: Send + Sync {
    fn on_login(&self) {}

    fn on_logout(&self, reason: LogoutReason);
}

struct Tracked {
    state: SessionState,
    /// Most recent refresh cycle reported as started
    latest_cycle: u64,
}

/// Mirrors coordinator activity into `SessionState`.
pub(crate) struct SessionTracker {
    tracked: Mutex<Tracked>,
    listener: Arc<dyn SessionListener>,
}

impl SessionTracker {
    pub(crate) fn new(authenticated: bool, listener: Arc<dyn SessionListener>) -> Self {
        let state = if authenticated {
            SessionState::Authenticated
        } else {
            SessionState::LoggedOut
        };
        Self {
            tracked: Mutex::new(Tracked {
                state,
                latest_cycle: 0,
            }),
            listener,
        }
    }

    fn tracked(&self) -> MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> SessionState {
        self.tracked().state
    }

    fn logged_in(&self) {
        self.tracked().state = SessionState::Authenticated;
        self.listener.on_login();
    }

    /// Move to `LoggedOut`; notifies only if the session was live.
    fn logged_out(&self, reason: LogoutReason) {
        let previous = std::mem::replace(&mut self.tracked().state, SessionState::LoggedOut);
        if previous == SessionState::LoggedOut {
            return;
        }
        info!(reason = reason.label(), "session ended");
        metrics::record_logout(reason.label());
        self.listener.on_logout(reason);
    }
}

impl SessionHooks for SessionTracker {
    fn refresh_started(&self, cycle: u64) {
        let mut tracked = self.tracked();
        tracked.latest_cycle = cycle;
        if tracked.state == SessionState::Authenticated {
            tracked.state = SessionState::Refreshing;
        }
    }

    fn refresh_settled(&self, cycle: u64) {
        let mut tracked = self.tracked();
        if cycle == tracked.latest_cycle && tracked.state == SessionState::Refreshing {
            tracked.state = SessionState::Authenticated;
        }
    }

    fn session_expired(&self, _reason: &str) {
        self.logged_out(LogoutReason::SessionExpired);
    }
}

/// Login and logout on top of the shared store and coordinator.
pub struct AuthLifecycleController {
    store: Arc<CredentialStore>,
    token_api: Arc<dyn TokenApi>,
    coordinator: Arc<RefreshCoordinator>,
    tracker: Arc<SessionTracker>,
}

impl AuthLifecycleController {
    pub(crate) fn new(
        store: Arc<CredentialStore>,
        token_api: Arc<dyn TokenApi>,
        coordinator: Arc<RefreshCoordinator>,
        tracker: Arc<SessionTracker>,
    ) -> Self {
        Self {
            store,
            token_api,
            coordinator,
            tracker,
        }
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<()> {
        let response = self
            .token_api
            .login(credentials)
            .await
            .map_err(Error::Login)?;
        let credential = response.into_credential(None).map_err(Error::Login)?;
        let expires_at = credential.expires_at;
        self.store.set(credential).await.map_err(Error::Store)?;

        info!(username = %credentials.username, expires_at, "logged in");
        self.tracker.logged_in();
        Ok(())
    }

    /// End the session: reject waiting requests, clear the credential, and
    /// notify the listener. Calling it while logged out is a no-op apart
    /// from clearing storage again.
    pub async fn logout(&self) -> Result<()> {
        let rejected = self.coordinator.cancel_pending("logged out");
        let cleared = self.store.clear().await;
        info!(rejected, "logout requested");
        self.tracker.logged_out(LogoutReason::UserRequested);
        cleared.map_err(Error::Store)
    }

    pub fn state(&self) -> SessionState {
        self.tracker.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingListener, MockTokenApi, seeded_store};
    use std::time::Duration;

    fn controller(
        store: Arc<CredentialStore>,
        listener: Arc<CountingListener>,
    ) -> (AuthLifecycleController, Arc<SessionTracker>) {
        let api = Arc::new(MockTokenApi::new());
        let tracker = Arc::new(SessionTracker::new(!store.is_empty(), listener));
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            api.clone(),
            tracker.clone(),
            Duration::from_secs(10),
        ));
        (
            AuthLifecycleController::new(store, api, coordinator, tracker.clone()),
            tracker,
        )
    }

    #[tokio::test]
    async fn initial_state_follows_store() {
        let listener = Arc::new(CountingListener::default());
        let (hydrated, _) = controller(seeded_store("0").await, listener.clone());
        assert_eq!(hydrated.state(), SessionState::Authenticated);

        let (empty, _) = controller(Arc::new(CredentialStore::in_memory()), listener);
        assert_eq!(empty.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn login_stores_credential_and_notifies() {
        let store = Arc::new(CredentialStore::in_memory());
        let listener = Arc::new(CountingListener::default());
        let (lifecycle, _) = controller(store.clone(), listener.clone());

        lifecycle
            .login(&LoginCredentials::new("alice", "correct-horse"))
            .await
            .unwrap();

        assert_eq!(store.access_token().as_deref(), Some("at_login"));
        assert_eq!(lifecycle.state(), SessionState::Authenticated);
        assert_eq!(listener.login_count(), 1);
    }

    #[tokio::test]
    async fn rejected_login_leaves_state_alone() {
        let store = Arc::new(CredentialStore::in_memory());
        let listener = Arc::new(CountingListener::default());
        let (lifecycle, _) = controller(store.clone(), listener.clone());

        let err = lifecycle
            .login(&LoginCredentials::new("alice", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Login(_)), "got: {err:?}");
        assert!(store.is_empty());
        assert_eq!(lifecycle.state(), SessionState::LoggedOut);
        assert_eq!(listener.login_count(), 0);
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let store = seeded_store("0").await;
        let listener = Arc::new(CountingListener::default());
        let (lifecycle, _) = controller(store.clone(), listener.clone());

        lifecycle.logout().await.unwrap();
        lifecycle.logout().await.unwrap();

        assert!(store.is_empty());
        assert_eq!(lifecycle.state(), SessionState::LoggedOut);
        assert_eq!(listener.logouts(), vec![LogoutReason::UserRequested]);
    }

    #[test]
    fn stale_settle_does_not_end_newer_refresh() {
        let listener = Arc::new(CountingListener::default());
        let tracker = SessionTracker::new(true, listener);

        tracker.refresh_started(1);
        tracker.refresh_started(2);
        tracker.refresh_settled(1);
        assert_eq!(tracker.state(), SessionState::Refreshing);
        tracker.refresh_settled(2);
        assert_eq!(tracker.state(), SessionState::Authenticated);
    }

    #[test]
    fn expiry_after_logout_does_not_notify_twice() {
        let listener = Arc::new(CountingListener::default());
        let tracker = SessionTracker::new(true, listener.clone());

        tracker.session_expired("refresh rejected");
        tracker.session_expired("replay rejected");
        tracker.logged_out(LogoutReason::UserRequested);

        assert_eq!(listener.logouts(), vec![LogoutReason::SessionExpired]);
    }
}
