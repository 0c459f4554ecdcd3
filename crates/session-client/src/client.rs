//! The assembled authenticated client
//!
//! Wires one credential store into the coordinator, interceptor, and
//! lifecycle controller. Everything is injected; there is no global state,
//! so several independent clients can live in one process.

use std::sync::Arc;
use std::time::Duration;

use session_auth::{
    CredentialStore, DEFAULT_REFRESH_TIMEOUT_SECS, EXPIRED_CREDENTIAL_STATUS, LoginCredentials,
    TokenApi,
};
use tokio::task::JoinHandle;
use transport::{RequestSpec, Response, Transport};

use crate::coordinator::RefreshCoordinator;
use crate::error::Result;
use crate::interceptor::RequestInterceptor;
use crate::lifecycle::{AuthLifecycleController, SessionListener, SessionState, SessionTracker};
use crate::refresh;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Upper bound on one refresh call; exceeding it fails the session
    pub refresh_timeout: Duration,
    /// Status the server uses to signal an expired access token
    pub expired_status: u16,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            expired_status: EXPIRED_CREDENTIAL_STATUS,
        }
    }
}

pub struct AuthClient {
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    interceptor: Arc<RequestInterceptor>,
    lifecycle: AuthLifecycleController,
}

impl AuthClient {
    pub fn new(
        settings: ClientSettings,
        transport: Arc<dyn Transport>,
        token_api: Arc<dyn TokenApi>,
        store: Arc<CredentialStore>,
        listener: Arc<dyn SessionListener>,
    ) -> Self {
        let tracker = Arc::new(SessionTracker::new(!store.is_empty(), listener));
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            token_api.clone(),
            tracker.clone(),
            settings.refresh_timeout,
        ));
        let interceptor = Arc::new(RequestInterceptor::new(
            transport,
            store.clone(),
            coordinator.clone(),
            settings.expired_status,
        ));
        let lifecycle =
            AuthLifecycleController::new(store.clone(), token_api, coordinator.clone(), tracker);

        Self {
            store,
            coordinator,
            interceptor,
            lifecycle,
        }
    }

    pub async fn send(&self, request: RequestSpec) -> Result<Response> {
        self.interceptor.send(request).await
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<()> {
        self.lifecycle.login(credentials).await
    }

    pub async fn logout(&self) -> Result<()> {
        self.lifecycle.logout().await
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Start proactive refresh; see [`refresh::spawn_refresh_task`].
    pub fn spawn_refresh_task(&self, interval: Duration, threshold: Duration) -> JoinHandle<()> {
        refresh::spawn_refresh_task(self.coordinator.clone(), interval, threshold)
    }
}
