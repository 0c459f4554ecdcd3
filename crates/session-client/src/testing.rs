//! Test doubles for the session client

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use session_auth::{
    Credential, CredentialStore, LoginCredentials, MemoryBackend, TokenApi, TokenResponse,
};
use transport::{RequestSpec, Response, Transport, TransportError};

use crate::coordinator::SessionHooks;
use crate::lifecycle::{LogoutReason, SessionListener};

/// Expiration far in the future (year 2100).
pub const FAR_FUTURE: u64 = 4_102_444_800_000;

/// Store holding `at_{suffix}` / `rt_{suffix}`, valid for decades.
pub async fn seeded_store(suffix: &str) -> Arc<CredentialStore> {
    let credential = Credential {
        access_token: format!("at_{suffix}"),
        refresh_token: format!("rt_{suffix}"),
        expires_at: FAR_FUTURE,
    };
    Arc::new(
        CredentialStore::open(MemoryBackend::with_credential(credential))
            .await
            .unwrap(),
    )
}

#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum TransportMode {
    /// 401 for missing or revoked tokens, 200 with the path as body otherwise
    Normal,
    /// Every call answers with this status
    Status(u16),
    /// Every call fails before a response
    Offline,
}

/// Transport that answers from a revoked-token list and records every call.
pub struct ScriptedTransport {
    mode: Mutex<TransportMode>,
    revoked: Mutex<HashSet<String>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            mode: Mutex::new(TransportMode::Normal),
            revoked: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mode(self, mode: TransportMode) -> Self {
        *self.mode.lock().unwrap() = mode;
        self
    }

    pub fn revoke(&self, token: &str) {
        self.revoked.lock().unwrap().insert(token.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn answer(&self, token: Option<&str>, path: &str) -> transport::Result<Response> {
        match *self.mode.lock().unwrap() {
            TransportMode::Offline => Err(TransportError::Connect("connection refused".into())),
            TransportMode::Status(status) => Ok(Response::new(status, "scripted")),
            TransportMode::Normal => match token {
                Some(t) if !self.revoked.lock().unwrap().contains(t) => {
                    Ok(Response::new(200, path.to_string()))
                }
                _ => Ok(Response::new(401, "expired")),
            },
        }
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: RequestSpec,
    ) -> Pin<Box<dyn Future<Output = transport::Result<Response>> + Send + '_>> {
        Box::pin(async move {
            let token = request
                .headers
                .get(reqwest::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string);
            self.calls.lock().unwrap().push(Call {
                path: request.path.clone(),
                token: token.clone(),
            });
            // Let concurrent callers interleave at the network boundary
            tokio::task::yield_now().await;
            self.answer(token.as_deref(), &request.path)
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum RefreshMode {
    /// Call n returns `at_n` / `rt_n`
    Succeed,
    /// 401 from the refresh endpoint
    Reject,
    /// Network failure reaching the refresh endpoint
    Transient,
    /// Never completes
    Hang,
}

pub struct MockTokenApi {
    mode: Mutex<RefreshMode>,
    delay: Option<Duration>,
    refresh_calls: AtomicUsize,
    login_calls: AtomicUsize,
}

impl MockTokenApi {
    pub fn new() -> Self {
        Self {
            mode: Mutex::new(RefreshMode::Succeed),
            delay: None,
            refresh_calls: AtomicUsize::new(0),
            login_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_mode(self, mode: RefreshMode) -> Self {
        self.set_mode(mode);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_mode(&self, mode: RefreshMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }
}

impl TokenApi for MockTokenApi {
    fn login<'a>(
        &'a self,
        credentials: &'a LoginCredentials,
    ) -> Pin<Box<dyn Future<Output = session_auth::Result<TokenResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.login_calls.fetch_add(1, Ordering::SeqCst);
            if credentials.password.expose() != "correct-horse" {
                return Err(session_auth::Error::InvalidCredentials("bad password".into()));
            }
            Ok(TokenResponse {
                access_token: "at_login".into(),
                refresh_token: Some("rt_login".into()),
                expires_in: 3600,
            })
        })
    }

    fn refresh<'a>(
        &'a self,
        _refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = session_auth::Result<TokenResponse>> + Send + 'a>> {
        Box::pin(async move {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mode = *self.mode.lock().unwrap();
            match mode {
                RefreshMode::Succeed => Ok(TokenResponse {
                    access_token: format!("at_{n}"),
                    refresh_token: Some(format!("rt_{n}")),
                    expires_in: 3600,
                }),
                RefreshMode::Reject => Err(session_auth::Error::InvalidCredentials(
                    "refresh token revoked".into(),
                )),
                RefreshMode::Transient => {
                    Err(session_auth::Error::Http("connection reset".into()))
                }
                RefreshMode::Hang => std::future::pending().await,
            }
        })
    }
}

/// Hooks that record what the coordinator reported.
#[derive(Default)]
pub struct RecordingHooks {
    started: Mutex<Vec<u64>>,
    settled: Mutex<Vec<u64>>,
    expired: Mutex<Vec<String>>,
}

impl RecordingHooks {
    pub fn started(&self) -> Vec<u64> {
        self.started.lock().unwrap().clone()
    }

    pub fn settled(&self) -> Vec<u64> {
        self.settled.lock().unwrap().clone()
    }

    pub fn expired_count(&self) -> usize {
        self.expired.lock().unwrap().len()
    }
}

impl SessionHooks for RecordingHooks {
    fn refresh_started(&self, cycle: u64) {
        self.started.lock().unwrap().push(cycle);
    }

    fn refresh_settled(&self, cycle: u64) {
        self.settled.lock().unwrap().push(cycle);
    }

    fn session_expired(&self, reason: &str) {
        self.expired.lock().unwrap().push(reason.to_string());
    }
}

/// Listener counting login and logout notifications.
#[derive(Default)]
pub struct CountingListener {
    logins: AtomicUsize,
    logouts: Mutex<Vec<LogoutReason>>,
}

impl CountingListener {
    pub fn login_count(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> Vec<LogoutReason> {
        self.logouts.lock().unwrap().clone()
    }
}

impl SessionListener for CountingListener {
    fn on_login(&self) {
        self.logins.fetch_add(1, Ordering::SeqCst);
    }

    fn on_logout(&self, reason: LogoutReason) {
        self.logouts.lock().unwrap().push(reason);
    }
}
