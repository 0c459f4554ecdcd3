//! Bearer token attachment and expired-credential detection
//!
//! Every outgoing request gets `Authorization: Bearer <access>` from the
//! current credential, replacing whatever the caller set. Responses are
//! classified; only the expired-credential signal is handled here, by
//! handing a one-shot replay of the request to the refresh coordinator.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderValue};
use session_auth::CredentialStore;
use tracing::{debug, warn};
use transport::{RequestSpec, Response, Transport};
use uuid::Uuid;

use crate::classify::{Outcome, classify_status};
use crate::coordinator::RefreshCoordinator;
use crate::dispatcher::{Replay, ReplayFuture};
use crate::error::{Error, Result};

pub struct RequestInterceptor {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    expired_status: u16,
}

impl RequestInterceptor {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        coordinator: Arc<RefreshCoordinator>,
        expired_status: u16,
    ) -> Self {
        Self {
            transport,
            store,
            coordinator,
            expired_status,
        }
    }

    /// Send a request with the current credential.
    ///
    /// An expired-credential response is never returned: the request waits
    /// for a refresh and resolves with its one replay, or `SessionExpired`.
    pub async fn send(self: &Arc<Self>, request: RequestSpec) -> Result<Response> {
        let request_id = Uuid::new_v4();
        let (response, sent_with) = self.attempt(request.clone()).await?;

        match classify_status(response.status, self.expired_status) {
            Outcome::Success => Ok(response),
            Outcome::Failure => {
                debug!(%request_id, status = response.status, path = %request.path, "request failed");
                Err(Error::Server(response))
            }
            Outcome::CredentialExpired => {
                debug!(%request_id, path = %request.path, "credential expired, waiting on refresh");
                let this = Arc::clone(self);
                let replay: Replay = Box::new(move || -> ReplayFuture {
                    Box::pin(async move { this.replay(request_id, request).await })
                });
                self.coordinator
                    .on_credential_expired(sent_with, replay)
                    .await
            }
        }
    }

    /// The single replay of a request after a refresh. A second expired
    /// signal ends the session.
    async fn replay(&self, request_id: Uuid, request: RequestSpec) -> Result<Response> {
        let (response, sent_with) = self.attempt(request).await?;
        match classify_status(response.status, self.expired_status) {
            Outcome::Success => Ok(response),
            Outcome::Failure => Err(Error::Server(response)),
            Outcome::CredentialExpired => {
                warn!(%request_id, "replayed request rejected again, ending session");
                self.coordinator
                    .expire_session(sent_with.as_deref(), "credential rejected after refresh")
                    .await;
                Err(Error::SessionExpired(
                    "credential rejected after refresh".into(),
                ))
            }
        }
    }

    /// Issue the request once with whatever credential is current. Returns
    /// the access token it was sent with.
    async fn attempt(&self, mut request: RequestSpec) -> Result<(Response, Option<String>)> {
        let token = self.store.access_token();
        request.headers.remove(AUTHORIZATION);
        if let Some(token) = &token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                Error::Store(session_auth::Error::CredentialParse(format!(
                    "access token is not a valid header value: {e}"
                )))
            })?;
            value.set_sensitive(true);
            request.headers.insert(AUTHORIZATION, value);
        }

        let response = self.transport.send(request).await?;
        Ok((response, token))
    }
}
