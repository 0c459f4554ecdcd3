//! Single-flight refresh coordination
//!
//! Owns the refresh state machine. However many requests detect an expired
//! credential together, exactly one refresh call is in flight; every other
//! request joins the queue of that cycle and is replayed (or rejected) when
//! it settles.
//!
//! State transitions:
//! - Idle → Refreshing (first expiry detection, or proactive refresh)
//! - Refreshing → Idle (refresh stored, queue sealed and replayed)
//! - Refreshing → Failed → Idle (queue rejected, session torn down)
//!
//! The phase lock is a std Mutex and is never held across an await. Lock
//! order is phase, then dispatcher queue, then session hooks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use session_auth::{Credential, CredentialStore, TokenApi};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use transport::Response;

use crate::dispatcher::{PendingRequest, Replay, RetryDispatcher};
use crate::error::{Error, Result};
use crate::metrics;

/// Refresh state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
    /// Teardown after a failed refresh is in progress
    Failed,
}

/// Session-level notifications raised by the coordinator.
///
/// Implementations must not call back into the coordinator.
pub trait SessionHooks: Send + Sync {
    fn refresh_started(&self, _cycle: u64) {}

    fn refresh_settled(&self, _cycle: u64) {}

    /// The session cannot be recovered and its credential has been cleared.
    fn session_expired(&self, reason: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Expired,
    Proactive,
}

impl Trigger {
    fn label(self) -> &'static str {
        match self {
            Trigger::Expired => "expired",
            Trigger::Proactive => "proactive",
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RefreshFailure {
    #[error("refresh endpoint failed: {0}")]
    Endpoint(session_auth::Error),

    #[error("refresh timed out after {0:?}")]
    Timeout(Duration),

    #[error("storing refreshed credential failed: {0}")]
    Store(session_auth::Error),

    /// The session was cleared or replaced while the refresh was in flight.
    #[error("session changed during refresh")]
    Superseded,
}

impl RefreshFailure {
    fn is_transient(&self) -> bool {
        match self {
            RefreshFailure::Endpoint(e) => e.is_transient(),
            RefreshFailure::Timeout(_) => true,
            _ => false,
        }
    }
}

struct Phase {
    state: RefreshState,
    cycle: u64,
}

/// What a request that hit the expired signal does next.
enum Admission {
    Reject(&'static str),
    ReplayNow(Replay),
    Wait(u64, oneshot::Receiver<Result<Response>>),
}

/// Runs at most one credential refresh at a time and settles the requests
/// that queued behind it.
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    token_api: Arc<dyn TokenApi>,
    dispatcher: RetryDispatcher,
    hooks: Arc<dyn SessionHooks>,
    refresh_timeout: Duration,
    phase: Mutex<Phase>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        token_api: Arc<dyn TokenApi>,
        hooks: Arc<dyn SessionHooks>,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            store,
            token_api,
            dispatcher: RetryDispatcher::new(),
            hooks,
            refresh_timeout,
            phase: Mutex::new(Phase {
                state: RefreshState::Idle,
                cycle: 0,
            }),
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> RefreshState {
        self.phase().state
    }

    /// Number of refresh cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.phase().cycle
    }

    /// Requests waiting on the refresh in flight.
    pub fn pending(&self) -> usize {
        self.dispatcher.len()
    }

    /// Handle a request whose attempt with `sent_with` was rejected as
    /// expired. Resolves with the result of the request's single replay, or
    /// `SessionExpired` if the session cannot be refreshed.
    pub async fn on_credential_expired(
        self: &Arc<Self>,
        sent_with: Option<String>,
        execute: Replay,
    ) -> Result<Response> {
        let admission = {
            let mut phase = self.phase();
            match phase.state {
                RefreshState::Failed => Admission::Reject("session refresh failed"),
                RefreshState::Refreshing => {
                    let (pending, receiver) = PendingRequest::new(execute);
                    self.dispatcher.enqueue(pending);
                    Admission::Wait(phase.cycle, receiver)
                }
                RefreshState::Idle => match self.store.access_token() {
                    None => Admission::Reject("not logged in"),
                    Some(current) if Some(&current) != sent_with.as_ref() => {
                        Admission::ReplayNow(execute)
                    }
                    Some(_) => {
                        phase.state = RefreshState::Refreshing;
                        phase.cycle += 1;
                        let cycle = phase.cycle;
                        let (pending, receiver) = PendingRequest::new(execute);
                        self.dispatcher.enqueue(pending);
                        self.hooks.refresh_started(cycle);

                        let this = Arc::clone(self);
                        tokio::spawn(async move {
                            this.run_cycle(cycle, Trigger::Expired).await;
                        });
                        Admission::Wait(cycle, receiver)
                    }
                },
            }
        };

        match admission {
            Admission::Reject(reason) => {
                debug!(reason, "expired credential cannot be refreshed");
                Err(Error::SessionExpired(reason.into()))
            }
            Admission::ReplayNow(execute) => {
                debug!("credential replaced since request was sent, replaying without refresh");
                metrics::record_replay("stale_token");
                execute().await
            }
            Admission::Wait(cycle, receiver) => match receiver.await {
                Ok(result) => result,
                Err(_) => {
                    warn!(cycle, "refresh cycle dropped a waiting request");
                    Err(Error::SessionExpired("refresh abandoned".into()))
                }
            },
        }
    }

    /// Refresh if idle and the current credential expires within
    /// `threshold`. Returns whether a refresh cycle ran.
    ///
    /// The cycle runs on its own task and settles even if the returned
    /// future is dropped.
    pub async fn refresh_if_expiring(self: &Arc<Self>, threshold: Duration) -> bool {
        let cycle = {
            let mut phase = self.phase();
            if phase.state != RefreshState::Idle {
                return false;
            }
            match self.store.get() {
                Some(credential) if credential.expires_within(threshold) => {}
                _ => return false,
            }
            phase.state = RefreshState::Refreshing;
            phase.cycle += 1;
            self.hooks.refresh_started(phase.cycle);
            phase.cycle
        };

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            this.run_cycle(cycle, Trigger::Proactive).await;
        });
        if let Err(e) = task.await {
            warn!(cycle, error = %e, "proactive refresh task failed");
        }
        true
    }

    /// Reject every queued request with `SessionExpired`. The refresh in
    /// flight, if any, keeps running. Returns the number of callers rejected.
    pub fn cancel_pending(&self, reason: &str) -> usize {
        let batch = {
            let _phase = self.phase();
            self.dispatcher.seal()
        };
        if batch.is_empty() {
            return 0;
        }
        info!(queued = batch.len(), reason, "rejecting requests waiting on refresh");
        batch.flush_with_failure(|| Error::SessionExpired(reason.to_string()))
    }

    /// Tear the session down after a replayed request was rejected again.
    ///
    /// Skipped when the session has moved on to a credential other than
    /// `rejected_token` (new login or a later refresh).
    pub async fn expire_session(&self, rejected_token: Option<&str>, reason: &str) {
        if let Some(current) = self.store.access_token()
            && Some(current.as_str()) != rejected_token
        {
            debug!("credential replaced since replay, keeping session");
            return;
        }
        self.teardown(reason).await;
    }

    async fn teardown(&self, reason: &str) {
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to remove persisted credential");
        }
        self.hooks.session_expired(reason);
    }

    /// Teardown limited to the session that owned `refresh_token`. A login
    /// that landed during the failed refresh survives it.
    async fn teardown_if_current(&self, refresh_token: &str, reason: &str) {
        match self.store.clear_if_current(refresh_token).await {
            Ok(true) => self.hooks.session_expired(reason),
            Ok(false) => debug!("credential replaced during failed refresh, keeping session"),
            Err(e) => {
                // Memory is cleared even when the backend removal fails
                warn!(error = %e, "failed to remove persisted credential");
                self.hooks.session_expired(reason);
            }
        }
    }

    fn holds_refresh_token(&self, refresh_token: &str) -> bool {
        self.store
            .get()
            .is_some_and(|c| c.refresh_token == refresh_token)
    }

    async fn run_cycle(&self, cycle: u64, trigger: Trigger) {
        let started = Instant::now();
        info!(cycle, trigger = trigger.label(), "token refresh started");

        let Some(current) = self.store.get() else {
            self.settle_superseded(cycle, started).await;
            return;
        };

        let failure = match self.exchange(&current).await {
            Ok(()) => {
                let batch = {
                    let mut phase = self.phase();
                    phase.state = RefreshState::Idle;
                    self.dispatcher.seal()
                };
                metrics::record_refresh("success", started.elapsed());
                info!(cycle, queued = batch.len(), "token refresh succeeded");
                self.hooks.refresh_settled(cycle);

                let report = batch.flush_with_success().await;
                debug!(
                    cycle,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    abandoned = report.abandoned,
                    "replayed queued requests"
                );
                return;
            }
            Err(RefreshFailure::Superseded) => {
                self.settle_superseded(cycle, started).await;
                return;
            }
            Err(failure) => failure,
        };

        // The rejected refresh token no longer backs the session
        if !self.holds_refresh_token(&current.refresh_token) {
            debug!(cycle, error = %failure, "refresh failed for a replaced credential");
            self.settle_superseded(cycle, started).await;
            return;
        }

        let batch = {
            let mut phase = self.phase();
            if trigger == Trigger::Proactive
                && failure.is_transient()
                && self.dispatcher.is_empty()
            {
                phase.state = RefreshState::Idle;
                None
            } else {
                phase.state = RefreshState::Failed;
                Some(self.dispatcher.seal())
            }
        };

        let Some(batch) = batch else {
            metrics::record_refresh("soft_failure", started.elapsed());
            warn!(cycle, error = %failure, "proactive refresh failed, will retry next tick");
            self.hooks.refresh_settled(cycle);
            return;
        };

        metrics::record_refresh("failure", started.elapsed());
        warn!(cycle, error = %failure, queued = batch.len(), "token refresh failed, ending session");

        let reason = failure.to_string();
        batch.flush_with_failure(|| Error::SessionExpired(reason.clone()));
        self.teardown_if_current(&current.refresh_token, &reason).await;

        self.phase().state = RefreshState::Idle;
    }

    /// Settle a cycle whose session was cleared or replaced while it ran.
    /// Waiting requests follow whatever session is current now.
    async fn settle_superseded(&self, cycle: u64, started: Instant) {
        let batch = {
            let mut phase = self.phase();
            phase.state = RefreshState::Idle;
            self.dispatcher.seal()
        };
        metrics::record_refresh("superseded", started.elapsed());
        info!(cycle, queued = batch.len(), "session changed during refresh, discarding result");
        self.hooks.refresh_settled(cycle);

        if self.store.is_empty() {
            batch.flush_with_failure(|| Error::SessionExpired("logged out".into()));
        } else {
            batch.flush_with_success().await;
        }
    }

    /// One refresh call, compare-and-set into the store.
    async fn exchange(&self, current: &Credential) -> std::result::Result<(), RefreshFailure> {
        let response = tokio::time::timeout(
            self.refresh_timeout,
            self.token_api.refresh(&current.refresh_token),
        )
        .await
        .map_err(|_| RefreshFailure::Timeout(self.refresh_timeout))?
        .map_err(RefreshFailure::Endpoint)?;

        let credential = response
            .into_credential(Some(&current.refresh_token))
            .map_err(RefreshFailure::Endpoint)?;

        match self
            .store
            .compare_and_set(&current.refresh_token, credential)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => Err(RefreshFailure::Superseded),
            Err(e) => Err(RefreshFailure::Store(e)),
        }
    }
}
