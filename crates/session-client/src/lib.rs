//! Authenticated HTTP client with a single-flight token lifecycle
//!
//! Attaches the current access token to every request, detects the
//! expired-credential signal, runs at most one refresh at a time no matter
//! how many requests hit the expiry together, and replays the waiting
//! requests in submission order once the new credential is stored.
//!
//! Request lifecycle:
//! 1. `RequestInterceptor::send` attaches `Authorization: Bearer <access>`
//! 2. 2xx → returned as-is; other failures → surfaced, no refresh
//! 3. Expired signal → `RefreshCoordinator::on_credential_expired`
//! 4. Idle coordinator starts one refresh; busy coordinator queues the request
//! 5. Refresh ok → `RetryDispatcher` replays the sealed batch FIFO, once each
//! 6. Refresh failed → batch rejected with `SessionExpired`, session torn down
//! 7. A replay that is rejected again resolves as `SessionExpired`

pub mod classify;
pub mod client;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod interceptor;
pub mod lifecycle;
pub mod metrics;
pub mod refresh;

#[cfg(test)]
mod testing;

pub use classify::{Outcome, classify_status};
pub use client::{AuthClient, ClientSettings};
pub use coordinator::{RefreshCoordinator, RefreshState, SessionHooks};
pub use dispatcher::{FlushReport, PendingBatch, PendingRequest, Replay, ReplayFuture, RetryDispatcher};
pub use error::{Error, Result};
pub use interceptor::RequestInterceptor;
pub use lifecycle::{AuthLifecycleController, LogoutReason, SessionListener, SessionState};
pub use refresh::spawn_refresh_task;
