//! Error taxonomy seen by callers of the session client
//!
//! The expired-credential signal never appears here: it is recovered
//! internally by one refresh + one replay. What callers can observe is
//! either terminal (`SessionExpired`) or surfaced verbatim from the request
//! (`Network`, `Server`).

use transport::{Response, TransportError};

/// Errors returned by `send`, `login`, and `logout`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session cannot be recovered; the caller should expect a logout.
    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("network error: {0}")]
    Network(#[from] TransportError),

    /// Non-success response other than the expired-credential signal.
    #[error("server returned status {}", .0.status)]
    Server(Response),

    #[error("login failed: {0}")]
    Login(#[source] session_auth::Error),

    #[error("credential store error: {0}")]
    Store(#[source] session_auth::Error),
}

impl Error {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::SessionExpired(_))
    }

    /// Status code of a `Server` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Server(response) => Some(response.status),
            _ => None,
        }
    }
}

/// Result alias for session client operations.
pub type Result<T> = std::result::Result<T, Error>;
