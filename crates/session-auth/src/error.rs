//! Error types for credential storage and token endpoint calls

/// Errors from credential storage and token endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Whether the failure may succeed if retried later (network trouble,
    /// server-side 5xx/429). Rejected credentials and malformed responses
    /// are not transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Http(_))
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
