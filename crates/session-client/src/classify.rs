//! Response classification for the credential layer
//!
//! Separates the expired-credential signal (one specific status code,
//! configurable, 401 by default) from success and from every other failure.
//! Only the expired signal leads to a refresh; 403 and other 4xx/5xx are
//! the caller's business.

/// What the credential layer does with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx: hand the response back unchanged
    Success,
    /// The access token was rejected as expired: refresh and replay once
    CredentialExpired,
    /// Anything else: surface to the caller, no refresh
    Failure,
}

/// Classify a response status against the configured expired-credential status.
pub fn classify_status(status: u16, expired_status: u16) -> Outcome {
    match status {
        s if s == expired_status => Outcome::CredentialExpired,
        200..=299 => Outcome::Success,
        _ => Outcome::Failure,
    }
}
