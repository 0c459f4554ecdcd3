//! Session credentials and token endpoint calls
//!
//! Owns the single current `Credential` (access token, refresh token,
//! absolute expiry) and the two calls that produce one: login and refresh.
//! This crate knows nothing about request replay or single-flight; the
//! session client drives it.
//!
//! Credential flow:
//! 1. Process start: `CredentialStore::open()` hydrates from the backend,
//!    discarding an already-expired credential
//! 2. Login: `TokenApi::login()` → `CredentialStore::set()`
//! 3. Expiry: `TokenApi::refresh()` with the refresh token → `CredentialStore::set()`
//! 4. Logout or failed refresh: `CredentialStore::clear()`

pub mod backend;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use backend::{CredentialBackend, FileBackend, MemoryBackend};
pub use constants::*;
pub use credentials::{Credential, CredentialStore, now_millis};
pub use error::{Error, Result};
pub use token::{HttpTokenApi, LoginCredentials, TokenApi, TokenResponse, login, refresh_token};
