//! The current session credential and its store
//!
//! `CredentialStore` holds at most one credential. Reads are synchronous
//! snapshot clones from an in-memory copy; writes are serialized by a tokio
//! Mutex, persisted through the backend first, and only then swapped into
//! memory as a whole. A reader therefore sees either the old pair of tokens
//! or the new pair, never one of each.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backend::{CredentialBackend, MemoryBackend};
use crate::error::Result;

/// Access/refresh token pair for the logged-in session.
///
/// `expires_at` is a unix timestamp in milliseconds (absolute, not a delta).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Bearer token for ordinary API calls
    pub access_token: String,
    /// Token used only against the refresh endpoint
    pub refresh_token: String,
    /// Expiration as unix timestamp in milliseconds
    pub expires_at: u64,
}

impl Credential {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= now_millis()
    }

    /// True when the access token expires within `threshold` from now.
    pub fn expires_within(&self, threshold: Duration) -> bool {
        self.expires_at <= now_millis().saturating_add(threshold.as_millis() as u64)
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Single-slot credential store with pluggable persistence.
pub struct CredentialStore {
    backend: Box<dyn CredentialBackend>,
    current: RwLock<Option<Credential>>,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    /// Open the store and hydrate from the backend.
    ///
    /// A persisted credential that has already expired is dropped and removed
    /// from the backend, so the session starts logged out.
    pub async fn open(backend: impl CredentialBackend + 'static) -> Result<Self> {
        let backend: Box<dyn CredentialBackend> = Box::new(backend);
        let current = match backend.load().await? {
            Some(credential) if credential.is_expired() => {
                info!("persisted credential expired, starting logged out");
                backend.remove().await?;
                None
            }
            Some(credential) => {
                info!(expires_at = credential.expires_at, "restored persisted credential");
                Some(credential)
            }
            None => {
                debug!("no persisted credential");
                None
            }
        };

        Ok(Self {
            backend,
            current: RwLock::new(current),
            write_lock: Mutex::new(()),
        })
    }

    /// Store without persistence, starting empty.
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryBackend::new()),
            current: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    /// Snapshot of the current credential.
    pub fn get(&self) -> Option<Credential> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Access token of the current credential, if any.
    pub fn access_token(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    /// Replace the current credential and persist it.
    ///
    /// On persistence failure the in-memory credential is left unchanged.
    pub async fn set(&self, credential: Credential) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.backend.save(&credential).await?;
        let expires_at = credential.expires_at;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(credential);
        debug!(expires_at, "stored credential");
        Ok(())
    }

    /// Replace the credential only if the current one still carries
    /// `expected_refresh`. Returns `false` (and writes nothing) when the
    /// session was cleared or replaced while the caller was refreshing.
    pub async fn compare_and_set(
        &self,
        expected_refresh: &str,
        credential: Credential,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let unchanged = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|c| c.refresh_token == expected_refresh);
        if !unchanged {
            debug!("credential changed during refresh, discarding refreshed credential");
            return Ok(false);
        }
        self.backend.save(&credential).await?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(credential);
        Ok(true)
    }

    /// Remove the credential from memory and from the backend.
    ///
    /// Memory is cleared even if the backend removal fails, so a failed
    /// logout never leaves a usable token behind in-process.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.backend.remove().await?;
        debug!("cleared credential");
        Ok(())
    }

    /// Clear the credential only if it still carries `expected_refresh`.
    /// Returns `false` (and removes nothing) when the session was cleared or
    /// replaced in the meantime.
    pub async fn clear_if_current(&self, expected_refresh: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if !current
                .as_ref()
                .is_some_and(|c| c.refresh_token == expected_refresh)
            {
                return Ok(false);
            }
            *current = None;
        }
        self.backend.remove().await?;
        debug!("cleared credential");
        Ok(true)
    }

    pub fn is_empty(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
