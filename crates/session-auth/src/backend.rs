//! Persistence backends for the session credential
//!
//! `FileBackend` keeps a JSON object file mapping storage keys to values;
//! the session credential lives under one fixed key and any other keys in
//! the file are preserved. All writes use atomic temp-file + rename to
//! prevent corruption on crash. `MemoryBackend` keeps nothing across
//! restarts and is used for tests and ephemeral sessions.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use serde_json::{Map, Value};
use tracing::debug;

use crate::credentials::Credential;
use crate::error::{Error, Result};

/// Where the current credential is persisted.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Box<dyn CredentialBackend>`). Callers serialize writes; backends only
/// need each call to be all-or-nothing.
pub trait CredentialBackend: Send + Sync {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<Credential>>> + Send + '_>>;

    fn save<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn remove(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// JSON file backend storing the credential under a fixed key.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    key: String,
}

impl FileBackend {
    pub fn new(path: PathBuf, key: impl Into<String>) -> Self {
        Self {
            path,
            key: key.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&contents)
            .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))
    }
}

impl CredentialBackend for FileBackend {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<Credential>>> + Send + '_>> {
        Box::pin(async move {
            let mut map = self.read_map().await?;
            let Some(value) = map.remove(&self.key) else {
                return Ok(None);
            };
            let credential: Credential = serde_json::from_value(value).map_err(|e| {
                Error::CredentialParse(format!("parsing credential under {:?}: {e}", self.key))
            })?;
            debug!(path = %self.path.display(), key = %self.key, "loaded credential");
            Ok(Some(credential))
        })
    }

    fn save<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut map = self.read_map().await?;
            let value = serde_json::to_value(credential)
                .map_err(|e| Error::CredentialParse(format!("serializing credential: {e}")))?;
            map.insert(self.key.clone(), value);
            write_atomic(&self.path, &map).await
        })
    }

    fn remove(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.path.exists() {
                return Ok(());
            }
            let mut map = self.read_map().await?;
            if map.remove(&self.key).is_some() {
                write_atomic(&self.path, &map).await?;
            }
            Ok(())
        })
    }
}

/// In-process backend; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<Credential>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that hydrates with `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialBackend for MemoryBackend {
    fn load(&self) -> Pin<Box<dyn Future<Output = Result<Option<Credential>>> + Send + '_>> {
        let current = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Box::pin(async move { Ok(current) })
    }

    fn save<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        Box::pin(async { Ok(()) })
    }

    fn remove(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Box::pin(async { Ok(()) })
    }
}

/// Write the storage map to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains bearer tokens.
async fn write_atomic(path: &Path, data: &Map<String, Value>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credential file: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "credentials".into());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential file");
    Ok(())
}
