//! Credential storage.
//!
//! [`FileCredentialStore`] keeps the token in a single file under the
//! platform data directory:
//! - Linux:   `~/.local/share/murmur/credential`
//! - macOS:   `~/Library/Application Support/com.murmur.murmur/credential`
//! - Windows: `{FOLDERID_RoamingAppData}\murmur\murmur\data\credential`

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use directories::ProjectDirs;
use tempfile::NamedTempFile;

use crate::error::{Result, StoreError};

const CREDENTIAL_FILE: &str = "credential";

/// Opaque get/set/clear of the bearer token.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> Result<Option<String>>;
    fn set(&self, token: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Store inside the default application data directory.
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "murmur", "murmur").ok_or(StoreError::NoDataDir)?;
        Ok(Self::open_at(project_dirs.data_dir()))
    }

    /// Store inside an explicit directory (tests, custom layouts).
    pub fn open_at(dir: &Path) -> Self {
        Self {
            path: dir.join(CREDENTIAL_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, token: &str) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        // Owner-only from creation, renamed over the old token when complete.
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(token.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        tracing::debug!(path = %self.path.display(), "credential stored");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "credential cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Volatile store for tests and hosts that persist the token themselves.
#[derive(Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<String>> {
        Ok(self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn set(&self, token: &str) -> Result<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
