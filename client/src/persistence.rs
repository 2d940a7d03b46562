use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared::User;
use tracing::debug;

/// Durable mirror of the authenticated session, one slot only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub access_token: String,
    pub user: User,
}

#[derive(thiserror::Error, Debug)]
pub enum PersistenceError {
    #[error("session_storage_io: {0}")]
    Io(#[from] io::Error),
    #[error("session_storage_format: {0}")]
    Format(#[from] serde_json::Error),
}

pub trait SessionPersistence: Send + Sync {
    fn load(&self) -> Result<Option<PersistedSession>, PersistenceError>;
    fn save(&self, record: &PersistedSession) -> Result<(), PersistenceError>;
    fn clear(&self) -> Result<(), PersistenceError>;
}

/// Stores the record as a JSON document, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileSessionPersistence {
    path: PathBuf,
}

impl FileSessionPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "session".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionPersistence for FileSessionPersistence {
    fn load(&self) -> Result<Option<PersistedSession>, PersistenceError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let record = serde_json::from_str::<PersistedSession>(&content)?;
        debug!(path = ?self.path, user_id = %record.user.id, "Session record loaded");
        Ok(Some(record))
    }

    fn save(&self, record: &PersistedSession) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let payload = serde_json::to_vec_pretty(record)?;
        let staging = self.staging_path();
        {
            let mut options = fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&staging)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &self.path)?;
        debug!(path = ?self.path, user_id = %record.user.id, "Session record saved");
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = ?self.path, "Session record removed");
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// In-process slot, for tests and for sessions that should not outlive the
/// process.
#[derive(Debug, Default)]
pub struct MemorySessionPersistence {
    slot: Mutex<Option<PersistedSession>>,
}

impl MemorySessionPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: PersistedSession) -> Self {
        Self {
            slot: Mutex::new(Some(record)),
        }
    }
}

impl SessionPersistence for MemorySessionPersistence {
    fn load(&self) -> Result<Option<PersistedSession>, PersistenceError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, record: &PersistedSession) -> Result<(), PersistenceError> {
        *self.slot.lock() = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        self.slot.lock().take();
        Ok(())
    }
}
