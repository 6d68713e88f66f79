use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{CredentialPayload, CredentialStore, StorageError};
use crate::config;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredentials {
    pub payload: CredentialPayload,
    pub stored_at: DateTime<Utc>,
}

/// Credentials for every app the operator has logged into, keyed by app id,
/// in a single JSON file.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_location() -> Result<Self, StorageError> {
        let dir =
            config::global_config_dir().map_err(|e| StorageError::Location(e.to_string()))?;
        Ok(Self::new(dir.join("credentials.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_all(&self) -> Result<BTreeMap<String, StoredCredentials>, StorageError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StorageError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents).map_err(|source| StorageError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    pub fn load(&self, app_id: &str) -> Result<Option<StoredCredentials>, StorageError> {
        Ok(self.load_all()?.remove(app_id))
    }

    pub fn remove(&self, app_id: &str) -> Result<bool, StorageError> {
        let mut all = self.load_all()?;
        if all.remove(app_id).is_none() {
            return Ok(false);
        }
        self.save_all(&all)?;
        Ok(true)
    }

    fn save_all(&self, all: &BTreeMap<String, StoredCredentials>) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(all).map_err(StorageError::Serialize)?;
        write_private(&self.path, json.as_bytes()).map_err(|source| StorageError::Write {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), apps = all.len(), "credentials saved");
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn store(&self, payload: &CredentialPayload, app_id: &str) -> Result<(), StorageError> {
        let mut all = self.load_all()?;
        all.insert(
            app_id.to_string(),
            StoredCredentials {
                payload: payload.clone(),
                stored_at: Utc::now(),
            },
        );
        self.save_all(&all)
    }
}

/// Temp file, fsync, rename. The file is readable by the owner only.
fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&temp_path)?;
    file.write_all(contents)?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}
