//! Key-document persistence.
//!
//! Documents are addressed by a logical key such as `data/content_calendar`.
//! Loading never fails: a missing or corrupt document yields the type's default.
//! Saving replaces the whole document or fails, it never leaves a partial write.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::StoreError;

pub const CALENDAR_KEY: &str = "data/content_calendar";
pub const HISTORY_KEY: &str = "data/history";
pub const BACKUP_SCRIPTS_KEY: &str = "data/backup_scripts";
pub const SCRIPT_ARCHIVE_PREFIX: &str = "scripts_archive";

pub trait DocumentStore {
    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T;
    fn save<T: Serialize>(&self, key: &str, doc: &T) -> Result<(), StoreError>;
}

/// JSON files under a root directory, one file per key.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }
}

impl DocumentStore for JsonFileStore {
    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let path = self.path_for(key);
        if !path.exists() {
            debug!(key, "document missing, using default");
            return T::default();
        }
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!(key, "failed to read document, using default: {}", e);
                return T::default();
            }
        };
        match serde_json::from_str(&data) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(key, "corrupt document, using default: {}", e);
                T::default()
            }
        }
    }

    fn save<T: Serialize>(&self, key: &str, doc: &T) -> Result<(), StoreError> {
        let data = serde_json::to_string_pretty(doc).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        let path = self.path_for(key);
        write_replace(&path, data.as_bytes()).map_err(|source| StoreError::Io {
            key: key.to_string(),
            source,
        })?;
        debug!(key, path = %path.display(), "document saved");
        Ok(())
    }
}

/// Writes to a sibling temp file and renames it over the target.
fn write_replace(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// In-process store, used where nothing should touch the disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RefCell<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_raw(&self, key: &str, raw: impl Into<String>) {
        self.docs.borrow_mut().insert(key.to_string(), raw.into());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.docs.borrow().get(key).cloned()
    }
}

impl DocumentStore for MemoryStore {
    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.docs
            .borrow()
            .get(key)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    fn save<T: Serialize>(&self, key: &str, doc: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(doc).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.docs.borrow_mut().insert(key.to_string(), raw);
        Ok(())
    }
}
