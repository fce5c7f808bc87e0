//! Persistent key-value storage capability
//!
//! The token manager and the CLI preferences never touch the filesystem
//! directly; they receive a [`KeyValueStore`] at construction. [`FileStore`]
//! is the durable implementation, [`MemoryStore`] the in-process one used by
//! tests and throwaway sessions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::StorageError;

// ----------------------------------------------------------------------------
// Well-known Keys
// ----------------------------------------------------------------------------

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const THEME_KEY: &str = "theme";

/// Key under which the "tips seen" flag of a page is stored
pub fn tips_seen_key(page: &str) -> String {
    format!("tipsSeen:{}", page)
}

// ----------------------------------------------------------------------------
// Storage Trait
// ----------------------------------------------------------------------------

/// String-keyed persistent store owned by the client process
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Write several entries so that either all of them land or none do
    ///
    /// The default writes one by one and puts back the earlier values if a
    /// later write fails.
    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let mut written: Vec<(&str, Option<String>)> = Vec::with_capacity(entries.len());
        for &(key, value) in entries {
            let previous = self.get(key);
            if let Err(e) = self.set(key, value) {
                for (key, previous) in written.into_iter().rev() {
                    let restored = match previous {
                        Some(previous) => self.set(key, &previous),
                        None => self.remove(key),
                    };
                    if let Err(restore_err) = restored {
                        warn!("Failed to restore {} after a failed write: {}", key, restore_err);
                    }
                }
                return Err(e);
            }
            written.push((key, previous));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Memory Storage Implementation
// ----------------------------------------------------------------------------

/// In-memory store for testing and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.data.lock().remove(key);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// File Storage Implementation
// ----------------------------------------------------------------------------

/// JSON file backed store
///
/// The whole map is rewritten on every mutation through a temporary file and
/// a rename, so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// File name used inside a data directory
    pub const FILE_NAME: &'static str = "session.json";

    /// Open the store at `path`, treating a missing file as empty
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            BTreeMap::new()
        };

        debug!("Opened session store at {} ({} entries)", path.display(), data.len());

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Open `session.json` inside `dir`, creating the directory if needed
    pub fn in_dir(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir.as_ref())?;
        Self::open(dir.as_ref().join(Self::FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let serialized = serde_json::to_string_pretty(data)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.set_all(&[(key, value)])
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut data = self.data.lock();
        let Some(previous) = data.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&data) {
            data.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    /// One rewrite for the whole batch; the map is rolled back if it fails
    fn set_all(&self, entries: &[(&str, &str)]) -> Result<(), StorageError> {
        let mut data = self.data.lock();
        let previous: Vec<(&str, Option<String>)> = entries
            .iter()
            .map(|(key, value)| (*key, data.insert(key.to_string(), value.to_string())))
            .collect();

        if let Err(e) = self.persist(&data) {
            for (key, previous) in previous.into_iter().rev() {
                match previous {
                    Some(previous) => data.insert(key.to_string(), previous),
                    None => data.remove(key),
                };
            }
            return Err(e);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
