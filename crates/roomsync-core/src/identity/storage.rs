//! Storage abstraction for device identity
//!
//! A small key-value interface over durable local storage, with a file-backed
//! implementation for real installations and an in-memory one for tests and
//! as a fallback.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;

use crate::{Result, SyncError};

// ----------------------------------------------------------------------------
// Storage Trait
// ----------------------------------------------------------------------------

/// Key-value storage for identity data
pub trait IdentityStorage: Send + Sync {
    /// Store a value under a key, replacing any previous value
    fn store(&mut self, key: &str, value: &str) -> Result<()>;

    /// Retrieve the value stored under a key
    fn retrieve(&self, key: &str) -> Result<Option<String>>;

    fn delete(&mut self, key: &str) -> Result<()>;

    /// Check if storage is available and accessible
    fn is_available(&self) -> bool;
}

// ----------------------------------------------------------------------------
// File Storage
// ----------------------------------------------------------------------------

/// One file per key inside a data directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && key != "."
            && key != "..";
        if !valid {
            return Err(SyncError::storage_error(format!(
                "invalid storage key {:?}",
                key
            )));
        }
        Ok(self.dir.join(key))
    }
}

impl IdentityStorage for FileStorage {
    fn store(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir).map_err(|e| {
            SyncError::storage_error(format!("cannot create {}: {}", self.dir.display(), e))
        })?;
        fs::write(&path, value)
            .map_err(|e| SyncError::storage_error(format!("cannot write {}: {}", path.display(), e)))
    }

    fn retrieve(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::storage_error(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::storage_error(format!(
                "cannot delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn is_available(&self) -> bool {
        !self.dir.exists() || self.dir.is_dir()
    }
}

// ----------------------------------------------------------------------------
// Memory Storage
// ----------------------------------------------------------------------------

/// In-memory storage, lost when the process exits
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    values: HashMap<String, String>,
    available: bool,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            available: true,
        }
    }

    /// Storage whose every operation fails
    pub fn unavailable() -> Self {
        Self {
            values: HashMap::new(),
            available: false,
        }
    }

    fn check(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(SyncError::storage_error("storage unavailable"))
        }
    }
}

impl IdentityStorage for MemoryStorage {
    fn store(&mut self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.values.get(key).cloned())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.check()?;
        self.values.remove(key);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available
    }
}
