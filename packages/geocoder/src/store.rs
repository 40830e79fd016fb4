//! Durable key-value storage for serialized caches.
//!
//! The geocode cache is written as a single JSON document under one key.
//! [`FileCacheStore`] keeps one file per key under a data directory;
//! [`MemoryCacheStore`] is used by tests and short-lived tools.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::GeocodeError;

/// Key under which the geocode cache is persisted.
pub const GEOCODE_CACHE_KEY: &str = "geocoding_cache";

/// A durable string store.
pub trait CacheStore: Send + Sync {
    /// Reads the value stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Io`] if the backing storage can't be read.
    fn load(&self, key: &str) -> Result<Option<String>, GeocodeError>;

    /// Replaces the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Io`] if the backing storage can't be written.
    fn save(&self, key: &str, value: &str) -> Result<(), GeocodeError>;
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the workspace `data/` directory.
    ///
    /// # Panics
    ///
    /// Panics if the project root cannot be resolved.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .ancestors()
            .nth(2)
            .expect("Failed to find project root from CARGO_MANIFEST_DIR")
            .join("data")
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl CacheStore for FileCacheStore {
    fn load(&self, key: &str) -> Result<Option<String>, GeocodeError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), GeocodeError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
        }
        // Write-then-rename so a crash mid-write never leaves a torn file.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `key = value`.
    #[must_use]
    pub fn with_entry(key: &str, value: &str) -> Self {
        let store = Self::default();
        if let Ok(mut entries) = store.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
        store
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self, key: &str) -> Result<Option<String>, GeocodeError> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), GeocodeError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

fn poisoned() -> GeocodeError {
    GeocodeError::Io(std::io::Error::other("memory store mutex poisoned"))
}
