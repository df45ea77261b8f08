//! Key-value cache store
//!
//! Persistent string-keyed storage backing the cache coordinator. The
//! disk store keeps a single JSON map in the platform cache directory and
//! rewrites it atomically on every mutation, so an interrupted write can
//! never leave a half-written file behind.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// A store-level write failure (quota, permissions, medium gone)
#[derive(Debug, thiserror::Error)]
#[error("cache store write failed: {0}")]
pub struct StoreError(pub String);

/// String key-value storage with key enumeration.
///
/// The cache coordinator is the only component that reads or writes
/// through this trait; its invalidation and self-healing guarantees
/// depend on that exclusivity.
pub trait KvStore: Send + Sync {
    /// Look up the value stored under `key`
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key` if present
    fn remove(&self, key: &str);

    /// Every key currently present in the store
    fn keys(&self) -> Vec<String>;
}

/// Disk-backed store: one JSON object mapping keys to string values
pub struct FileStore {
    /// Path of the store file
    path: PathBuf,
    /// In-memory view of the store, mirrored to disk on every mutation
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store at the default platform location
    /// (`<cache_dir>/librarian-console/cache.json`), honoring the
    /// `LIBRARIAN_CACHE_DIR` override.
    pub fn open_default() -> Result<Self> {
        let dir = std::env::var("LIBRARIAN_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join("librarian-console")
            });
        Self::open(dir.join("cache.json"))
    }

    /// Open a store file, creating parent directories as needed.
    ///
    /// An unreadable or corrupt store file is not fatal: the store starts
    /// empty and the file is replaced on the next write.
    ///
    /// # Arguments
    /// * `path` - Location of the JSON store file
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {:?}", parent))?;
        }

        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cache store file corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        info!(
            path = %path.display(),
            entries = entries.len(),
            "Cache store opened"
        );

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Rewrite the store file atomically from the in-memory map
    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        let json =
            serde_json::to_vec_pretty(entries).map_err(|e| StoreError(e.to_string()))?;

        let parent = self.path.parent().unwrap_or(Path::new("/tmp"));
        let mut tmp =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| StoreError(e.to_string()))?;
        tmp.write_all(&json).map_err(|e| StoreError(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError(e.to_string()))?;

        Ok(())
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            // Roll back so the in-memory view stays consistent with disk
            match previous {
                Some(old) => {
                    entries.insert(key.to_string(), old);
                }
                None => {
                    entries.remove(key);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap();
        if entries.remove(key).is_some() {
            // A failed rewrite leaves the old value on disk; it will be
            // purged again on the next read that touches it.
            if let Err(e) = self.persist(&entries) {
                warn!(key = key, error = %e, "Failed to persist cache removal");
            }
            debug!(key = key, "Removed cache entry");
        }
    }

    fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

/// In-memory store used by tests and ephemeral sessions.
///
/// `fail_writes` makes every subsequent `set` report a storage failure,
/// which is how coordinator tests exercise the quota-exceeded path.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated write failures
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError("simulated quota exceeded".to_string()));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_store_roundtrip_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let store = FileStore::open(path.clone()).unwrap();
        store.set("catalog_/books", r#"[{"name":"a"}]"#).unwrap();
        store.set("sys_config", r#"{"server":{}}"#).unwrap();
        assert_eq!(
            store.get("catalog_/books").as_deref(),
            Some(r#"[{"name":"a"}]"#)
        );
        drop(store);

        let reopened = FileStore::open(path).unwrap();
        assert_eq!(
            reopened.get("catalog_/books").as_deref(),
            Some(r#"[{"name":"a"}]"#)
        );
        assert_eq!(reopened.get("sys_config").as_deref(), Some(r#"{"server":{}}"#));
    }

    #[test]
    fn test_file_store_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "definitely not json").unwrap();

        let store = FileStore::open(path).unwrap();
        assert!(store.keys().is_empty());
        assert!(store.get("sys_config").is_none());
    }

    #[test]
    fn test_file_store_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("cache.json")).unwrap();

        store.remove("missing");
        store.set("a", "1").unwrap();
        store.remove("a");
        assert!(store.get("a").is_none());
        store.remove("a");
    }

    #[test]
    fn test_file_store_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("cache.json")).unwrap();

        store.set("sys_server_id", "1000").unwrap();
        store.set("sys_server_id", "2000").unwrap();
        assert_eq!(store.get("sys_server_id").as_deref(), Some("2000"));
        assert_eq!(store.keys().len(), 1);
    }

    #[test]
    fn test_memory_store_write_failure_injection() {
        let store = MemoryStore::new();
        store.set("a", "1").unwrap();

        store.fail_writes(true);
        assert!(store.set("b", "2").is_err());
        assert!(store.get("b").is_none());
        // Existing entries are unaffected by a failed write
        assert_eq!(store.get("a").as_deref(), Some("1"));

        store.fail_writes(false);
        store.set("b", "2").unwrap();
        assert_eq!(store.get("b").as_deref(), Some("2"));
    }
}
