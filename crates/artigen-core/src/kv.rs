//! Namespaced, synchronous key-value storage.
//!
//! Every value is stored as a JSON string under `"<namespace>:<key>"`. Reads
//! never fail upward: a missing key, a backend error or a value that no longer
//! deserializes all yield the caller's default. Writes report failure with a
//! `false` return instead of an error.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::APP_NAME;
use crate::error::{Error, Result};

/// Raw string storage behind [`Storage`].
pub trait KvBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: String) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Storage("store lock poisoned".to_string()))
}

/// In-process backend; contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
}

impl KvBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn write(&self, key: &str, value: String) -> Result<()> {
        lock(&self.entries)?.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        lock(&self.entries)?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(lock(&self.entries)?.keys().cloned().collect())
    }
}

/// Single-file JSON backend. The whole map is rewritten atomically on every
/// mutation, so a crash never leaves a half-written store behind.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileBackend {
    /// Open or create the store file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let parent = path.parent().unwrap_or(Path::new("."));
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }

        let entries = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("Ignoring unreadable store {}: {err}", path.display());
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer(&mut file, entries)?;
        file.flush()?;
        file.persist(&self.path).map_err(|err| Error::Io(err.error))?;
        Ok(())
    }

    fn mutate(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let mut entries = lock(&self.entries)?;
        let mut next = entries.clone();
        apply(&mut next);
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}

impl KvBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries)?.get(key).cloned())
    }

    fn write(&self, key: &str, value: String) -> Result<()> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value);
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.mutate(|entries| {
            entries.remove(key);
        })
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(lock(&self.entries)?.keys().cloned().collect())
    }
}

/// Cloneable handle to one backend, handing out namespaced views.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn KvBackend>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    pub fn new(backend: impl KvBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Storage that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::default())
    }

    /// Storage persisted to a single JSON file.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(FileBackend::open(path)?))
    }

    /// View restricted to `name`.
    pub fn namespace(&self, name: &str) -> Namespace {
        Namespace {
            backend: Arc::clone(&self.backend),
            prefix: name.to_string(),
        }
    }

    /// Namespace for process-wide state such as the last active module.
    pub fn global(&self) -> Namespace {
        self.namespace(APP_NAME)
    }
}

/// A prefix-scoped view of a [`Storage`].
#[derive(Clone)]
pub struct Namespace {
    backend: Arc<dyn KvBackend>,
    prefix: String,
}

impl Namespace {
    pub fn name(&self) -> &str {
        &self.prefix
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    /// Read and deserialize `key`, falling back to `default` on any failure.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let full_key = self.key(key);
        match self.backend.read(&full_key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => value,
                Err(err) => {
                    warn!("Discarding unreadable value at {full_key}: {err}");
                    default
                }
            },
            Ok(None) => default,
            Err(err) => {
                warn!("Failed to read {full_key}: {err}");
                default
            }
        }
    }

    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        self.get(key, T::default())
    }

    /// Serialize and write `value`; returns `false` if it could not be stored.
    #[must_use]
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let full_key = self.key(key);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Failed to serialize {full_key}: {err}");
                return false;
            }
        };
        match self.backend.write(&full_key, raw) {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to write {full_key}: {err}");
                false
            }
        }
    }

    #[must_use]
    pub fn remove(&self, key: &str) -> bool {
        let full_key = self.key(key);
        match self.backend.delete(&full_key) {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to remove {full_key}: {err}");
                false
            }
        }
    }

    /// Remove every key under this namespace.
    #[must_use]
    pub fn clear(&self) -> bool {
        let prefix = format!("{}:", self.prefix);
        let keys = match self.backend.keys() {
            Ok(keys) => keys,
            Err(err) => {
                warn!("Failed to list keys for {}: {err}", self.prefix);
                return false;
            }
        };
        keys.iter()
            .filter(|key| key.starts_with(&prefix))
            .all(|key| self.backend.delete(key).is_ok())
    }
}
