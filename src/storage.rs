use crate::error::StorageError;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;

pub const DASHBOARD_KEY: &str = "dashboard";
pub const WEATHER_KEY: &str = "weather";
pub const CALENDAR_KEY: &str = "calendar";

/// String values under string keys, the way a browser storage area works.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// One `<key>.json` file per key under `root`. Writes replace the file
/// atomically.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStore { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn io_error(key: &str, source: std::io::Error) -> StorageError {
        StorageError::Io {
            key: key.to_string(),
            source,
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::io_error(key, err)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).map_err(|e| Self::io_error(key, e))?;
        let path = self.path_for(key);
        debug!(file = %path.display(), bytes = value.len(), "writing store entry");
        let mut temp = NamedTempFile::new_in(&self.root).map_err(|e| Self::io_error(key, e))?;
        temp.write_all(value.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(|e| Self::io_error(key, e))?;
        temp.persist(&path)
            .map_err(|e| Self::io_error(key, e.error))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io_error(key, err)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While failing, every operation reports the store as unavailable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store disabled".into()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|err| StorageError::Unavailable(format!("memory store lock poisoned: {err}")))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Where durable data, session tokens, config and logs live.
#[derive(Debug, Clone)]
pub struct Paths {
    pub data_dir: PathBuf,
    pub session_dir: PathBuf,
    pub config_file: PathBuf,
}

impl Paths {
    pub fn resolve(data_override: Option<&Path>, config_override: Option<&Path>) -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "lookout").context("locating data directory")?;
        let data_dir = data_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dirs.data_dir().to_path_buf());
        let session_dir = match data_override {
            Some(dir) => dir.join("session"),
            None => dirs.cache_dir().join("session"),
        };
        let config_file = config_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dirs.config_dir().join("config.yml"));
        Ok(Paths {
            data_dir,
            session_dir,
            config_file,
        })
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("lookout.log")
    }

    pub fn durable_store(&self) -> FileStore {
        FileStore::new(&self.data_dir)
    }

    pub fn session_store(&self) -> FileStore {
        FileStore::new(&self.session_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip_and_failure() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        store.set_failing(true);
        assert!(store.set("k", "w").is_err());
        assert!(store.get("k").is_err());

        store.set_failing(false);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn file_store_names_files_after_keys() {
        let store = FileStore::new("/tmp/lookout-test");
        assert_eq!(
            store.path_for(DASHBOARD_KEY),
            PathBuf::from("/tmp/lookout-test/dashboard.json")
        );
    }
}
