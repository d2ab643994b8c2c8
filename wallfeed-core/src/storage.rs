use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::{debug, error, info};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Process-wide persisted key-value store.
///
/// Every write is applied as a unit: either all entries of a `write` land or
/// none do. Read-modify-write sequences built on top of this are not atomic
/// across processes; two sessions sharing one store can lose updates.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Applies `set` then `remove` in one step.
    fn write(&mut self, set: Vec<(String, Value)>, remove: Vec<String>) -> Result<(), StoreError>;

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.write(vec![(key.to_string(), value)], Vec::new())
    }

    fn remove(&mut self, keys: Vec<String>) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.write(Vec::new(), keys)
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn write(&mut self, set: Vec<(String, Value)>, remove: Vec<String>) -> Result<(), StoreError> {
        for (key, value) in set {
            self.entries.insert(key, value);
        }
        for key in remove {
            self.entries.remove(&key);
        }
        Ok(())
    }
}

/// JSON-file backed store. The whole map is rewritten through a temporary
/// file and renamed into place, so a failed write leaves the old file intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl FileStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let entries = if path.exists() {
            let content = fs::read_to_string(path).map_err(|source| StoreError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
                    path: path.to_path_buf(),
                    source,
                })?
            }
        } else {
            Map::new()
        };
        debug!("Opened store {:?} with {} keys", path, entries.len());

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &Map<String, Value>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(entries).map_err(|source| StoreError::Encode {
            key: "*".to_string(),
            source,
        })?;
        let tmp_path = self.path.with_extension("json.tmp");
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        fs::write(&tmp_path, content).map_err(write_err)?;
        fs::rename(&tmp_path, &self.path).map_err(write_err)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn write(&mut self, set: Vec<(String, Value)>, remove: Vec<String>) -> Result<(), StoreError> {
        let mut next = self.entries.clone();
        for (key, value) in set {
            next.insert(key, value);
        }
        for key in remove {
            next.remove(&key);
        }

        match self.persist(&next) {
            Ok(()) => {
                self.entries = next;
                Ok(())
            }
            Err(e) => {
                error!("Store update aborted: {}", e);
                Err(e)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub config_dir: PathBuf,
    pub store_file: PathBuf,
}

impl Config {
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "wallfeed", "wallfeed")
            .context("Failed to get project directories")?;

        let config_dir = proj_dirs.config_dir().to_path_buf();
        let store_file = config_dir.join("store.json");

        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config dir {:?}", config_dir))?;
        info!("Using store file {:?}", store_file);

        Ok(Config {
            config_dir,
            store_file,
        })
    }

    pub fn with_store_file(store_file: PathBuf) -> Result<Self> {
        let config_dir = store_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config dir {:?}", config_dir))?;

        Ok(Config {
            config_dir,
            store_file,
        })
    }

    pub fn open_store(&self) -> Result<FileStore> {
        FileStore::open(&self.store_file)
            .with_context(|| format!("Failed to open store {:?}", self.store_file))
    }
}
