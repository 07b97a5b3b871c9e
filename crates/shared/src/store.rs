use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::PersistenceError;

/// String-keyed, string-valued persistence. Values are JSON documents.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    async fn put(&self, key: &str, value: String) -> Result<(), PersistenceError>;
}

/// In-process store; state is dropped when the run ends.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        (**self).put(key, value).await
    }
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for &T {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        (**self).put(key, value).await
    }
}

/// All keys in one pretty-printed JSON object on disk. Every `put` rewrites
/// the file; the crawler writes a handful of keys per run.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self, key: &str) -> Result<BTreeMap<String, String>, PersistenceError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                PersistenceError::new(key, format!("corrupt store {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(PersistenceError::new(
                key,
                format!("failed to read {}: {}", self.path.display(), e),
            )),
        }
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all(key).await?.remove(key))
    }

    async fn put(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all(key).await?;
        entries.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::new(key, e))?;
        }

        let json = serde_json::to_string_pretty(&entries).map_err(|e| PersistenceError::new(key, e))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| PersistenceError::new(key, format!("failed to write {}: {}", self.path.display(), e)))
    }
}
