//! JSON-file fallback storage.
//!
//! The whole map is one JSON object. Every mutation rewrites a sibling
//! `.tmp` file and renames it over the original, so readers see either the
//! old or the new map, never a torn write. Contents are cached after the
//! first load; the file is only re-read by a fresh `FileStore`.
//!
//! A file that does not parse reads as an error, and the first write
//! replaces it with a fresh map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use super::{KeyValueStore, StoreError};

pub struct FileStore {
    path: PathBuf,
    cache: Mutex<Option<HashMap<String, String>>>,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cache: Mutex::new(None) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HashMap<String, String>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let json = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Apply `mutate` to the cached map and write the result through.
    ///
    /// A corrupt file is replaced: the mutation starts from an empty map and
    /// the file is rewritten even if `mutate` changed nothing.
    async fn update<F>(&self, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut HashMap<String, String>) -> bool,
    {
        let mut cache = self.cache.lock().await;
        let mut overwrite = false;
        if cache.is_none() {
            let loaded = match self.load().await {
                Ok(entries) => entries,
                Err(StoreError::Corrupt(e)) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "token file corrupt; overwriting");
                    overwrite = true;
                    HashMap::new()
                }
                Err(e) => return Err(e),
            };
            *cache = Some(loaded);
        }
        let entries = cache.get_or_insert_with(HashMap::new);
        if mutate(entries) || overwrite {
            self.persist(entries).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.load().await?);
        }
        Ok(cache.as_ref().and_then(|entries| entries.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
            true
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| entries.remove(key).is_some())
            .await
    }
}

#[cfg(test)]
#[path = "file_test.rs"]
mod tests;
