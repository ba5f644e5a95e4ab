use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs;
use tracing::{debug, instrument};

mod session;

pub use session::SessionStore;

/// Record holding the serialized session mirror.
pub const SESSION_KEY: &str = "session";
/// Record holding the armed generation job.
pub const PENDING_GENERATION_KEY: &str = "pending_generation";

/// Storage scope that outlives a single run of the client.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// One JSON file per key under `root`.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            bail!("invalid storage key: {key:?}");
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.record_path(key)?;
        let exists = fs::try_exists(&path)
            .await
            .with_context(|| format!("failed checking record {path:?}"))?;
        if !exists {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed reading record {path:?}"))?;
        Ok(Some(raw))
    }

    #[instrument(skip(self, value), fields(root = %self.root.display(), bytes = value.len()))]
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.record_path(key)?;
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create state dir {:?}", self.root))?;

        // Write-then-rename so readers never observe a partial record.
        let staging = self.root.join(format!(".{key}.json.tmp"));
        fs::write(&staging, value)
            .await
            .with_context(|| format!("failed writing record {staging:?}"))?;
        fs::rename(&staging, &path)
            .await
            .with_context(|| format!("failed moving record into place {path:?}"))?;
        debug!("record written");
        Ok(())
    }

    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.record_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("record removed");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed removing record {path:?}")),
        }
    }
}

/// Process-local scope. Clones share the same entries, so a clone handed to a
/// freshly built client behaves like storage surviving a reload.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use tokio::fs;

    use crate::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    #[tokio::test]
    async fn file_store_round_trips_and_removes() -> Result<()> {
        let root = unique_test_root("tutorgen-kv");
        let store = FileKeyValueStore::new(&root);

        assert_eq!(store.get("session").await?, None);
        store.put("session", r#"{"a":1}"#).await?;
        assert_eq!(store.get("session").await?.as_deref(), Some(r#"{"a":1}"#));

        store.put("session", r#"{"a":2}"#).await?;
        assert_eq!(store.get("session").await?.as_deref(), Some(r#"{"a":2}"#));
        assert!(!fs::try_exists(root.join(".session.json.tmp")).await?);

        store.remove("session").await?;
        assert_eq!(store.get("session").await?, None);
        store.remove("session").await?;

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn file_store_surfaces_unreadable_root() -> Result<()> {
        let root = unique_test_root("tutorgen-kv-not-a-dir");
        fs::write(&root, "occupied").await?;
        let store = FileKeyValueStore::new(&root);

        let err = store.get("session").await.unwrap_err();
        assert!(format!("{err:#}").contains("failed checking record"));

        let _ = fs::remove_file(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn file_store_rejects_path_like_keys() {
        let store = FileKeyValueStore::new(unique_test_root("tutorgen-kv-keys"));
        let err = store.put("../escape", "x").await.unwrap_err();
        assert!(err.to_string().contains("invalid storage key"));
    }

    #[tokio::test]
    async fn memory_store_clones_share_entries() -> Result<()> {
        let store = MemoryKeyValueStore::new();
        let reloaded = store.clone();
        store.put("pending_generation", "{}").await?;
        assert!(reloaded.contains("pending_generation"));
        reloaded.remove("pending_generation").await?;
        assert_eq!(store.get("pending_generation").await?, None);
        Ok(())
    }
}
