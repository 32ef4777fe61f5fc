//! §4.4 StorageAdapter — the pluggable KV persistence surface consumed by
//! the `TimerManager`. Memory and disk implementations are interchangeable;
//! no ordering or transactional guarantees beyond per-key last-writer-wins.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn save(&self, key: &str, value: serde_json::Value) -> Result<()>;
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

pub type SharedStorageAdapter = Arc<dyn StorageAdapter>;

/// In-memory adapter: non-durable, used by tests and non-durable deployments.
#[derive(Default)]
pub struct MemoryStorageAdapter {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStorageAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn save(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Disk-backed adapter: one JSON file per key under `dir`, key names sanitized
/// into filenames. Crash-recoverable across restarts (§4.2 recovery protocol).
pub struct FileStorageAdapter {
    dir: PathBuf,
}

impl FileStorageAdapter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{sanitized}.json"))
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create storage directory {:?}", self.dir))
    }
}

#[async_trait]
impl StorageAdapter for FileStorageAdapter {
    async fn save(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.path_for(key);
        let bytes = serde_json::to_vec_pretty(&serde_json::json!({"key": key, "value": value}))?;
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {path:?}"))
    }

    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                let envelope: serde_json::Value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("failed to parse {path:?}"))?;
                Ok(envelope.get("value").cloned())
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error).with_context(|| format!("failed to read {path:?}")),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error).with_context(|| format!("failed to delete {path:?}")),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.ensure_dir().await?;
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let bytes = fs::read(entry.path()).await?;
            let envelope: serde_json::Value = serde_json::from_slice(&bytes)?;
            if let Some(key) = envelope.get("key").and_then(|v| v.as_str()) {
                if key.starts_with(prefix) {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_adapter_round_trips() {
        let adapter = MemoryStorageAdapter::new();
        adapter.save("a:1", serde_json::json!({"x": 1})).await.unwrap();
        adapter.save("a:2", serde_json::json!({"x": 2})).await.unwrap();
        assert_eq!(adapter.load("a:1").await.unwrap(), Some(serde_json::json!({"x": 1})));
        let mut keys = adapter.list_keys("a:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a:1".to_string(), "a:2".to_string()]);
        adapter.delete("a:1").await.unwrap();
        assert_eq!(adapter.load("a:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_adapter_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let adapter = FileStorageAdapter::new(dir.path());
            adapter
                .save("timer-manager:metadata", serde_json::json!({"entries": []}))
                .await
                .unwrap();
        }
        let adapter = FileStorageAdapter::new(dir.path());
        let loaded = adapter.load("timer-manager:metadata").await.unwrap();
        assert_eq!(loaded, Some(serde_json::json!({"entries": []})));
    }

    #[tokio::test]
    async fn file_adapter_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileStorageAdapter::new(dir.path());
        adapter.delete("missing").await.unwrap();
        adapter.delete("missing").await.unwrap();
    }
}
