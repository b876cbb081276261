//! Document store backends
//!
//! The backend is picked once at startup by [`build_document_store`]; business
//! logic only sees `Arc<dyn DocumentStore>`.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::services::DocumentStore;
use crate::infrastructure::config::{AppConfig, StorageBackend};

pub fn build_document_store(config: &AppConfig) -> Arc<dyn DocumentStore> {
    match config.storage.backend {
        StorageBackend::Fs => {
            let root = config.storage_root();
            info!("🗄️ Using filesystem document store at {:?}", root);
            Arc::new(FsDocumentStore::new(root))
        }
        StorageBackend::Memory => {
            info!("🗄️ Using in-memory document store (nothing is persisted)");
            Arc::new(MemoryDocumentStore::new())
        }
    }
}

/// One file per key under `root`. Writes go through a temp file + rename so a
/// crash never leaves a half-written document.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> SyncResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(SyncError::InvalidInput(format!("illegal store key '{key}'")));
        }
        Ok(self.root.join(relative))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

const TMP_SUFFIX: &str = ".tmp";

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::persistence(key, e)),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> SyncResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::persistence(key, e))?;
        }

        let tmp_path = path.with_file_name(format!(
            "{}.{}{TMP_SUFFIX}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("doc"),
            uuid::Uuid::new_v4().simple()
        ));
        fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| SyncError::persistence(key, e))?;
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(SyncError::persistence(key, e));
        }
        debug!("💾 put {} ({} bytes)", key, bytes.len());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> SyncResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(SyncError::persistence(prefix, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| SyncError::persistence(prefix, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| SyncError::persistence(prefix, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Some(key) = self.key_for(&path) {
                    if key.starts_with(prefix) && !key.ends_with(TMP_SUFFIX) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::persistence(key, e)),
        }
    }
}

/// Process-local store. Counts writes and can simulate failing reads, which
/// is what the engine's tests lean on.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<BTreeMap<String, Vec<u8>>>,
    failing_prefixes: RwLock<BTreeSet<String>>,
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Every subsequent read/list touching `prefix` fails with a persistence error.
    pub async fn fail_reads_with_prefix(&self, prefix: impl Into<String>) {
        self.failing_prefixes.write().await.insert(prefix.into());
    }

    pub async fn keys(&self) -> Vec<String> {
        self.documents.read().await.keys().cloned().collect()
    }

    pub async fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.documents.read().await.get(key).cloned()
    }

    async fn check_failure(&self, key: &str) -> SyncResult<()> {
        let failing = self.failing_prefixes.read().await;
        if failing.iter().any(|prefix| key.starts_with(prefix.as_str())) {
            return Err(SyncError::persistence(key, "simulated read failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        self.check_failure(key).await?;
        Ok(self.documents.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> SyncResult<()> {
        self.documents.write().await.insert(key.to_string(), bytes);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> SyncResult<Vec<String>> {
        self.check_failure(prefix).await?;
        Ok(self
            .documents
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        if self.documents.write().await.remove(key).is_some() {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_store_round_trip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());

        assert_eq!(store.get("items/A.json").await.unwrap(), None);
        store.put("items/A.json", b"{}".to_vec()).await.unwrap();
        store.put("images/h1/0.webp", vec![1, 2]).await.unwrap();
        store.put("images/h2/0.webp", vec![3]).await.unwrap();

        assert_eq!(store.get("items/A.json").await.unwrap(), Some(b"{}".to_vec()));
        assert_eq!(
            store.list("images/").await.unwrap(),
            vec!["images/h1/0.webp".to_string(), "images/h2/0.webp".to_string()]
        );

        store.delete("items/A.json").await.unwrap();
        store.delete("items/A.json").await.unwrap();
        assert_eq!(store.get("items/A.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn fs_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());
        assert!(matches!(
            store.get("../secret").await,
            Err(SyncError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn fs_store_list_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path().join("nowhere"));
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_simulated_failure_is_an_error_not_none() {
        let store = MemoryDocumentStore::new();
        store.put("snapshots/us.json", b"{}".to_vec()).await.unwrap();
        store.fail_reads_with_prefix("snapshots/").await;

        assert!(matches!(
            store.get("snapshots/us.json").await,
            Err(SyncError::Persistence { .. })
        ));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn json_helpers_report_decode_errors() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
        store.put("aggregates/shares.json", b"not json".to_vec()).await.unwrap();
        let decoded: SyncResult<Option<BTreeMap<String, String>>> =
            store.get_json("aggregates/shares.json").await;
        assert!(matches!(decoded, Err(SyncError::Decode { .. })));
    }
}
