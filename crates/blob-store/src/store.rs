//! Category and blob operations with existence checks
//!
//! Existence checks are read-then-act and are not atomic with the write that
//! follows. Two racing creates of the same name can both pass the check; the
//! last write to the key wins.

use crate::backend::ContentBackend;
use crate::embedded::EmbeddedBackend;
use crate::error::{BlobError, Result};
use crate::fs::FilesystemBackend;
use crate::keys;
use crate::types::{Blob, ByteStream};
use embedded_kv::{KvStore, SetOptions};
use futures::future::try_join_all;
use futures::TryStreamExt;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Blob storage facade shared by all request handlers
#[derive(Clone)]
pub struct BlobStore {
    kv: KvStore,
    backend: Arc<dyn ContentBackend>,
}

impl BlobStore {
    pub fn new(kv: KvStore, backend: Arc<dyn ContentBackend>) -> Self {
        Self { kv, backend }
    }

    /// Files under `blob_path` when given, chunked values in `kv` otherwise
    pub fn from_blob_path(kv: KvStore, blob_path: Option<PathBuf>) -> Self {
        let backend: Arc<dyn ContentBackend> = match blob_path {
            Some(root) => Arc::new(FilesystemBackend::new(root)),
            None => Arc::new(EmbeddedBackend::new(kv.clone())),
        };
        Self::new(kv, backend)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn init(&self) -> Result<()> {
        self.backend.prepare().await?;
        info!(backend = self.backend.name(), "Blob store initialized");
        Ok(())
    }

    // --- Categories ---

    /// Names of all categories; nested blob keys are never included
    pub async fn list_categories(&self) -> Result<BTreeSet<String>> {
        let root = keys::root();
        let depth = root.len() + 1;
        let names: BTreeSet<String> = self
            .kv
            .list(&root)
            .try_filter_map(|entry| async move {
                if entry.key.len() != depth {
                    return Ok(None);
                }
                Ok(entry
                    .key
                    .get(depth - 1)
                    .and_then(|part| part.as_str())
                    .map(str::to_string))
            })
            .try_collect()
            .await?;
        Ok(names)
    }

    /// Metadata of a category, `None` if it does not exist
    pub async fn category(&self, name: &str) -> Result<Option<Value>> {
        validate_name(name)?;
        Ok(self
            .kv
            .get(&keys::category(name))
            .await?
            .map(|entry| entry.value))
    }

    pub async fn category_exists(&self, name: &str) -> Result<bool> {
        Ok(self.category(name).await?.is_some())
    }

    pub async fn create_category(&self, name: &str, meta: Value) -> Result<()> {
        if self.category_exists(name).await? {
            return Err(BlobError::category_exists());
        }
        self.kv
            .set(&keys::category(name), meta, SetOptions::default())
            .await?;
        info!(category = name, "Created category");
        Ok(())
    }

    pub async fn update_category(&self, name: &str, meta: Value) -> Result<()> {
        if !self.category_exists(name).await? {
            return Err(BlobError::category_missing());
        }
        self.kv
            .set(&keys::category(name), meta, SetOptions::default())
            .await?;
        debug!(category = name, "Updated category");
        Ok(())
    }

    /// Delete a category and every blob in it
    pub async fn delete_category(&self, name: &str) -> Result<()> {
        let blob_keys = self
            .list_blob_keys(name)
            .await?
            .ok_or_else(BlobError::category_missing)?;

        try_join_all(blob_keys.iter().map(|key| self.purge_blob(name, key))).await?;

        // The logical delete below is authoritative; leftover directories are harmless
        if let Err(e) = self.backend.remove_category(name).await {
            warn!(category = name, error = %e, "Failed to remove category storage");
        }

        self.kv.delete(&keys::category(name)).await?;
        info!(category = name, blobs = blob_keys.len(), "Deleted category");
        Ok(())
    }

    // --- Blobs ---

    /// Keys stored in a category, `None` if the category does not exist
    pub async fn list_blob_keys(&self, category: &str) -> Result<Option<BTreeSet<String>>> {
        if !self.category_exists(category).await? {
            return Ok(None);
        }
        let prefix = keys::category(category);
        let depth = prefix.len();
        let blob_keys: BTreeSet<String> = self
            .kv
            .list(&prefix)
            .try_filter_map(|entry| async move {
                Ok(entry
                    .key
                    .get(depth)
                    .and_then(|part| part.as_str())
                    .map(str::to_string))
            })
            .try_collect()
            .await?;
        Ok(Some(blob_keys))
    }

    pub async fn blob_exists(&self, category: &str, key: &str) -> Result<bool> {
        Ok(self.content_type_record(category, key).await?.is_some())
    }

    /// Content and content type of a blob, `None` if it does not exist
    pub async fn get_blob(&self, category: &str, key: &str) -> Result<Option<Blob>> {
        let content_type = match self.content_type_record(category, key).await? {
            Some(content_type) => content_type,
            None => return Ok(None),
        };
        let content = self.backend.read(category, key).await?;
        Ok(Some(Blob {
            content,
            content_type,
        }))
    }

    pub async fn create_blob(
        &self,
        category: &str,
        key: &str,
        content: ByteStream,
        content_type: Option<String>,
    ) -> Result<()> {
        if !self.category_exists(category).await? {
            return Err(BlobError::category_missing());
        }
        if self.blob_exists(category, key).await? {
            return Err(BlobError::blob_exists());
        }
        self.write_blob(category, key, content, content_type).await?;
        info!(category, key, "Created blob");
        Ok(())
    }

    pub async fn update_blob(
        &self,
        category: &str,
        key: &str,
        content: ByteStream,
        content_type: Option<String>,
    ) -> Result<()> {
        if !self.blob_exists(category, key).await? {
            return Err(BlobError::blob_missing());
        }
        self.write_blob(category, key, content, content_type).await?;
        debug!(category, key, "Updated blob");
        Ok(())
    }

    pub async fn delete_blob(&self, category: &str, key: &str) -> Result<()> {
        if !self.blob_exists(category, key).await? {
            return Err(BlobError::blob_missing());
        }
        self.purge_blob(category, key).await?;
        info!(category, key, "Deleted blob");
        Ok(())
    }

    /// The content-type record if the blob exists (its value may be `None`)
    async fn content_type_record(
        &self,
        category: &str,
        key: &str,
    ) -> Result<Option<Option<String>>> {
        validate_name(key)?;
        if !self.category_exists(category).await? {
            return Ok(None);
        }
        let record = self.kv.get(&keys::content_type(category, key)).await?;
        Ok(record.map(|entry| entry.value.as_str().map(str::to_string)))
    }

    /// Witness first, then bytes
    ///
    /// A failed content write leaves a blob that exists but cannot be read.
    async fn write_blob(
        &self,
        category: &str,
        key: &str,
        content: ByteStream,
        content_type: Option<String>,
    ) -> Result<()> {
        let record = content_type.map(Value::String).unwrap_or(Value::Null);
        self.kv
            .set(&keys::content_type(category, key), record, SetOptions::default())
            .await?;
        self.backend.write(category, key, content).await
    }

    /// Remove record and bytes without checking existence
    async fn purge_blob(&self, category: &str, key: &str) -> Result<()> {
        self.kv.delete(&keys::content_type(category, key)).await?;
        self.backend.remove(category, key).await
    }
}

/// Category names and blob keys double as path segments on disk
fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(BlobError::InvalidName(format!("{:?}", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::byte_stream;
    use bytes::BytesMut;
    use futures::TryStreamExt;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    async fn embedded_store() -> BlobStore {
        let kv = KvStore::in_memory().await.unwrap();
        let store = BlobStore::from_blob_path(kv, None);
        store.init().await.unwrap();
        store
    }

    async fn filesystem_store() -> (BlobStore, TempDir) {
        let dir = tempdir().unwrap();
        let kv = KvStore::in_memory().await.unwrap();
        let store = BlobStore::from_blob_path(kv, Some(dir.path().join("blobs")));
        store.init().await.unwrap();
        (store, dir)
    }

    async fn read_content(blob: Blob) -> Vec<u8> {
        let data = blob
            .content
            .try_fold(BytesMut::new(), |mut buffer, chunk| async move {
                buffer.extend_from_slice(&chunk);
                Ok(buffer)
            })
            .await
            .unwrap();
        data.to_vec()
    }

    async fn assert_round_trip(store: &BlobStore) {
        store.create_category("docs", json!({"title": "Docs"})).await.unwrap();
        store
            .create_blob(
                "docs",
                "readme",
                byte_stream("# Readme"),
                Some("text/plain".to_string()),
            )
            .await
            .unwrap();

        let blob = store.get_blob("docs", "readme").await.unwrap().unwrap();
        assert_eq!(blob.content_type.as_deref(), Some("text/plain"));
        assert_eq!(read_content(blob).await, b"# Readme");
    }

    #[tokio::test]
    async fn test_round_trip_embedded() {
        let store = embedded_store().await;
        assert_eq!(store.backend_name(), "embedded");
        assert_round_trip(&store).await;
    }

    #[tokio::test]
    async fn test_round_trip_filesystem() {
        let (store, dir) = filesystem_store().await;
        assert_eq!(store.backend_name(), "filesystem");
        assert_round_trip(&store).await;
        assert!(dir.path().join("blobs/docs/readme").is_file());
    }

    #[tokio::test]
    async fn test_create_category_twice_conflicts() {
        let store = embedded_store().await;
        assert!(!store.category_exists("docs").await.unwrap());

        store.create_category("docs", json!({})).await.unwrap();
        assert!(store.category_exists("docs").await.unwrap());

        let err = store.create_category("docs", json!({})).await.unwrap_err();
        assert!(matches!(err, BlobError::AlreadyExists(_)));
        assert_eq!(err.to_string(), "The category already exists.");
    }

    #[tokio::test]
    async fn test_null_metadata_category_exists() {
        let store = embedded_store().await;
        store.create_category("empty", Value::Null).await.unwrap();

        assert!(store.category_exists("empty").await.unwrap());
        assert_eq!(store.category("empty").await.unwrap(), Some(Value::Null));
    }

    #[tokio::test]
    async fn test_update_category() {
        let store = embedded_store().await;

        let err = store.update_category("docs", json!({})).await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));

        store.create_category("docs", json!({"v": 1})).await.unwrap();
        store.update_category("docs", json!({"v": 2})).await.unwrap();
        assert_eq!(store.category("docs").await.unwrap(), Some(json!({"v": 2})));
    }

    #[tokio::test]
    async fn test_list_categories_excludes_blob_keys() {
        let store = embedded_store().await;
        store.create_category("a", json!({})).await.unwrap();
        store.create_category("b", json!({})).await.unwrap();
        store
            .create_blob("a", "x", byte_stream("x"), None)
            .await
            .unwrap();

        let names = store.list_categories().await.unwrap();
        assert_eq!(
            names,
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
    }

    async fn assert_delete_category_cascades(store: &BlobStore) {
        store.create_category("docs", json!({})).await.unwrap();
        for key in ["one", "two", "three"] {
            store
                .create_blob("docs", key, byte_stream(key.to_string()), None)
                .await
                .unwrap();
        }

        store.delete_category("docs").await.unwrap();
        assert!(!store.category_exists("docs").await.unwrap());
        assert_eq!(store.list_blob_keys("docs").await.unwrap(), None);

        let err = store.delete_category("docs").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));

        // Recreated category starts empty
        store.create_category("docs", json!({})).await.unwrap();
        assert_eq!(
            store.list_blob_keys("docs").await.unwrap(),
            Some(BTreeSet::new())
        );
        assert!(store.get_blob("docs", "one").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_category_cascades_embedded() {
        let store = embedded_store().await;
        assert_delete_category_cascades(&store).await;
    }

    #[tokio::test]
    async fn test_delete_category_cascades_filesystem() {
        let (store, dir) = filesystem_store().await;
        assert_delete_category_cascades(&store).await;
        assert!(!dir.path().join("blobs/docs/one").exists());
    }

    #[tokio::test]
    async fn test_delete_empty_category_without_directory() {
        let (store, _dir) = filesystem_store().await;
        store.create_category("never-written", json!({})).await.unwrap();

        // remove_dir_all fails on the missing directory; the delete still succeeds
        store.delete_category("never-written").await.unwrap();
        assert!(!store.category_exists("never-written").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_key_vs_missing_category() {
        let store = embedded_store().await;
        store.create_category("docs", json!({})).await.unwrap();

        assert!(store.get_blob("docs", "nope").await.unwrap().is_none());
        assert!(store.get_blob("other", "nope").await.unwrap().is_none());

        assert_eq!(
            store.list_blob_keys("docs").await.unwrap(),
            Some(BTreeSet::new())
        );
        assert_eq!(store.list_blob_keys("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_blob_requires_category() {
        let store = embedded_store().await;
        let err = store
            .create_blob("ghost", "k", byte_stream("data"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));
        assert_eq!(err.to_string(), "The category does not exist.");
    }

    #[tokio::test]
    async fn test_create_blob_twice_conflicts() {
        let store = embedded_store().await;
        store.create_category("docs", json!({})).await.unwrap();
        store
            .create_blob("docs", "k", byte_stream("first"), None)
            .await
            .unwrap();

        let err = store
            .create_blob("docs", "k", byte_stream("second"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::AlreadyExists(_)));

        let blob = store.get_blob("docs", "k").await.unwrap().unwrap();
        assert_eq!(read_content(blob).await, b"first");
    }

    async fn assert_update_replaces_content(store: &BlobStore) {
        store.create_category("docs", json!({})).await.unwrap();

        let err = store
            .update_blob("docs", "k", byte_stream("x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));

        store
            .create_blob(
                "docs",
                "k",
                byte_stream("a much longer original body"),
                Some("text/plain".to_string()),
            )
            .await
            .unwrap();
        store
            .update_blob("docs", "k", byte_stream("short"), None)
            .await
            .unwrap();

        let blob = store.get_blob("docs", "k").await.unwrap().unwrap();
        assert_eq!(blob.content_type, None);
        assert_eq!(read_content(blob).await, b"short");
    }

    #[tokio::test]
    async fn test_update_blob_embedded() {
        let store = embedded_store().await;
        assert_update_replaces_content(&store).await;
    }

    #[tokio::test]
    async fn test_update_blob_filesystem() {
        let (store, _dir) = filesystem_store().await;
        assert_update_replaces_content(&store).await;
    }

    #[tokio::test]
    async fn test_delete_blob() {
        let (store, dir) = filesystem_store().await;
        store.create_category("docs", json!({})).await.unwrap();
        store
            .create_blob("docs", "k", byte_stream("bytes"), None)
            .await
            .unwrap();

        store.delete_blob("docs", "k").await.unwrap();
        assert!(!store.blob_exists("docs", "k").await.unwrap());
        assert!(!dir.path().join("blobs/docs/k").exists());

        let err = store.delete_blob("docs", "k").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_blob_keys_in_order() {
        let store = embedded_store().await;
        store.create_category("docs", json!({})).await.unwrap();
        for key in ["zeta", "alpha", "mid"] {
            store
                .create_blob("docs", key, byte_stream("x"), None)
                .await
                .unwrap();
        }

        let keys: Vec<String> = store
            .list_blob_keys("docs")
            .await
            .unwrap()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(keys, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let store = embedded_store().await;
        for name in ["", ".", "..", "a/b", "a\\b", "nul\0byte"] {
            let err = store.create_category(name, json!({})).await.unwrap_err();
            assert!(matches!(err, BlobError::InvalidName(_)), "{:?}", name);
        }

        store.create_category("docs", json!({})).await.unwrap();
        let err = store
            .create_blob("docs", "../escape", byte_stream("x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_closed_store_is_not_initialized() {
        let kv = KvStore::in_memory().await.unwrap();
        let store = BlobStore::from_blob_path(kv.clone(), None);
        kv.close().await;

        let err = store.list_categories().await.unwrap_err();
        assert!(matches!(err, BlobError::NotInitialized));
    }
}
