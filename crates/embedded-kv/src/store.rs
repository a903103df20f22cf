//! Async key-value store over a redb database

use crate::error::{KvError, Result};
use crate::key::Key;
use crate::types::{Entry, SetOptions, StoredEntry, Versionstamp};
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, Table, TableDefinition, WriteTransaction};
use std::collections::VecDeque;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Entries: encoded key -> JSON-encoded [`StoredEntry`]
pub(crate) const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

/// Large value chunks: encoded chunk key -> raw bytes
pub(crate) const CHUNKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("chunks");

/// Store bookkeeping (versionstamp counter)
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const VERSION_COUNTER: &str = "versionstamp";

/// Rows read per transaction while listing
const LIST_PAGE_SIZE: usize = 128;

/// Lazy, one-shot stream of entries returned by [`KvStore::list`]
pub type EntryStream = BoxStream<'static, Result<Entry>>;

/// Handle to an embedded key-value database
///
/// Cheap to clone; all clones share the same database. After
/// [`KvStore::close`] every operation fails with [`KvError::NotInitialized`].
#[derive(Clone)]
pub struct KvStore {
    db: Arc<RwLock<Option<Arc<Database>>>>,
}

impl KvStore {
    /// Open (or create) the database at `path`, or an in-memory one for `None`
    pub async fn open(path: Option<&Path>) -> Result<Self> {
        let db = match path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let path = path.to_path_buf();
                info!(path = ?path, "Opening key-value database");
                tokio::task::spawn_blocking(move || Database::create(path)).await??
            }
            None => {
                info!("Opening in-memory key-value database");
                Database::builder().create_with_backend(InMemoryBackend::new())?
            }
        };

        let txn = db.begin_write()?;
        {
            txn.open_table(ENTRIES)?;
            txn.open_table(CHUNKS)?;
            txn.open_table(META)?;
        }
        txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(Some(Arc::new(db)))),
        })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::open(None).await
    }

    /// Release the database; later operations fail with `NotInitialized`
    pub async fn close(&self) {
        if self.db.write().await.take().is_some() {
            info!("Key-value database closed");
        }
    }

    async fn database(&self) -> Result<Arc<Database>> {
        self.db.read().await.clone().ok_or(KvError::NotInitialized)
    }

    /// Run a synchronous redb closure on the blocking pool
    pub(crate) async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.database().await?;
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    /// Read an entry; `None` if it was never written, was deleted, or expired
    pub async fn get(&self, key: &Key) -> Result<Option<Entry>> {
        let key = key.clone();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(ENTRIES)?;
            let encoded = key.encode();
            let stored: StoredEntry = match table.get(encoded.as_slice())? {
                Some(raw) => serde_json::from_slice(raw.value())?,
                None => return Ok(None),
            };
            if stored.is_expired(Utc::now()) {
                return Ok(None);
            }
            Ok(Some(stored.into_entry(key)))
        })
        .await
    }

    pub async fn set(
        &self,
        key: &Key,
        value: serde_json::Value,
        options: SetOptions,
    ) -> Result<Versionstamp> {
        let encoded = key.encode();
        let expires_at = options
            .expire_in
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| Utc::now().checked_add_signed(d));

        let versionstamp = self
            .blocking(move |db| {
                let txn = db.begin_write()?;
                let versionstamp = next_versionstamp(&txn)?;
                {
                    let stored = StoredEntry {
                        value,
                        versionstamp,
                        expires_at,
                    };
                    let raw = serde_json::to_vec(&stored)?;
                    let mut table = txn.open_table(ENTRIES)?;
                    table.insert(encoded.as_slice(), raw.as_slice())?;
                }
                txn.commit()?;
                Ok(Versionstamp(versionstamp))
            })
            .await?;

        debug!(key = %key, versionstamp = %versionstamp, "Set entry");
        Ok(versionstamp)
    }

    /// Remove an entry; deleting an absent key is not an error
    pub async fn delete(&self, key: &Key) -> Result<()> {
        let encoded = key.encode();
        self.blocking(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(ENTRIES)?;
                table.remove(encoded.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await?;

        debug!(key = %key, "Deleted entry");
        Ok(())
    }

    /// Stream every live entry strictly below `prefix`, in key order
    ///
    /// Rows are fetched in pages, each in its own read transaction, so the
    /// stream never holds a transaction across an await point.
    pub fn list(&self, prefix: &Key) -> EntryStream {
        let (lower, upper) = prefix.descendant_range();
        let cursor = ListCursor {
            store: self.clone(),
            lower,
            upper,
            last: None,
            buffered: VecDeque::new(),
            exhausted: false,
        };

        stream::try_unfold(cursor, |mut cursor| async move {
            loop {
                if let Some(entry) = cursor.buffered.pop_front() {
                    return Ok::<_, KvError>(Some((entry, cursor)));
                }
                if cursor.exhausted {
                    return Ok(None);
                }
                cursor.fetch_page().await?;
            }
        })
        .boxed()
    }

    /// Delete every expired entry, returning how many were removed
    pub async fn purge_expired(&self) -> Result<usize> {
        let removed = self
            .blocking(|db| {
                let now = Utc::now();
                let txn = db.begin_write()?;
                let removed = {
                    let mut table = txn.open_table(ENTRIES)?;
                    let mut expired = Vec::new();
                    for item in table.iter()? {
                        let (key, value) = item?;
                        let stored: StoredEntry = serde_json::from_slice(value.value())?;
                        if stored.is_expired(now) {
                            expired.push(key.value().to_vec());
                        }
                    }
                    for key in &expired {
                        table.remove(key.as_slice())?;
                    }
                    expired.len()
                };
                txn.commit()?;
                Ok(removed)
            })
            .await?;

        if removed > 0 {
            debug!(removed, "Purged expired entries");
        }
        Ok(removed)
    }
}

/// Bump and return the database-wide versionstamp counter
pub(crate) fn next_versionstamp(txn: &WriteTransaction) -> Result<u64> {
    let mut meta = txn.open_table(META)?;
    let next = meta.get(VERSION_COUNTER)?.map(|v| v.value()).unwrap_or(0) + 1;
    meta.insert(VERSION_COUNTER, next)?;
    Ok(next)
}

/// Remove every row whose key lies in `lower..upper`
pub(crate) fn remove_range(
    table: &mut Table<'_, &'static [u8], &'static [u8]>,
    lower: &[u8],
    upper: &[u8],
) -> Result<usize> {
    let keys = table
        .range(lower..upper)?
        .map(|item| item.map(|(key, _)| key.value().to_vec()))
        .collect::<std::result::Result<Vec<_>, redb::StorageError>>()?;
    for key in &keys {
        table.remove(key.as_slice())?;
    }
    Ok(keys.len())
}

struct ListCursor {
    store: KvStore,
    lower: Vec<u8>,
    upper: Vec<u8>,
    last: Option<Vec<u8>>,
    buffered: VecDeque<Entry>,
    exhausted: bool,
}

impl ListCursor {
    async fn fetch_page(&mut self) -> Result<()> {
        let last = self.last.clone();
        let lower = self.lower.clone();
        let upper = self.upper.clone();

        let (page, last_seen, scanned) = self
            .store
            .blocking(move |db| {
                let txn = db.begin_read()?;
                let table = txn.open_table(ENTRIES)?;
                let start: Bound<&[u8]> = match &last {
                    Some(last) => Bound::Excluded(last.as_slice()),
                    None => Bound::Included(lower.as_slice()),
                };

                let now = Utc::now();
                let mut page = Vec::new();
                let mut last_seen = None;
                let mut scanned = 0;
                for item in table.range::<&[u8]>((start, Bound::Excluded(upper.as_slice())))? {
                    let (key, value) = item?;
                    scanned += 1;
                    last_seen = Some(key.value().to_vec());
                    let stored: StoredEntry = serde_json::from_slice(value.value())?;
                    if !stored.is_expired(now) {
                        page.push(stored.into_entry(Key::decode(key.value())?));
                    }
                    if scanned >= LIST_PAGE_SIZE {
                        break;
                    }
                }
                Ok((page, last_seen, scanned))
            })
            .await?;

        self.buffered.extend(page);
        if last_seen.is_some() {
            self.last = last_seen;
        }
        if scanned < LIST_PAGE_SIZE {
            self.exhausted = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPart;
    use futures::TryStreamExt;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    fn key(parts: &[&str]) -> Key {
        Key::from_parts(parts.iter().copied())
    }

    async fn collect_keys(store: &KvStore, prefix: &Key) -> Vec<Key> {
        store
            .list(prefix)
            .map_ok(|entry| entry.key)
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = KvStore::in_memory().await.unwrap();
        assert!(store.get(&key(&["blob", "nope"])).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = KvStore::in_memory().await.unwrap();
        let k = key(&["blob", "docs"]);

        store
            .set(&k, json!({"title": "Docs"}), SetOptions::default())
            .await
            .unwrap();
        let entry = store.get(&k).await.unwrap().unwrap();
        assert_eq!(entry.key, k);
        assert_eq!(entry.value["title"], "Docs");

        store.delete(&k).await.unwrap();
        assert!(store.get(&k).await.unwrap().is_none());

        // Deleting again is fine
        store.delete(&k).await.unwrap();
    }

    #[tokio::test]
    async fn test_null_value_still_exists() {
        let store = KvStore::in_memory().await.unwrap();
        let k = key(&["blob", "empty"]);

        store
            .set(&k, serde_json::Value::Null, SetOptions::default())
            .await
            .unwrap();

        let entry = store.get(&k).await.unwrap();
        assert!(entry.is_some());
        assert!(entry.unwrap().value.is_null());
    }

    #[tokio::test]
    async fn test_versionstamps_increase() {
        let store = KvStore::in_memory().await.unwrap();
        let k = key(&["counter"]);

        let first = store.set(&k, json!(1), SetOptions::default()).await.unwrap();
        let second = store.set(&k, json!(2), SetOptions::default()).await.unwrap();
        assert!(second > first);

        let entry = store.get(&k).await.unwrap().unwrap();
        assert_eq!(entry.versionstamp, second);
    }

    #[tokio::test]
    async fn test_list_is_ordered_and_excludes_prefix_key() {
        let store = KvStore::in_memory().await.unwrap();
        for parts in [
            vec!["blob"],
            vec!["blob", "b"],
            vec!["blob", "a"],
            vec!["blob", "a", "x", "content-type"],
            vec!["blobs", "other"],
            vec!["auth", "token"],
        ] {
            store
                .set(&key(&parts), json!(null), SetOptions::default())
                .await
                .unwrap();
        }

        let keys = collect_keys(&store, &key(&["blob"])).await;
        assert_eq!(
            keys,
            vec![
                key(&["blob", "a"]),
                key(&["blob", "a", "x", "content-type"]),
                key(&["blob", "b"]),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_spans_multiple_pages() {
        let store = KvStore::in_memory().await.unwrap();
        let prefix = key(&["many"]);
        let total = LIST_PAGE_SIZE * 2 + 5;
        for i in 0..total {
            store
                .set(&prefix.child(i as i64), json!(i), SetOptions::default())
                .await
                .unwrap();
        }

        let keys = collect_keys(&store, &prefix).await;
        assert_eq!(keys.len(), total);
        assert_eq!(keys[0].get(1), Some(&KeyPart::Int(0)));
        assert_eq!(keys[total - 1].get(1), Some(&KeyPart::Int(total as i64 - 1)));
    }

    #[tokio::test]
    async fn test_expired_entries_are_absent_and_purged() {
        let store = KvStore::in_memory().await.unwrap();
        let short = key(&["auth", "token", "short"]);
        let long = key(&["auth", "token", "long"]);

        store
            .set(
                &short,
                json!(1),
                SetOptions::expire_in(Duration::from_millis(20)),
            )
            .await
            .unwrap();
        store
            .set(&long, json!(2), SetOptions::expire_in(Duration::from_secs(600)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(store.get(&short).await.unwrap().is_none());
        assert!(store.get(&long).await.unwrap().is_some());
        assert_eq!(collect_keys(&store, &key(&["auth"])).await, vec![long.clone()]);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_makes_store_uninitialized() {
        let store = KvStore::in_memory().await.unwrap();
        let clone = store.clone();
        store.close().await;

        let err = clone.get(&key(&["blob"])).await.unwrap_err();
        assert!(matches!(err, KvError::NotInitialized));

        let listed: Result<Vec<Entry>> = clone.list(&key(&["blob"])).try_collect().await;
        assert!(matches!(listed, Err(KvError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_file_database_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("kv.redb");
        let k = key(&["blob", "persisted"]);

        {
            let store = KvStore::open(Some(&path)).await.unwrap();
            store.set(&k, json!("yes"), SetOptions::default()).await.unwrap();
            store.close().await;
        }

        let store = KvStore::open(Some(&path)).await.unwrap();
        let entry = store.get(&k).await.unwrap().unwrap();
        assert_eq!(entry.value, json!("yes"));
    }
}
