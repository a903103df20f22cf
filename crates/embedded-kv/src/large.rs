//! Large byte values stored as chunks
//!
//! A large value under `key` is a witness entry at `key ++ ["__large_value__"]`
//! in the entries table plus chunk rows at `key ++ ["__large_value__", i]` in
//! the chunk table. Writes replace every chunk in a single transaction.

use crate::error::{KvError, Result};
use crate::key::Key;
use crate::store::{next_versionstamp, remove_range, KvStore, CHUNKS, ENTRIES};
use crate::types::{LargeValueMeta, StoredEntry};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

/// Size of each stored chunk
pub const CHUNK_SIZE: usize = 64 * 1024;

const LARGE_VALUE_MARKER: &str = "__large_value__";

/// Lazily fetched chunks of a large value
pub type LargeValueStream = BoxStream<'static, Result<Bytes>>;

impl KvStore {
    /// Store `value` under `key`, replacing any previous large value
    pub async fn set_large(&self, key: &Key, value: Bytes) -> Result<()> {
        let base = key.child(LARGE_VALUE_MARKER);
        let size = value.len();

        let chunks = self
            .blocking(move |db| {
                let (lower, upper) = base.descendant_range();
                let txn = db.begin_write()?;
                let chunk_count = {
                    let mut table = txn.open_table(CHUNKS)?;
                    remove_range(&mut table, &lower, &upper)?;
                    let mut count = 0u64;
                    for piece in value.chunks(CHUNK_SIZE) {
                        let chunk_key = base.child(count as i64).encode();
                        table.insert(chunk_key.as_slice(), piece)?;
                        count += 1;
                    }
                    count
                };

                let versionstamp = next_versionstamp(&txn)?;
                {
                    let meta = LargeValueMeta {
                        chunks: chunk_count,
                        size: value.len() as u64,
                    };
                    let stored = StoredEntry {
                        value: serde_json::to_value(meta)?,
                        versionstamp,
                        expires_at: None,
                    };
                    let raw = serde_json::to_vec(&stored)?;
                    let mut table = txn.open_table(ENTRIES)?;
                    table.insert(base.encode().as_slice(), raw.as_slice())?;
                }
                txn.commit()?;
                Ok(chunk_count)
            })
            .await?;

        debug!(key = %key, size, chunks, "Stored large value");
        Ok(())
    }

    /// Stream the large value under `key`, or `None` if there is none
    ///
    /// Chunks are read one at a time as the stream is polled. Dropping the
    /// stream stops further reads.
    pub async fn get_large(&self, key: &Key) -> Result<Option<LargeValueStream>> {
        let base = key.child(LARGE_VALUE_MARKER);
        let meta: LargeValueMeta = match self.get(&base).await? {
            Some(entry) => serde_json::from_value(entry.value)?,
            None => return Ok(None),
        };

        let store = self.clone();
        let chunks = stream::try_unfold(0u64, move |index| {
            let store = store.clone();
            let base = base.clone();
            async move {
                if index >= meta.chunks {
                    return Ok::<_, KvError>(None);
                }
                let chunk = store.read_chunk(base.child(index as i64)).await?;
                Ok(Some((chunk, index + 1)))
            }
        })
        .boxed();

        Ok(Some(chunks))
    }

    /// Remove the large value under `key`; absent values are not an error
    pub async fn delete_large(&self, key: &Key) -> Result<()> {
        let base = key.child(LARGE_VALUE_MARKER);

        let removed = self
            .blocking(move |db| {
                let (lower, upper) = base.descendant_range();
                let txn = db.begin_write()?;
                let removed = {
                    let mut table = txn.open_table(CHUNKS)?;
                    remove_range(&mut table, &lower, &upper)?
                };
                {
                    let mut table = txn.open_table(ENTRIES)?;
                    table.remove(base.encode().as_slice())?;
                }
                txn.commit()?;
                Ok(removed)
            })
            .await?;

        debug!(key = %key, chunks = removed, "Deleted large value");
        Ok(())
    }

    async fn read_chunk(&self, chunk_key: Key) -> Result<Bytes> {
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(CHUNKS)?;
            let encoded = chunk_key.encode();
            let chunk = table.get(encoded.as_slice())?;
            match chunk {
                Some(raw) => Ok(Bytes::copy_from_slice(raw.value())),
                None => Err(KvError::Corrupted(format!(
                    "large value chunk {} is missing",
                    chunk_key
                ))),
            }
        })
        .await
    }
}
