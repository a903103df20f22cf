//! Content stored as chunked large values in the key-value store

use crate::backend::ContentBackend;
use crate::error::Result;
use crate::keys;
use crate::types::{collect_bytes, ByteStream};
use async_trait::async_trait;
use embedded_kv::KvStore;
use futures::{StreamExt, TryStreamExt};
use std::io;
use tracing::debug;

pub struct EmbeddedBackend {
    kv: KvStore,
}

impl EmbeddedBackend {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl ContentBackend for EmbeddedBackend {
    fn name(&self) -> &'static str {
        "embedded"
    }

    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn read(&self, category: &str, key: &str) -> Result<ByteStream> {
        let chunks = self
            .kv
            .get_large(&keys::blob(category, key))
            .await?
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("content for {}/{} is missing", category, key),
                )
            })?;

        Ok(chunks.map_err(io::Error::other).boxed())
    }

    async fn write(&self, category: &str, key: &str, content: ByteStream) -> Result<()> {
        // Buffered in full: the chunk rows are replaced in one transaction
        let data = collect_bytes(content).await?;
        debug!(category, key, size = data.len(), "Writing embedded content");
        self.kv.set_large(&keys::blob(category, key), data).await?;
        Ok(())
    }

    async fn remove(&self, category: &str, key: &str) -> Result<()> {
        self.kv.delete_large(&keys::blob(category, key)).await?;
        Ok(())
    }
}
