//! Physical content storage capability

use crate::error::Result;
use crate::types::ByteStream;
use async_trait::async_trait;

/// Where blob bytes physically live
///
/// Selected once when the [`BlobStore`](crate::BlobStore) is built. The store
/// has already validated names and existence before calling into a backend.
#[async_trait]
pub trait ContentBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// One-time startup work (creating the root directory, ...)
    async fn prepare(&self) -> Result<()>;

    async fn read(&self, category: &str, key: &str) -> Result<ByteStream>;

    /// Persist `content`, replacing whatever was stored before
    async fn write(&self, category: &str, key: &str, content: ByteStream) -> Result<()>;

    /// Remove stored bytes; already-missing content is not an error
    async fn remove(&self, category: &str, key: &str) -> Result<()>;

    /// Drop any per-category container left once every blob is removed
    async fn remove_category(&self, _category: &str) -> Result<()> {
        Ok(())
    }
}
