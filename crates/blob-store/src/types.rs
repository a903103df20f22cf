//! Blob store types

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::fmt;

/// Blob content as a stream of byte chunks
///
/// Whoever receives a `ByteStream` owns it: drain it or drop it to release
/// the underlying file or storage reads.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A stored blob as returned by `BlobStore::get_blob`
pub struct Blob {
    pub content: ByteStream,
    pub content_type: Option<String>,
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// A single-chunk stream over in-memory bytes
pub fn byte_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    stream::once(async move { Ok(data) }).boxed()
}

/// Drain a stream into one contiguous buffer
pub(crate) async fn collect_bytes(content: ByteStream) -> std::io::Result<Bytes> {
    let buffer = content
        .try_fold(BytesMut::new(), |mut buffer, chunk| async move {
            buffer.extend_from_slice(&chunk);
            Ok(buffer)
        })
        .await?;
    Ok(buffer.freeze())
}
