//! Filesystem content backend: `<root>/<category>/<key>`

use crate::backend::ContentBackend;
use crate::error::Result;
use crate::types::ByteStream;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

const READ_BUFFER_SIZE: usize = 64 * 1024;

pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn category_dir(&self, category: &str) -> PathBuf {
        self.root.join(category)
    }

    fn blob_path(&self, category: &str, key: &str) -> PathBuf {
        self.root.join(category).join(key)
    }
}

#[async_trait]
impl ContentBackend for FilesystemBackend {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        info!(root = ?self.root, "Blob directory ready");
        Ok(())
    }

    async fn read(&self, category: &str, key: &str) -> Result<ByteStream> {
        let file = fs::File::open(self.blob_path(category, key)).await?;

        let content = stream::try_unfold(file, |mut file| async move {
            let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
            let read = file.read_buf(&mut buffer).await?;
            if read == 0 {
                return Ok::<_, std::io::Error>(None);
            }
            Ok(Some((buffer.freeze(), file)))
        })
        .boxed();

        Ok(content)
    }

    async fn write(&self, category: &str, key: &str, mut content: ByteStream) -> Result<()> {
        fs::create_dir_all(self.category_dir(category)).await?;

        let path = self.blob_path(category, key);
        let mut file = fs::File::create(&path).await?;
        let mut written = 0u64;
        while let Some(chunk) = content.try_next().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(path = ?path, size = written, "Wrote blob file");
        Ok(())
    }

    async fn remove(&self, category: &str, key: &str) -> Result<()> {
        match fs::remove_file(self.blob_path(category, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_category(&self, category: &str) -> Result<()> {
        fs::remove_dir_all(self.category_dir(category)).await?;
        Ok(())
    }
}
