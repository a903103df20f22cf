//! Category and blob storage
//!
//! Categories and per-blob content-type records live in the embedded
//! key-value store. Blob bytes go to a [`ContentBackend`] chosen once at
//! startup: either chunked large values inside the same store, or files under
//! a root directory.

mod backend;
mod embedded;
mod error;
mod fs;
pub mod keys;
mod store;
mod types;

pub use backend::ContentBackend;
pub use embedded::EmbeddedBackend;
pub use error::{BlobError, Result};
pub use fs::FilesystemBackend;
pub use store::BlobStore;
pub use types::{byte_stream, Blob, ByteStream};
