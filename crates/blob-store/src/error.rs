//! Error types for the blob store

use embedded_kv::KvError;
use std::fmt;

#[derive(Debug)]
pub enum BlobError {
    NotInitialized,
    AlreadyExists(String),
    NotFound(String),
    InvalidName(String),
    Kv(KvError),
    Io(Box<std::io::Error>),
}

impl BlobError {
    pub(crate) fn category_exists() -> Self {
        BlobError::AlreadyExists("The category already exists.".to_string())
    }

    pub(crate) fn category_missing() -> Self {
        BlobError::NotFound("The category does not exist.".to_string())
    }

    pub(crate) fn blob_exists() -> Self {
        BlobError::AlreadyExists("The blob already exists.".to_string())
    }

    pub(crate) fn blob_missing() -> Self {
        BlobError::NotFound("The blob does not exist.".to_string())
    }
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobError::NotInitialized => write!(f, "DB not initialized."),
            BlobError::AlreadyExists(msg) => write!(f, "{}", msg),
            BlobError::NotFound(msg) => write!(f, "{}", msg),
            BlobError::InvalidName(msg) => write!(f, "Invalid name: {}", msg),
            BlobError::Kv(err) => write!(f, "Storage error: {}", err),
            BlobError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for BlobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlobError::Kv(err) => Some(err),
            BlobError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<KvError> for BlobError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::NotInitialized => BlobError::NotInitialized,
            other => BlobError::Kv(other),
        }
    }
}

impl From<std::io::Error> for BlobError {
    fn from(err: std::io::Error) -> Self {
        BlobError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, BlobError>;
