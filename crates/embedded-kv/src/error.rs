//! Error types for the embedded key-value store

use std::fmt;

#[derive(Debug)]
pub enum KvError {
    NotInitialized,
    Database(Box<redb::Error>),
    Serialization(String),
    InvalidKey(String),
    Corrupted(String),
    Task(String),
}

impl fmt::Display for KvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KvError::NotInitialized => write!(f, "DB not initialized."),
            KvError::Database(err) => write!(f, "Database error: {}", err),
            KvError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            KvError::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),
            KvError::Corrupted(msg) => write!(f, "Corrupted entry: {}", msg),
            KvError::Task(msg) => write!(f, "Storage task failed: {}", msg),
        }
    }
}

impl std::error::Error for KvError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KvError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<redb::Error> for KvError {
    fn from(err: redb::Error) -> Self {
        KvError::Database(Box::new(err))
    }
}

impl From<redb::DatabaseError> for KvError {
    fn from(err: redb::DatabaseError) -> Self {
        KvError::Database(Box::new(err.into()))
    }
}

impl From<redb::TransactionError> for KvError {
    fn from(err: redb::TransactionError) -> Self {
        KvError::Database(Box::new(err.into()))
    }
}

impl From<redb::TableError> for KvError {
    fn from(err: redb::TableError) -> Self {
        KvError::Database(Box::new(err.into()))
    }
}

impl From<redb::StorageError> for KvError {
    fn from(err: redb::StorageError) -> Self {
        KvError::Database(Box::new(err.into()))
    }
}

impl From<redb::CommitError> for KvError {
    fn from(err: redb::CommitError) -> Self {
        KvError::Database(Box::new(err.into()))
    }
}

impl From<std::io::Error> for KvError {
    fn from(err: std::io::Error) -> Self {
        KvError::Database(Box::new(redb::Error::Io(err)))
    }
}

impl From<serde_json::Error> for KvError {
    fn from(err: serde_json::Error) -> Self {
        KvError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for KvError {
    fn from(err: tokio::task::JoinError) -> Self {
        KvError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_initialized_display() {
        assert_eq!(format!("{}", KvError::NotInitialized), "DB not initialized.");
    }

    #[test]
    fn test_invalid_key_display() {
        let err = KvError::InvalidKey("truncated string part".to_string());
        assert_eq!(format!("{}", err), "Invalid key: truncated string part");
    }

    #[test]
    fn test_serialization_error_from_serde() {
        let err: KvError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, KvError::Serialization(_)));
    }
}
