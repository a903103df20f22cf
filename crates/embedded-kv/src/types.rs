//! Store types

use crate::key::Key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Write witness assigned to every successful `set`
///
/// Monotonically increasing per database. Its presence on an [`Entry`] is what
/// makes the entry exist, independently of the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Versionstamp(pub u64);

impl fmt::Display for Versionstamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:020x}", self.0)
    }
}

/// A live entry read from the store
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: Key,
    pub value: serde_json::Value,
    pub versionstamp: Versionstamp,
}

/// Options for `KvStore::set`
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Entry is treated as absent once this much time has passed
    pub expire_in: Option<Duration>,
}

impl SetOptions {
    pub fn expire_in(duration: Duration) -> Self {
        Self {
            expire_in: Some(duration),
        }
    }
}

/// On-disk representation of an entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    pub value: serde_json::Value,
    pub versionstamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn into_entry(self, key: Key) -> Entry {
        Entry {
            key,
            value: self.value,
            versionstamp: Versionstamp(self.versionstamp),
        }
    }
}

/// Witness entry describing a chunked large value
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(crate) struct LargeValueMeta {
    pub chunks: u64,
    pub size: u64,
}
