//! Embedded ordered key-value store
//!
//! A small async layer over redb. Keys are tuples of typed parts encoded so
//! that byte order equals tuple order, which makes prefix scans cheap. Entries
//! carry a versionstamp (the write witness) and an optional expiry, and large
//! byte values can be stored as chunks next to regular entries.

mod error;
mod key;
mod large;
mod store;
mod types;

pub use error::{KvError, Result};
pub use key::{Key, KeyPart};
pub use large::{LargeValueStream, CHUNK_SIZE};
pub use store::{EntryStream, KvStore};
pub use types::{Entry, SetOptions, Versionstamp};
