//! Cache-aside HTTP response cache
//!
//! Successful GET responses are captured per URL while they stream to the
//! client. Any POST, PUT or DELETE to the same URL overwrites the snapshot with
//! a dirty marker, so the next GET goes back to the handler.

mod cache;
mod middleware;
mod types;

pub use cache::ResponseCache;
pub use middleware::{response_cache, X_CACHE};
pub use types::{CacheStats, CachedResponse, EntryState, X_CACHE_DIRTY};
