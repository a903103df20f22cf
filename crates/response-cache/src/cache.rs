//! Response cache store

use crate::types::{CacheStats, CachedResponse, EntryState};
use moka::sync::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// In-memory response cache keyed by request URL
///
/// Capacity is counted in bytes of stored responses. Cheap to clone; clones
/// share the same entries and counters.
#[derive(Clone)]
pub struct ResponseCache {
    entries: Cache<String, CachedResponse>,
    max_bytes: u64,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ResponseCache {
    pub fn new(max_bytes: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(|url: &String, response: &CachedResponse| {
                response
                    .weight()
                    .saturating_add(u32::try_from(url.len()).unwrap_or(u32::MAX))
            });
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }

        Self {
            entries: builder.build(),
            max_bytes,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fresh snapshot for `url`; dirty markers count as misses
    pub fn lookup(&self, url: &str) -> Option<CachedResponse> {
        match self.entries.get(url) {
            Some(response) if !response.is_dirty_marker() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(response)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn store(&self, url: &str, response: CachedResponse) {
        debug!(url, status = %response.status, size = response.body.len(), "Caching response");
        self.entries.insert(url.to_string(), response);
    }

    pub fn mark_dirty(&self, url: &str) {
        debug!(url, "Marking cached response dirty");
        self.entries
            .insert(url.to_string(), CachedResponse::dirty_marker());
    }

    /// Mark every cached URL under `prefix` dirty
    ///
    /// For mutations that remove many resources at once, such as a whole
    /// category of blobs. URLs never cached stay uncached.
    pub fn mark_dirty_prefix(&self, prefix: &str) {
        let urls: Vec<String> = self
            .entries
            .iter()
            .filter(|(url, _)| url.starts_with(prefix))
            .map(|(url, _)| url.to_string())
            .collect();
        debug!(prefix, count = urls.len(), "Marking cached responses dirty");
        for url in urls {
            self.entries.insert(url, CachedResponse::dirty_marker());
        }
    }

    /// Largest body worth capturing; anything bigger could never be kept
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Current state of `url`, without touching the hit/miss counters
    pub fn state(&self, url: &str) -> EntryState {
        match self.entries.get(url) {
            None => EntryState::Uncached,
            Some(response) if response.is_dirty_marker() => EntryState::Dirty,
            Some(_) => EntryState::Fresh,
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks();
        CacheStats {
            entries: self.entries.entry_count(),
            total_size: self.entries.weighted_size(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use bytes::Bytes;

    fn snapshot(body: &'static str) -> CachedResponse {
        CachedResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_lookup_counts_hits_and_misses() {
        let cache = ResponseCache::new(1024 * 1024, None);

        assert!(cache.lookup("/blob/docs/readme").is_none());
        cache.store("/blob/docs/readme", snapshot("hello"));
        let hit = cache.lookup("/blob/docs/readme").unwrap();
        assert_eq!(&hit.body[..], b"hello");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_dirty_marker_is_a_miss() {
        let cache = ResponseCache::new(1024 * 1024, None);
        cache.store("/a", snapshot("content"));
        assert_eq!(cache.state("/a"), EntryState::Fresh);

        cache.mark_dirty("/a");
        assert_eq!(cache.state("/a"), EntryState::Dirty);
        assert!(cache.lookup("/a").is_none());

        cache.mark_dirty("/a");
        assert_eq!(cache.state("/a"), EntryState::Dirty);
    }

    #[test]
    fn test_dirty_on_uncached_url() {
        let cache = ResponseCache::new(1024 * 1024, None);
        assert_eq!(cache.state("/never"), EntryState::Uncached);
        cache.mark_dirty("/never");
        assert_eq!(cache.state("/never"), EntryState::Dirty);
    }

    #[test]
    fn test_urls_are_distinct_keys() {
        let cache = ResponseCache::new(1024 * 1024, None);
        cache.store("/a?x=1", snapshot("one"));
        assert_eq!(cache.state("/a"), EntryState::Uncached);
        assert_eq!(cache.state("/a?x=1"), EntryState::Fresh);
    }

    #[test]
    fn test_prefix_marks_only_matching_urls() {
        let cache = ResponseCache::new(1024 * 1024, None);
        cache.store("/blob/docs/readme", snapshot("one"));
        cache.store("/blob/docs/guide?v=2", snapshot("two"));
        cache.store("/blob/docs-old/readme", snapshot("three"));

        cache.mark_dirty_prefix("/blob/docs/");
        assert_eq!(cache.state("/blob/docs/readme"), EntryState::Dirty);
        assert_eq!(cache.state("/blob/docs/guide?v=2"), EntryState::Dirty);
        assert_eq!(cache.state("/blob/docs-old/readme"), EntryState::Fresh);
        assert_eq!(cache.state("/blob/docs/never"), EntryState::Uncached);
    }

    #[test]
    fn test_stats_track_weighted_size() {
        let cache = ResponseCache::new(1024 * 1024, None);
        cache.store("/a", snapshot("12345"));
        let stats = cache.stats();
        assert_eq!(stats.total_size, 5 + "/a".len() as u64);
    }
}
