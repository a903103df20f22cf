//! Cache types

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Header flagging a stored entry as a dirty marker
pub const X_CACHE_DIRTY: HeaderName = HeaderName::from_static("x-cache-dirty");

/// A stored response: either a snapshot or a dirty marker
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CachedResponse {
    /// Sentinel meaning "treat as a miss"; never served to clients
    pub fn dirty_marker() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(X_CACHE_DIRTY, HeaderValue::from_static("true"));
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("max-age=0, no-cache, must-revalidate"),
        );
        Self {
            status: StatusCode::CONFLICT,
            headers,
            body: Bytes::new(),
        }
    }

    pub fn is_dirty_marker(&self) -> bool {
        self.headers
            .get(&X_CACHE_DIRTY)
            .map(|v| v.as_bytes() == b"true")
            .unwrap_or(false)
    }

    /// Approximate memory footprint, used as the cache weight
    pub(crate) fn weight(&self) -> u32 {
        let headers: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len())
            .sum();
        u32::try_from(self.body.len() + headers).unwrap_or(u32::MAX)
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Per-URL cache state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Uncached,
    Fresh,
    Dirty,
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
}
