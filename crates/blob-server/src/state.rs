use crate::auth::SessionStore;
use crate::config::Config;
use blob_store::BlobStore;
use chrono::{DateTime, Utc};
use response_cache::ResponseCache;
use std::sync::Arc;

/// Shared application state passed to all route handlers
#[derive(Clone)]
pub struct AppState {
    pub store: BlobStore,
    pub cache: ResponseCache,
    pub sessions: SessionStore,
    pub config: Arc<Config>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        store: BlobStore,
        cache: ResponseCache,
        sessions: SessionStore,
        config: Config,
    ) -> Self {
        Self {
            store,
            cache,
            sessions,
            config: Arc::new(config),
            started_at: Utc::now(),
        }
    }
}
