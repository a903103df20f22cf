//! Blob server - categories of binary blobs over HTTP
//!
//! Metadata lives in an embedded key-value database. Blob bytes live either in
//! the same database or in a directory tree, and GET responses for blobs are
//! cached in memory until a write touches the same URL.

mod auth;
mod config;
mod error;
mod routes;
mod server;
mod state;
mod types;

use crate::auth::SessionStore;
use crate::config::Config;
use crate::error::{Result, ServerError};
use crate::server::start_server;
use crate::state::AppState;
use blob_store::BlobStore;
use embedded_kv::{KvError, KvStore};
use response_cache::ResponseCache;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env().add_directive("blob_server=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting blob server...");

    let config = Config::from_env()?;
    info!("Port: {}", config.port);
    match &config.db_path {
        Some(path) => info!("Database: {:?}", path),
        None => info!("Database: in-memory"),
    }
    match &config.blob_path {
        Some(path) => info!("Blob dir: {:?}", path),
        None => info!("Blob content stored in the database"),
    }
    info!(
        "Max cache size: {} MB",
        config.cache_max_bytes / (1024 * 1024)
    );
    if config.passcode.is_none() {
        warn!("PASSCODE is not set, sign-in is disabled and the store is read-only");
    }

    let kv = KvStore::open(config.db_path.as_deref()).await?;
    let store = BlobStore::from_blob_path(kv.clone(), config.blob_path.clone());
    store.init().await?;

    let cache = ResponseCache::new(config.cache_max_bytes, config.cache_ttl);
    let sessions = SessionStore::new(kv.clone());
    let purge = config
        .kv_purge_interval
        .map(|interval| spawn_purge_task(kv.clone(), interval));

    let port = config.port;
    let state = AppState::new(store, cache, sessions, config);

    // Serve until shutdown is requested
    let served = start_server(state, port)
        .await
        .map_err(|e| ServerError::Config(format!("Server error: {}", e)));

    if let Some(purge) = purge {
        purge.abort();
    }
    kv.close().await;
    info!("Blob server stopped");

    served
}

/// Periodically drop expired entries (stale session tokens)
fn spawn_purge_task(kv: KvStore, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match kv.purge_expired().await {
                Ok(removed) => debug!(removed, "Expired entry sweep finished"),
                Err(KvError::NotInitialized) => break,
                Err(e) => warn!(error = %e, "Expired entry sweep failed"),
            }
        }
    })
}
