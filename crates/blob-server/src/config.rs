use crate::error::{Result, ServerError};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_API_ROUTE: &str = "/api";
const DEFAULT_CACHE_MAX_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_PURGE_INTERVAL_SECS: u64 = 60;

/// A directory served under a URL prefix
#[derive(Debug, Clone, PartialEq)]
pub struct StaticRoute {
    pub route: String,
    pub dir: PathBuf,
    /// File served for directory requests, relative to the directory
    pub index: Option<PathBuf>,
    /// Served when no file matches, relative to `dir`
    pub fallback: Option<PathBuf>,
}

/// Application configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Database file; in-memory when unset
    pub db_path: Option<PathBuf>,
    /// Blob content directory; content lives in the database when unset
    pub blob_path: Option<PathBuf>,
    pub passcode: Option<String>,
    /// Allowed origins; empty disables CORS
    pub cors_origins: Vec<String>,
    pub api_route: String,
    pub static_routes: Vec<StaticRoute>,
    pub cache_max_bytes: u64,
    pub cache_ttl: Option<Duration>,
    /// `None` disables the expired-entry sweeper
    pub kv_purge_interval: Option<Duration>,
}

impl Config {
    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let port = var("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let cors_origins = var("CORS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let api_route = var("API_ROUTE").unwrap_or_else(|| DEFAULT_API_ROUTE.to_string());
        if !api_route.starts_with('/') {
            return Err(ServerError::Config(format!(
                "API_ROUTE must start with '/': {}",
                api_route
            )));
        }

        let static_routes = match var("STATIC_ROUTES") {
            Some(routes) => parse_static_routes(&routes)?,
            None => Vec::new(),
        };

        let cache_max_bytes = var("CACHE_MAX_BYTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_MAX_BYTES);

        let cache_ttl = var("CACHE_TTL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let purge_secs = var("KV_PURGE_INTERVAL_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_PURGE_INTERVAL_SECS);
        let kv_purge_interval = (purge_secs > 0).then(|| Duration::from_secs(purge_secs));

        Ok(Self {
            port,
            db_path: var("DB_PATH").map(PathBuf::from),
            blob_path: var("BLOB_PATH").map(PathBuf::from),
            passcode: var("PASSCODE"),
            cors_origins,
            api_route: api_route.trim_end_matches('/').to_string(),
            static_routes,
            cache_max_bytes,
            cache_ttl,
            kv_purge_interval,
        })
    }

    pub fn cors_enabled(&self) -> bool {
        !self.cors_origins.is_empty()
    }
}

/// `route,dir[,index[,fallback]]` entries separated by `:`
fn parse_static_routes(value: &str) -> Result<Vec<StaticRoute>> {
    value
        .split(':')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let mut fields = entry.split(',').map(str::trim);
            let route = fields.next().unwrap_or_default();
            let dir = fields.next().filter(|d| !d.is_empty()).ok_or_else(|| {
                ServerError::Config(format!("Static route is missing a directory: {}", entry))
            })?;
            if !route.starts_with('/') {
                return Err(ServerError::Config(format!(
                    "Static route must start with '/': {}",
                    entry
                )));
            }
            let index = fields.next().filter(|f| !f.is_empty()).map(PathBuf::from);
            let fallback = fields.next().filter(|f| !f.is_empty()).map(PathBuf::from);

            let route = match route.trim_end_matches('/') {
                "" => "/".to_string(),
                trimmed => trimmed.to_string(),
            };
            Ok(StaticRoute {
                route,
                dir: PathBuf::from(dir),
                index,
                fallback,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.api_route, "/api");
        assert!(config.db_path.is_none());
        assert!(config.blob_path.is_none());
        assert!(config.passcode.is_none());
        assert!(!config.cors_enabled());
        assert!(config.static_routes.is_empty());
        assert_eq!(config.cache_max_bytes, 64 * 1024 * 1024);
        assert!(config.cache_ttl.is_none());
        assert_eq!(config.kv_purge_interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("PORT", "9000"),
            ("DB_PATH", "/data/blob.redb"),
            ("BLOB_PATH", "/data/blobs"),
            ("PASSCODE", "hunter2"),
            ("CORS", "https://a.example, https://b.example"),
            ("API_ROUTE", "/v1/"),
            ("CACHE_TTL_SECS", "30"),
            ("KV_PURGE_INTERVAL_SECS", "0"),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.db_path, Some(PathBuf::from("/data/blob.redb")));
        assert_eq!(config.blob_path, Some(PathBuf::from("/data/blobs")));
        assert_eq!(config.passcode.as_deref(), Some("hunter2"));
        assert_eq!(
            config.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.api_route, "/v1");
        assert_eq!(config.cache_ttl, Some(Duration::from_secs(30)));
        assert!(config.kv_purge_interval.is_none());
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = config(&[("PASSCODE", ""), ("CORS", " ")]).unwrap();
        assert!(config.passcode.is_none());
        assert!(!config.cors_enabled());
    }

    #[test]
    fn test_static_routes() {
        let config = config(&[(
            "STATIC_ROUTES",
            "/,./public,index.html,404.html:/admin/,./admin:/docs,./docs,,index.html",
        )])
        .unwrap();

        assert_eq!(
            config.static_routes,
            vec![
                StaticRoute {
                    route: "/".to_string(),
                    dir: PathBuf::from("./public"),
                    index: Some(PathBuf::from("index.html")),
                    fallback: Some(PathBuf::from("404.html")),
                },
                StaticRoute {
                    route: "/admin".to_string(),
                    dir: PathBuf::from("./admin"),
                    index: None,
                    fallback: None,
                },
                StaticRoute {
                    route: "/docs".to_string(),
                    dir: PathBuf::from("./docs"),
                    index: None,
                    fallback: Some(PathBuf::from("index.html")),
                },
            ]
        );
    }

    #[test]
    fn test_invalid_static_route() {
        assert!(config(&[("STATIC_ROUTES", "/docs")]).is_err());
        assert!(config(&[("STATIC_ROUTES", "docs,./docs")]).is_err());
    }

    #[test]
    fn test_invalid_api_route() {
        let err = config(&[("API_ROUTE", "api")]).unwrap_err();
        assert!(err.to_string().contains("API_ROUTE"));
    }
}
