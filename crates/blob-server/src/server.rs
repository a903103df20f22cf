//! HTTP server assembly
//!
//! `/health` at the root, the API under the configured prefix, then any
//! static directories.

use crate::config::{Config, StaticRoute};
use crate::routes;
use crate::state::AppState;
use axum::extract::{OriginalUri, Request, State};
use axum::http::{header, HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::signal;
use tower::{Layer, Service};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{info, warn};

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();
    let api = routes::api_router(&state);

    let app = Router::new().route("/health", get(routes::health::health));
    let app = if config.api_route.is_empty() {
        app.merge(api)
    } else {
        app.nest(&config.api_route, api)
    };
    let mut app = app.with_state(state);

    if let Some(cors) = cors_layer(&config) {
        app = app.layer(cors);
    }

    for route in &config.static_routes {
        app = mount_static(app, route);
    }
    app
}

fn cors_layer(config: &Config) -> Option<CorsLayer> {
    if !config.cors_enabled() {
        return None;
    }

    let layer = if config.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::COOKIE])
            .allow_credentials(true)
    };
    Some(layer)
}

fn mount_static(app: Router, route: &StaticRoute) -> Router {
    info!(
        route = %route.route,
        dir = ?route.dir,
        index = ?route.index,
        fallback = ?route.fallback,
        "Serving static files"
    );

    let entry = middleware::from_fn_with_state(Arc::new(route.clone()), static_entry);
    let serve_dir = ServeDir::new(&route.dir).append_index_html_on_directories(false);
    match &route.fallback {
        Some(fallback) => mount(
            app,
            &route.route,
            entry.layer(serve_dir.fallback(ServeFile::new(route.dir.join(fallback)))),
        ),
        None => mount(app, &route.route, entry.layer(serve_dir)),
    }
}

/// Redirect the bare prefix to `prefix/` and point directory requests at the
/// configured index file
async fn static_entry(
    State(route): State<Arc<StaticRoute>>,
    mut request: Request,
    next: Next,
) -> Response {
    let original_path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    if route.route != "/" && original_path == route.route {
        return Redirect::temporary(&format!("{}/", route.route)).into_response();
    }

    if let Some(index) = route.index.as_deref().and_then(|i| i.to_str()) {
        let uri = request.uri();
        if uri.path().ends_with('/') {
            let rewritten = match uri.query() {
                Some(query) => format!("{}{}?{}", uri.path(), index, query),
                None => format!("{}{}", uri.path(), index),
            };
            if let Ok(rewritten) = rewritten.parse() {
                *request.uri_mut() = rewritten;
            }
        }
    }
    next.run(request).await
}

/// `/` becomes the router fallback; anything else is nested
fn mount<S>(app: Router, route: &str, service: S) -> Router
where
    S: Service<Request, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Response: IntoResponse,
    S::Future: Send + 'static,
{
    if route == "/" {
        app.fallback_service(service)
    } else {
        app.nest_service(route, service)
    }
}

/// Start the HTTP server and run until Ctrl-C or SIGTERM
pub async fn start_server(state: AppState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
