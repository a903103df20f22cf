pub mod auth;
pub mod blob;
pub mod health;

use crate::state::AppState;
use axum::Router;

/// Routes mounted under the API prefix
pub fn api_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::router())
        .nest("/blob", blob::router(state))
}
