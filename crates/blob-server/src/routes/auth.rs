use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use tracing::{info, warn};

use crate::auth::{self, Authenticated, AUTH_COOKIE};
use crate::error::AppError;
use crate::state::AppState;
use crate::types::{ApiMessage, SignInRequest};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(status))
        .route("/sign-in", post(sign_in))
        .route("/sign-out", post(sign_out))
}

/// GET /auth
/// 200 when the session cookie is valid, 403 otherwise.
async fn status(_session: Authenticated) -> Json<ApiMessage> {
    Json(ApiMessage::ok("Authenticated"))
}

/// POST /auth/sign-in
/// Exchanges the passcode for a session cookie.
async fn sign_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: SignInRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))?;

    let Some(expected) = state.config.passcode.as_deref() else {
        warn!("Sign-in attempted but no passcode is configured");
        return Err(AppError::Forbidden);
    };
    if request.passcode.as_deref() != Some(expected) {
        warn!("Sign-in rejected");
        return Err(AppError::Forbidden);
    }

    let token = state.sessions.create().await?;
    let cookie = auth::session_cookie(&token, auth::is_cross_site(&state.config, &headers));
    info!("Signed in");

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(ApiMessage::ok("Signed in")),
    )
        .into_response())
}

/// POST /auth/sign-out
/// Revokes the session token and clears the cookie.
async fn sign_out(
    State(state): State<AppState>,
    headers: HeaderMap,
    cookies: CookieJar,
) -> Result<Response, AppError> {
    if let Some(cookie) = cookies.get(AUTH_COOKIE) {
        state.sessions.revoke(cookie.value()).await?;
        info!("Signed out");
    }

    let cookie = auth::cleared_cookie(auth::is_cross_site(&state.config, &headers));
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(ApiMessage::ok("Signed out")),
    )
        .into_response())
}
