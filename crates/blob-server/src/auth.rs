//! Passcode sessions
//!
//! Signing in stores a random token under `[auth, token, <token>]` holding its
//! expiry time. Each authenticated request pushes the expiry out again.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::CookieJar;
use chrono::Utc;
use embedded_kv::{Key, KvError, KvStore, SetOptions};
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AppError;
use crate::state::AppState;

pub const AUTH_COOKIE: &str = "authenticated";

const TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Session tokens kept in the key-value store
#[derive(Clone)]
pub struct SessionStore {
    kv: KvStore,
}

impl SessionStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    fn token_key(token: &str) -> Key {
        Key::from_parts(["auth", "token", token])
    }

    /// Issue a fresh token valid for the session lifetime
    pub async fn create(&self) -> Result<String, KvError> {
        let token = Uuid::new_v4().to_string();
        self.renew(&token).await?;
        Ok(token)
    }

    pub async fn is_valid(&self, token: &str) -> Result<bool, KvError> {
        let now = Utc::now().timestamp_millis();
        let expires_at = self
            .kv
            .get(&Self::token_key(token))
            .await?
            .and_then(|entry| entry.value.as_i64());
        Ok(expires_at.map(|at| at > now).unwrap_or(false))
    }

    pub async fn renew(&self, token: &str) -> Result<(), KvError> {
        let expires_at = Utc::now().timestamp_millis() + TOKEN_TTL.as_millis() as i64;
        self.kv
            .set(
                &Self::token_key(token),
                json!(expires_at),
                SetOptions::expire_in(TOKEN_TTL),
            )
            .await?;
        Ok(())
    }

    pub async fn revoke(&self, token: &str) -> Result<(), KvError> {
        self.kv.delete(&Self::token_key(token)).await
    }
}

/// Proof that the request carries a live session
///
/// Use this as a handler parameter to require authentication.
#[derive(Debug, Clone, Copy)]
pub struct Authenticated;

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookies = CookieJar::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::Forbidden)?;
        authenticate(&state.sessions, &cookies).await
    }
}

/// Validate the session cookie and renew its token
pub async fn authenticate(
    sessions: &SessionStore,
    cookies: &CookieJar,
) -> Result<Authenticated, AppError> {
    let token = cookies
        .get(AUTH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(AppError::Forbidden)?;

    if !sessions.is_valid(&token).await? {
        debug!("Rejected expired or unknown session");
        return Err(AppError::Forbidden);
    }
    sessions.renew(&token).await?;

    Ok(Authenticated)
}

/// Middleware letting reads through and requiring a session for writes
///
/// Layered outside the response cache, so a rejected write never dirties it.
pub async fn require_auth_for_writes(
    State(state): State<AppState>,
    cookies: CookieJar,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if matches!(*request.method(), Method::POST | Method::PUT | Method::DELETE) {
        authenticate(&state.sessions, &cookies).await?;
    }
    Ok(next.run(request).await)
}

/// Cross-site requests need `SameSite=None; Secure` for the cookie to stick
pub fn is_cross_site(config: &Config, headers: &HeaderMap) -> bool {
    let fetch_site = headers
        .get("sec-fetch-site")
        .and_then(|v| v.to_str().ok());
    config.cors_enabled() && fetch_site != Some("same-origin")
}

pub fn session_cookie(token: &str, cross_site: bool) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; {}",
        AUTH_COOKIE,
        token,
        same_site(cross_site)
    )
}

pub fn cleared_cookie(cross_site: bool) -> String {
    format!(
        "{}=; HttpOnly; Path=/; Max-Age=0; {}",
        AUTH_COOKIE,
        same_site(cross_site)
    )
}

fn same_site(cross_site: bool) -> &'static str {
    if cross_site {
        "SameSite=None; Secure"
    } else {
        "SameSite=Strict"
    }
}
