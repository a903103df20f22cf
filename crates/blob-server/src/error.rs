//! Error types for the blob server

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use blob_store::BlobError;
use embedded_kv::KvError;
use serde_json::json;
use std::fmt;

/// Startup and lifecycle errors
#[derive(Debug)]
pub enum ServerError {
    Config(String),
    Kv(KvError),
    Blob(BlobError),
    Io(Box<std::io::Error>),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ServerError::Kv(err) => write!(f, "Database error: {}", err),
            ServerError::Blob(err) => write!(f, "Blob store error: {}", err),
            ServerError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Kv(err) => Some(err),
            ServerError::Blob(err) => Some(err),
            ServerError::Io(err) => Some(err.as_ref()),
            ServerError::Config(_) => None,
        }
    }
}

impl From<KvError> for ServerError {
    fn from(err: KvError) -> Self {
        ServerError::Kv(err)
    }
}

impl From<BlobError> for ServerError {
    fn from(err: BlobError) -> Self {
        ServerError::Blob(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for ServerError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ServerError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Request error that converts to a `{ success: false, message }` response
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Forbidden,
    Blob(BlobError),
    Kv(KvError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".into()),
            AppError::Blob(e) => {
                tracing::error!(error = %e, "Blob store error");
                internal_error()
            }
            AppError::Kv(e) => {
                tracing::error!(error = %e, "Database error");
                internal_error()
            }
        };

        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}

fn internal_error() -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal Server Error".into(),
    )
}

impl From<BlobError> for AppError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::AlreadyExists(msg) => AppError::Conflict(msg),
            BlobError::NotFound(msg) => AppError::NotFound(msg),
            BlobError::InvalidName(_) => AppError::BadRequest(e.to_string()),
            other => AppError::Blob(other),
        }
    }
}

impl From<KvError> for AppError {
    fn from(e: KvError) -> Self {
        AppError::Kv(e)
    }
}
