use axum::body::{Body, Bytes};
use axum::extract::{OriginalUri, Path, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use blob_store::ByteStream;
use futures::{StreamExt, TryStreamExt};
use response_cache::{response_cache, ResponseCache};
use serde_json::Value;
use std::io;

use crate::auth::require_auth_for_writes;
use crate::error::AppError;
use crate::state::AppState;
use crate::types::ApiMessage;

/// Category and blob routes
///
/// Writes need a session. Only the blob routes go through the response
/// cache, and the session check runs before it.
pub fn router(state: &AppState) -> Router<AppState> {
    let cache = middleware::from_fn_with_state(state.cache.clone(), response_cache);

    Router::new()
        .route("/", get(list_categories))
        .route(
            "/{category}",
            get(list_blob_keys)
                .post(create_category)
                .put(update_category)
                .delete(delete_category),
        )
        .route(
            "/{category}/{key}",
            get(get_blob)
                .post(create_blob)
                .put(update_blob)
                .delete(delete_blob)
                .route_layer(cache),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth_for_writes,
        ))
}

// --- Categories ---

async fn list_categories(State(state): State<AppState>) -> Result<Json<Vec<String>>, AppError> {
    let names = state.store.list_categories().await?;
    Ok(Json(names.into_iter().collect()))
}

async fn list_blob_keys(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    let keys = state
        .store
        .list_blob_keys(&category)
        .await?
        .ok_or_else(|| AppError::NotFound("Category not found.".to_string()))?;
    Ok(Json(keys.into_iter().collect()))
}

async fn create_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
    body: Bytes,
) -> Result<Json<ApiMessage>, AppError> {
    let meta = parse_metadata(&body)?;
    state.store.create_category(&category, meta).await?;
    Ok(Json(ApiMessage::ok("Category created")))
}

async fn update_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
    body: Bytes,
) -> Result<Json<ApiMessage>, AppError> {
    let meta = parse_metadata(&body)?;
    state.store.update_category(&category, meta).await?;
    Ok(Json(ApiMessage::ok("Category updated")))
}

/// Deleting a category also removes its blobs, so every cached blob URL
/// below it is marked dirty, even when the delete fails part way.
async fn delete_category(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(category): Path<String>,
) -> Result<Json<ApiMessage>, AppError> {
    let _dirty = CategoryDirtyGuard {
        cache: state.cache.clone(),
        prefix: format!("{}/", uri.path()),
    };
    state.store.delete_category(&category).await?;
    Ok(Json(ApiMessage::ok("Category deleted")))
}

struct CategoryDirtyGuard {
    cache: ResponseCache,
    prefix: String,
}

impl Drop for CategoryDirtyGuard {
    fn drop(&mut self) {
        self.cache.mark_dirty_prefix(&self.prefix);
    }
}

/// Empty body means `null` metadata
fn parse_metadata(body: &[u8]) -> Result<Value, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))
}

// --- Blobs ---

async fn get_blob(
    State(state): State<AppState>,
    Path((category, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let blob = state
        .store
        .get_blob(&category, &key)
        .await?
        .ok_or_else(|| AppError::NotFound("Blob not found.".to_string()))?;

    let mut response = Body::from_stream(blob.content).into_response();
    if let Some(content_type) = blob
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

async fn create_blob(
    State(state): State<AppState>,
    Path((category, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ApiMessage>, AppError> {
    state
        .store
        .create_blob(&category, &key, request_stream(body), content_type(&headers))
        .await?;
    Ok(Json(ApiMessage::ok("Blob created")))
}

async fn update_blob(
    State(state): State<AppState>,
    Path((category, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<ApiMessage>, AppError> {
    state
        .store
        .update_blob(&category, &key, request_stream(body), content_type(&headers))
        .await?;
    Ok(Json(ApiMessage::ok("Blob updated")))
}

async fn delete_blob(
    State(state): State<AppState>,
    Path((category, key)): Path<(String, String)>,
) -> Result<Json<ApiMessage>, AppError> {
    state.store.delete_blob(&category, &key).await?;
    Ok(Json(ApiMessage::ok("Blob deleted")))
}

fn request_stream(body: Body) -> ByteStream {
    body.into_data_stream().map_err(io::Error::other).boxed()
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
