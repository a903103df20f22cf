//! Axum middleware applying the cache to a set of routes

use crate::cache::ResponseCache;
use crate::types::CachedResponse;
use axum::body::{Body, HttpBody};
use axum::extract::{OriginalUri, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

/// `HIT` when served from a snapshot, `MISS` when the handler ran
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Chunks buffered between the capture task and the client
const TEE_BUFFER: usize = 16;

/// Cache-aside middleware, for use with `axum::middleware::from_fn_with_state`
///
/// Entries are keyed by the path and query of the original request URI, so
/// nesting the cached routes does not change their keys.
pub async fn response_cache(
    State(cache): State<ResponseCache>,
    request: Request,
    next: Next,
) -> Response {
    let url = cache_key(&request);
    let method = request.method().clone();

    match method {
        Method::GET => serve_get(cache, url, request, next).await,
        Method::POST | Method::PUT | Method::DELETE => {
            let _dirty = DirtyGuard { cache, url };
            next.run(request).await
        }
        _ => next.run(request).await,
    }
}

fn cache_key(request: &Request) -> String {
    let uri = request
        .extensions()
        .get::<OriginalUri>()
        .map(|original| &original.0)
        .unwrap_or_else(|| request.uri());
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

/// Writes the dirty marker when dropped
///
/// Dropped on every exit from a mutating request: normal return, panic
/// unwinding, or the request future being cancelled.
struct DirtyGuard {
    cache: ResponseCache,
    url: String,
}

impl Drop for DirtyGuard {
    fn drop(&mut self) {
        self.cache.mark_dirty(&self.url);
    }
}

async fn serve_get(cache: ResponseCache, url: String, request: Request, next: Next) -> Response {
    if let Some(snapshot) = cache.lookup(&url) {
        debug!(url = %url, "Cache hit");
        let mut response = snapshot.into_response();
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static("HIT"));
        return response;
    }

    let response = next.run(request).await;
    let known_empty = response.body().size_hint().exact() == Some(0);
    if response.status() != StatusCode::OK || known_empty {
        return with_miss_header(response);
    }

    let (mut parts, body) = response.into_parts();
    let status = parts.status;
    let headers = parts.headers.clone();
    parts
        .headers
        .insert(X_CACHE, HeaderValue::from_static("MISS"));

    let body = tee_body(body, cache, url, status, headers);
    Response::from_parts(parts, body)
}

fn with_miss_header(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static("MISS"));
    response
}

/// Forward `body` to the client while buffering a copy for the cache
///
/// A spawned task pumps the upstream body. Every chunk goes into the capture
/// buffer before it is offered to the client, and the task keeps reading after
/// the client goes away, so a stored snapshot always holds the full body. The
/// snapshot is stored before the client stream ends. A body that outgrows the
/// cache capacity is dropped from the capture and only forwarded.
fn tee_body(
    body: Body,
    cache: ResponseCache,
    url: String,
    status: StatusCode,
    headers: HeaderMap,
) -> Body {
    let (mut tx, rx) = mpsc::channel::<Result<Bytes, axum::Error>>(TEE_BUFFER);

    let limit = usize::try_from(cache.max_bytes()).unwrap_or(usize::MAX);

    tokio::spawn(async move {
        let mut upstream = body.into_data_stream();
        let mut captured = BytesMut::new();
        let mut capturing = true;
        let mut client_open = true;

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(chunk) => {
                    if capturing {
                        if captured.len() + chunk.len() > limit {
                            debug!(url = %url, limit, "Body exceeds cache capacity, not caching");
                            captured = BytesMut::new();
                            capturing = false;
                            if !client_open {
                                return;
                            }
                        } else {
                            captured.extend_from_slice(&chunk);
                        }
                    }
                    if client_open && tx.send(Ok(chunk)).await.is_err() {
                        if !capturing {
                            // Nothing left to capture
                            return;
                        }
                        debug!(url = %url, "Client went away, finishing capture");
                        client_open = false;
                    }
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Upstream body failed, not caching");
                    if client_open {
                        let _ = tx.send(Err(e)).await;
                    }
                    return;
                }
            }
        }

        if capturing && !captured.is_empty() {
            cache.store(
                &url,
                CachedResponse {
                    status,
                    headers,
                    body: captured.freeze(),
                },
            );
        }
        drop(tx);
    });

    Body::from_stream(rx)
}
