//! Request recording: elapsed time per request and the JSON payload of small
//! responses, rejections from the permission gate included.

use std::any::Any;
use std::time::Instant;

use axum::body::{self, Body, HttpBody};
use axum::extract::Request;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::errors::Rejection;

/// Largest response body that gets logged.
pub const RESPONSE_LOG_LIMIT: usize = 64 * 1024;

pub async fn record_middleware(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let url = req.uri().to_string();

    let response = next.run(req).await;
    let response = log_json_payload(&url, response).await;

    tracing::info!(url = %url, elapsed_ms = started.elapsed().as_millis() as u64, "request finished");
    response
}

async fn log_json_payload(url: &str, response: Response) -> Response {
    let exact = response.body().size_hint().exact();
    if !is_small_json(response.headers(), exact) {
        return response;
    }

    let (parts, body) = response.into_parts();
    match body::to_bytes(body, RESPONSE_LOG_LIMIT).await {
        Ok(bytes) => {
            tracing::info!(url = %url, response = %String::from_utf8_lossy(&bytes), "response");
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(err) => {
            tracing::error!(url = %url, error = %err, "failed to buffer response for logging");
            Response::from_parts(parts, Body::empty())
        }
    }
}

/// Only bodies with a known length under the limit are buffered, so a
/// streamed or oversized body is never cut short.
fn is_small_json(headers: &HeaderMap, exact_len: Option<u64>) -> bool {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);

    let length = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .or_else(|| exact_len.and_then(|len| usize::try_from(len).ok()));

    is_json && matches!(length, Some(len) if len <= RESPONSE_LOG_LIMIT)
}

/// Panic handler for `CatchPanicLayer`: answer with the internal-error body.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "handler panicked");
    Rejection::Internal.into_response()
}
