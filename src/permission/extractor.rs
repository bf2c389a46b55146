//! Token extraction.
//!
//! Where the token lives depends on the request shape:
//!
//! | shape                                   | source                    |
//! |-----------------------------------------|---------------------------|
//! | GET, DELETE, HEAD, OPTIONS, TRACE       | query string              |
//! | POST/PUT with `multipart/form-data`     | text form field           |
//! | anything else                           | top-level JSON object key |
//!
//! Bodies are single-read streams, so the body branches buffer the bytes and
//! put an identical body back on the request before decoding anything. The
//! request handed back to the caller is always consumable downstream, whether
//! extraction succeeded or not.

use axum::body::{self, Body, Bytes};
use axum::extract::{Query, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use serde_json::{Map, Value};

use super::caller::DecodedFields;

const MULTIPART_FORM_DATA: &str = "multipart/form-data";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to read request body: {0}")]
    BodyRead(#[source] axum::Error),
    #[error("failed to decode multipart body: {0}")]
    Multipart(#[from] multer::Error),
    #[error("failed to decode JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

/// How the token was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Query,
    Multipart,
    Json,
}

/// Outcome of a successful extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub shape: Shape,
    /// Possibly empty.
    pub token: String,
    /// Rendering of the inbound payload for the audit log.
    pub payload: String,
    /// Set only for the JSON shape.
    pub decoded: Option<DecodedFields>,
}

pub fn shape_of(method: &Method, content_type: Option<&str>) -> Shape {
    if has_no_body_semantics(method) {
        return Shape::Query;
    }

    let is_multipart = content_type
        .map(|ct| ct.contains(MULTIPART_FORM_DATA))
        .unwrap_or(false);

    if is_multipart && (method == Method::POST || method == Method::PUT) {
        Shape::Multipart
    } else {
        Shape::Json
    }
}

fn has_no_body_semantics(method: &Method) -> bool {
    [Method::GET, Method::DELETE, Method::HEAD, Method::OPTIONS, Method::TRACE].contains(method)
}

/// Pull the token named `key` out of `req`.
///
/// The returned request carries an unconsumed body in every case; on a body
/// read failure that body is empty because nothing could be recovered.
pub async fn extract_token(
    req: Request,
    key: &str,
    max_body_bytes: usize,
) -> (Request, Result<Extraction, ExtractError>) {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match shape_of(req.method(), content_type.as_deref()) {
        Shape::Query => {
            let extraction = from_query(&req, key);
            (req, Ok(extraction))
        }
        Shape::Multipart => {
            let (req, bytes) = match buffer_body(req, max_body_bytes).await {
                Ok(buffered) => buffered,
                Err((req, err)) => return (req, Err(err)),
            };
            let content_type = req.headers().get(CONTENT_TYPE).cloned();
            let result = from_multipart(bytes, content_type, key).await;
            (req, result)
        }
        Shape::Json => {
            let (req, bytes) = match buffer_body(req, max_body_bytes).await {
                Ok(buffered) => buffered,
                Err((req, err)) => return (req, Err(err)),
            };
            let result = from_json(&bytes, key);
            (req, result)
        }
    }
}

/// Drain the body and immediately re-attach an identical one.
async fn buffer_body(
    req: Request,
    max_body_bytes: usize,
) -> Result<(Request, Bytes), (Request, ExtractError)> {
    let (parts, body) = req.into_parts();

    match body::to_bytes(body, max_body_bytes).await {
        Ok(bytes) => Ok((Request::from_parts(parts, Body::from(bytes.clone())), bytes)),
        Err(err) => Err((Request::from_parts(parts, Body::empty()), ExtractError::BodyRead(err))),
    }
}

fn from_query(req: &Request, key: &str) -> Extraction {
    let payload = req.uri().query().unwrap_or_default().to_string();

    // a malformed query string simply yields no token
    let token = Query::<Vec<(String, String)>>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(pairs)| pairs.into_iter().find(|(k, _)| k == key))
        .map(|(_, v)| v)
        .unwrap_or_default();

    Extraction {
        shape: Shape::Query,
        token,
        payload,
        decoded: None,
    }
}

async fn from_multipart(
    bytes: Bytes,
    content_type: Option<HeaderValue>,
    key: &str,
) -> Result<Extraction, ExtractError> {
    let content_type = content_type
        .as_ref()
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let boundary = multer::parse_boundary(content_type)?;

    // parsed from the buffered copy, so `max_body_bytes` is the only size cap
    let mut multipart = multer::Multipart::new(Body::from(bytes).into_data_stream(), boundary);
    let mut fields: Vec<(String, Vec<String>)> = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        // file parts are neither token carriers nor logged
        if field.file_name().is_some() {
            continue;
        }
        let value = field.text().await?;

        match fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => fields.push((name, vec![value])),
        }
    }

    let token = fields
        .iter()
        .find(|(name, _)| name == key)
        .and_then(|(_, values)| values.first().cloned())
        .unwrap_or_default();

    let payload = fields
        .iter()
        .map(|(name, values)| format!("{}={}", name, values.join(",")))
        .collect::<Vec<_>>()
        .join("&");

    Ok(Extraction {
        shape: Shape::Multipart,
        token,
        payload,
        decoded: None,
    })
}

fn from_json(bytes: &Bytes, key: &str) -> Result<Extraction, ExtractError> {
    let fields: Map<String, Value> = serde_json::from_slice(bytes)?;
    let token = fields.get(key).map(render_token).unwrap_or_default();

    Ok(Extraction {
        shape: Shape::Json,
        token,
        payload: String::from_utf8_lossy(bytes).into_owned(),
        decoded: Some(DecodedFields(fields)),
    })
}

fn render_token(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
