use axum::extract::Path;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::errors::{AppError, AppResult};
use crate::permission::{Caller, DecodedFields};

/// Envelope for successful responses; rejections use the same `code`/`msg`
/// pair with a non-zero code.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AboutInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateAppRequest {
    pub token: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AppEntry {
    pub name: String,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub fields: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResourceInfo {
    pub appid: String,
    pub filename: String,
    pub requested_by: Option<String>,
}

#[utoipa::path(
    get,
    path = "/lcdp/about",
    tag = "Apps",
    responses((status = 200, description = "Service information", body = AboutInfo))
)]
pub async fn about() -> Json<ApiResponse<AboutInfo>> {
    Json(ApiResponse::ok(AboutInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

/// Reads the body the gate already inspected; it arrives intact.
#[utoipa::path(
    post,
    path = "/lcdp/app",
    tag = "Apps",
    request_body = CreateAppRequest,
    responses(
        (status = 200, description = "App created, or a rejection body with a non-zero code", body = AppEntry)
    )
)]
pub async fn create_app_entry(
    caller: Caller,
    decoded: Option<DecodedFields>,
    Json(payload): Json<Value>,
) -> AppResult<Json<ApiResponse<AppEntry>>> {
    let name = payload
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("name is required"))?;
    let description = payload.get("description").and_then(Value::as_str).map(str::to_string);

    tracing::info!(app = %name, user = caller.get_str("name").unwrap_or("-"), "creating app");

    Ok(Json(ApiResponse::ok(AppEntry {
        name: name.to_string(),
        description,
        created_by: caller.get_str("name").map(str::to_string),
        fields: decoded.map(|d| d.0.len()).unwrap_or(0),
    })))
}

#[utoipa::path(
    get,
    path = "/lcdp/app/resources/{appid}/{filename}",
    tag = "Apps",
    params(
        ("appid" = String, Path, description = "Application id"),
        ("filename" = String, Path, description = "Resource file name"),
        ("token" = String, Query, description = "Session token")
    ),
    responses((status = 200, description = "Resource descriptor", body = ResourceInfo))
)]
pub async fn get_resource(
    caller: Caller,
    Path((appid, filename)): Path<(String, String)>,
) -> Json<ApiResponse<ResourceInfo>> {
    Json(ApiResponse::ok(ResourceInfo {
        appid,
        filename,
        requested_by: caller.get_str("name").map(str::to_string),
    }))
}
