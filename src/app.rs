use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::docs;
use crate::errors::AppError;
use crate::permission::permissions::{ADMIN, APP_MANAGE};
use crate::permission::{
    permission_middleware, PermissionConfig, PermissionGate, PermissionRule, ProtectedRouter,
};
use crate::record::{panic_response, record_middleware};
use crate::routes::{apps, health};
use crate::session::SqliteSessionStore;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub sessions: SqliteSessionStore,
    pub rule_count: usize,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            sessions: SqliteSessionStore::new(pool.clone()),
            pool,
            rule_count: 0,
        }
    }
}

/// Protected routes and the rule guarding each of them.
pub fn protected_routes() -> Result<ProtectedRouter<AppState>, AppError> {
    Ok(ProtectedRouter::new()
        .route(
            PermissionRule::post("/lcdp/app")?.with_permissions([APP_MANAGE]),
            apps::create_app_entry,
        )
        .route(
            PermissionRule::get("/lcdp/app/resources/:appid/:filename")?
                .with_permissions([APP_MANAGE])
                .with_master_key(ADMIN),
            apps::get_resource,
        ))
}

pub fn permission_config(settings: &Settings, sessions: SqliteSessionStore) -> Result<PermissionConfig, AppError> {
    PermissionConfig::with_lookup(sessions.clone())
        .context_builder(sessions)
        .key(settings.token_key.clone())
        .max_body_bytes(settings.max_body_bytes)
        .ignore_urls(&settings.ignore_urls)
}

pub async fn create_app(pool: SqlitePool, settings: &Settings) -> Result<Router, AppError> {
    let mut state = AppState::new(pool);

    let (protected, rules) = protected_routes()?.into_parts();
    state.rule_count = rules.len();

    let config = permission_config(settings, state.sessions.clone())?;
    let gate = Arc::new(PermissionGate::new(config, rules));
    tracing::info!(rules = gate.rules().len(), ignored = gate.config().ignore_list().len(), "permission gate ready");

    let openapi = docs::build_openapi(settings.port)?;

    let router = protected
        .route("/lcdp/about", get(apps::about))
        .route("/api/health", get(health::health))
        .with_state(state)
        .merge(docs::swagger_routes(openapi)?)
        .layer(axum::middleware::from_fn_with_state(gate, permission_middleware))
        .layer(DefaultBodyLimit::max(settings.max_body_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(axum::middleware::from_fn(record_middleware))
        .layer(TraceLayer::new_for_http());

    if !settings.cors {
        return Ok(router);
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    Ok(router.layer(cors))
}
