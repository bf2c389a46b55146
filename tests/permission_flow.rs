use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::body::{self, Body};
use axum::extract::{DefaultBodyLimit, Multipart, Path};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use permission_gate::errors::ErrorBody;
use permission_gate::models::session::SessionRecord;
use permission_gate::permission::permissions::{ADMIN, APP_MANAGE};
use permission_gate::permission::{
    permission_middleware, Caller, DecodedFields, ErrorRenderers, Operation, PermissionConfig, PermissionGate,
    PermissionRule, ProtectedRouter, RuleTable,
};
use permission_gate::session::MemorySessionStore;

type Hits = Arc<AtomicUsize>;

const BOUNDARY: &str = "gate-test-boundary";

fn sessions() -> MemorySessionStore {
    let store = MemorySessionStore::new();
    store.insert(SessionRecord::new("tok-a", Uuid::new_v4(), "alice").with_permissions(["A"]));
    store.insert(SessionRecord::new("tok-ab", Uuid::new_v4(), "bob").with_permissions(["A", "B"]));
    store.insert(SessionRecord::new("tok-b", Uuid::new_v4(), "carol").with_permissions(["B"]));
    store.insert(SessionRecord::new("tok-admin", Uuid::new_v4(), "root").with_permissions([ADMIN]));
    store.insert(SessionRecord::new("tok-none", Uuid::new_v4(), "nobody"));
    store.insert(
        SessionRecord::new("tok-old", Uuid::new_v4(), "ghost")
            .with_permissions(["A"])
            .with_expiry(Utc::now() - Duration::hours(1)),
    );
    store
}

fn default_config() -> PermissionConfig {
    let store = sessions();
    PermissionConfig::with_lookup(store.clone())
        .context_builder(store)
        .ignore_urls(["/lcdp/about", "/docs.*"])
        .unwrap()
}

fn app(config: PermissionConfig, hits: Hits) -> Router {
    let (router, rules) = ProtectedRouter::<()>::new()
        .route(
            PermissionRule::post("/lcdp/app").unwrap().with_permissions([APP_MANAGE]),
            create_entry,
        )
        .route(
            PermissionRule::get("/lcdp/app/resources/:appid/:filename")
                .unwrap()
                .with_permissions([APP_MANAGE])
                .with_master_key(ADMIN),
            resource,
        )
        .route(
            PermissionRule::delete("/lcdp/app/:appid")
                .unwrap()
                .with_permissions(["A", "B"])
                .with_operation(Operation::And),
            remove,
        )
        .route(
            PermissionRule::post("/lcdp/upload").unwrap().with_permissions(["B"]),
            upload,
        )
        .route(PermissionRule::get("/lcdp/open").unwrap(), open)
        .into_parts();

    let router = router
        .route("/lcdp/about", get(open).post(open))
        .route("/lcdp/about/more", get(open))
        .route("/public/ping", get(open));
    gated(router, config, rules, hits)
}

fn gated(router: Router, config: PermissionConfig, rules: RuleTable, hits: Hits) -> Router {
    let gate = Arc::new(PermissionGate::new(config, rules));
    router
        .layer(Extension(hits))
        .layer(axum::middleware::from_fn_with_state(gate, permission_middleware))
}

async fn create_entry(
    Extension(hits): Extension<Hits>,
    caller: Caller,
    decoded: DecodedFields,
    Json(body): Json<Value>,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "code": 0,
        "body": body,
        "decoded_name": decoded.get("name"),
        "name": caller.get_str("name"),
        "user_id": caller.get_str("user_id"),
        "granted": caller.permissions.as_str(),
    }))
}

async fn resource(
    Extension(hits): Extension<Hits>,
    caller: Caller,
    Path((appid, filename)): Path<(String, String)>,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "code": 0, "appid": appid, "filename": filename, "name": caller.get_str("name") }))
}

async fn remove(Extension(hits): Extension<Hits>, Path(appid): Path<String>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "code": 0, "removed": appid }))
}

async fn upload(Extension(hits): Extension<Hits>, mut multipart: Multipart) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    let mut fields = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let text = field.text().await.unwrap_or_default();
        fields.push(json!([name, text]));
    }
    Json(json!({ "code": 0, "fields": fields }))
}

async fn upload_sizes(Extension(hits): Extension<Hits>, caller: Caller, mut multipart: Multipart) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    let mut sizes = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let len = field.bytes().await.map(|b| b.len()).unwrap_or(0);
        sizes.push(json!([name, len]));
    }
    Json(json!({ "code": 0, "sizes": sizes, "name": caller.get_str("name") }))
}

async fn open(Extension(hits): Extension<Hits>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "code": 0 }))
}

async fn call(app: Router, req: Request<Body>) -> Result<(StatusCode, Value)> {
    let resp: Response = app.oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
    Ok((status, value))
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &str)>) -> String {
    let mut out = String::new();
    for (name, value) in fields {
        out.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    if let Some((name, content)) = file {
        out.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.txt\"\r\nContent-Type: text/plain\r\n\r\n{content}\r\n"
        ));
    }
    out.push_str(&format!("--{BOUNDARY}--\r\n"));
    out
}

fn multipart_post(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

fn assert_rejected(status: StatusCode, body: &Value, code: i64, msg: &str) {
    assert_eq!(status, StatusCode::OK, "rejections are served with 200");
    assert_eq!(body, &json!({ "code": code, "msg": msg }));
}

#[tokio::test]
async fn missing_token_is_rejected_before_the_handler() -> Result<()> {
    let hits = Hits::default();
    let (status, body) = call(app(default_config(), hits.clone()), json_post("/lcdp/app", json!({ "name": "x" }))).await?;

    assert_rejected(status, &body, 2, "Token Not Exist Error");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn empty_token_counts_as_missing() -> Result<()> {
    let hits = Hits::default();
    let (status, body) = call(app(default_config(), hits.clone()), get_req("/lcdp/app/resources/1/a.png?token=")).await?;

    assert_rejected(status, &body, 2, "Token Not Exist Error");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn unknown_and_expired_tokens_are_invalid() -> Result<()> {
    for token in ["nope", "tok-old"] {
        let hits = Hits::default();
        let uri = format!("/lcdp/app/resources/1/a.png?token={token}");
        let (status, body) = call(app(default_config(), hits.clone()), get_req(&uri)).await?;

        assert_rejected(status, &body, 3, "Token Invalid Error");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
    Ok(())
}

#[tokio::test]
async fn lacking_permission_is_denied() -> Result<()> {
    let hits = Hits::default();
    let (status, body) = call(
        app(default_config(), hits.clone()),
        json_post("/lcdp/app", json!({ "token": "tok-b", "name": "x" })),
    )
    .await?;

    assert_rejected(status, &body, 4, "Permission Error");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn json_body_reaches_the_handler_intact_with_context() -> Result<()> {
    let hits = Hits::default();
    let payload = json!({ "token": "tok-a", "name": "crm", "tags": ["x", "y"], "nested": { "k": 1 } });
    let (status, body) = call(app(default_config(), hits.clone()), json_post("/lcdp/app", payload.clone())).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["body"], payload);
    assert_eq!(body["decoded_name"], "crm");
    assert_eq!(body["name"], "alice");
    assert!(body["user_id"].as_str().is_some_and(|id| Uuid::parse_str(id).is_ok()));
    assert_eq!(body["granted"], "A");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn non_string_token_values_are_rendered_as_json_text() -> Result<()> {
    let store = MemorySessionStore::new();
    store.insert(SessionRecord::new("42", Uuid::new_v4(), "numeric").with_permissions(["A"]));
    let config = PermissionConfig::with_lookup(store);

    let hits = Hits::default();
    let (_, body) = call(app(config, hits.clone()), json_post("/lcdp/app", json!({ "token": 42 }))).await?;

    assert_eq!(body["code"], 0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn undecodable_json_is_an_internal_error() -> Result<()> {
    for raw in ["{not json", "", "[1,2,3]"] {
        let hits = Hits::default();
        let req = Request::builder()
            .method("POST")
            .uri("/lcdp/app")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(raw))?;
        let (status, body) = call(app(default_config(), hits.clone()), req).await?;

        assert_rejected(status, &body, 1, "Server Internal Error");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
    Ok(())
}

#[tokio::test]
async fn query_token_and_path_params_pass_through() -> Result<()> {
    let hits = Hits::default();
    let (status, body) = call(
        app(default_config(), hits.clone()),
        get_req("/lcdp/app/resources/app-7/logo.png?token=tok-a"),
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "code": 0, "appid": "app-7", "filename": "logo.png", "name": "alice" }));
    Ok(())
}

#[tokio::test]
async fn master_key_bypasses_the_permission_list() -> Result<()> {
    let hits = Hits::default();
    let (_, body) = call(
        app(default_config(), hits.clone()),
        get_req("/lcdp/app/resources/app-7/logo.png?token=tok-admin"),
    )
    .await?;

    assert_eq!(body["code"], 0);
    assert_eq!(body["name"], "root");
    Ok(())
}

#[tokio::test]
async fn and_rules_need_every_permission() -> Result<()> {
    let del = |token: &str| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/lcdp/app/app-9?token={token}"))
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = call(app(default_config(), Hits::default()), del("tok-a")).await?;
    assert_rejected(status, &body, 4, "Permission Error");

    let (_, body) = call(app(default_config(), Hits::default()), del("tok-ab")).await?;
    assert_eq!(body, json!({ "code": 0, "removed": "app-9" }));
    Ok(())
}

#[tokio::test]
async fn rules_without_permissions_admit_any_resolvable_token() -> Result<()> {
    let hits = Hits::default();
    let (_, body) = call(app(default_config(), hits.clone()), get_req("/lcdp/open?token=tok-none")).await?;
    assert_eq!(body["code"], 0);

    let (status, body) = call(app(default_config(), hits.clone()), get_req("/lcdp/open?token=nope")).await?;
    assert_rejected(status, &body, 3, "Token Invalid Error");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn paths_without_a_rule_pass_once_the_token_resolves() -> Result<()> {
    let hits = Hits::default();
    let (_, body) = call(app(default_config(), hits.clone()), get_req("/public/ping?token=tok-none")).await?;
    assert_eq!(body["code"], 0);

    // unrouted paths fall through to the 404 fallback
    let (status, _) = call(app(default_config(), hits.clone()), get_req("/nowhere?token=tok-a")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn ignore_listed_paths_skip_every_check() -> Result<()> {
    let hits = Hits::default();
    let (_, body) = call(app(default_config(), hits.clone()), get_req("/lcdp/about")).await?;
    assert_eq!(body["code"], 0);

    // anchored: a longer path is not ignored
    let (status, body) = call(app(default_config(), hits.clone()), get_req("/lcdp/about/more")).await?;
    assert_rejected(status, &body, 2, "Token Not Exist Error");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn empty_rule_table_forwards_everything() -> Result<()> {
    let hits = Hits::default();
    let router = Router::new().route("/anything", get(open));
    let app = gated(router, PermissionConfig::default(), RuleTable::new(), hits.clone());

    let (_, body) = call(app, get_req("/anything")).await?;
    assert_eq!(body["code"], 0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn multipart_token_is_read_and_the_form_stays_readable() -> Result<()> {
    let hits = Hits::default();
    let form = multipart_body(&[("token", "tok-b"), ("title", "report")], Some(("attachment", "file-bytes")));
    let (status, body) = call(app(default_config(), hits.clone()), multipart_post("/lcdp/upload", form)).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(
        body["fields"],
        json!([["token", "tok-b"], ["title", "report"], ["attachment", "file-bytes"]])
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn multipart_permissions_are_enforced() -> Result<()> {
    let hits = Hits::default();
    let form = multipart_body(&[("token", "tok-a")], None);
    let (status, body) = call(app(default_config(), hits.clone()), multipart_post("/lcdp/upload", form)).await?;

    assert_rejected(status, &body, 4, "Permission Error");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn custom_token_key_is_honoured() -> Result<()> {
    let hits = Hits::default();
    let config = default_config().key("access_token");

    let (status, body) = call(
        app(config.clone(), hits.clone()),
        get_req("/lcdp/app/resources/1/a.png?token=tok-a"),
    )
    .await?;
    assert_rejected(status, &body, 2, "Token Not Exist Error");

    let (_, body) = call(app(config, hits.clone()), get_req("/lcdp/app/resources/1/a.png?access_token=tok-a")).await?;
    assert_eq!(body["code"], 0);
    Ok(())
}

#[tokio::test]
async fn custom_renderers_receive_the_request_language() -> Result<()> {
    let errors = ErrorRenderers::new().token_missing(|lang| {
        let msg = if lang == "zh-cn" { "令牌不存在" } else { "token required" };
        ErrorBody::new(2, msg)
    });
    let config = default_config().errors(errors);

    let req = Request::builder()
        .method("GET")
        .uri("/lcdp/app/resources/1/a.png")
        .header(header::ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8")
        .body(Body::empty())?;
    let (_, body) = call(app(config.clone(), Hits::default()), req).await?;
    assert_eq!(body, json!({ "code": 2, "msg": "令牌不存在" }));

    let (_, body) = call(app(config.clone(), Hits::default()), get_req("/lcdp/app/resources/1/a.png")).await?;
    assert_eq!(body, json!({ "code": 2, "msg": "token required" }));

    // kinds without a renderer keep the default body
    let (status, body) = call(app(config, Hits::default()), get_req("/lcdp/app/resources/1/a.png?token=nope")).await?;
    assert_rejected(status, &body, 3, "Token Invalid Error");
    Ok(())
}

#[tokio::test]
async fn oversized_bodies_fail_with_an_internal_error() -> Result<()> {
    let hits = Hits::default();
    let config = default_config().max_body_bytes(16);
    let (status, body) = call(
        app(config, hits.clone()),
        json_post("/lcdp/app", json!({ "token": "tok-a", "name": "far too long for the limit" })),
    )
    .await?;

    assert_rejected(status, &body, 1, "Server Internal Error");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn lookup_closures_can_back_the_gate() -> Result<()> {
    let lookup = |token: &str| match token {
        "svc" => Some(vec![APP_MANAGE.to_string()]),
        _ => None,
    };
    let config = PermissionConfig::with_lookup(lookup);

    let (_, body) = call(app(config.clone(), Hits::default()), get_req("/lcdp/app/resources/1/a.png?token=svc")).await?;
    assert_eq!(body["code"], 0);
    // no context builder configured
    assert_eq!(body["name"], Value::Null);

    let (status, body) = call(app(config, Hits::default()), get_req("/lcdp/app/resources/1/a.png?token=other")).await?;
    assert_rejected(status, &body, 3, "Token Invalid Error");
    Ok(())
}

#[tokio::test]
async fn handler_panics_become_internal_error_bodies() -> Result<()> {
    async fn explode() -> Json<Value> {
        panic!("handler blew up");
    }

    let router = Router::new().route("/boom", get(explode));
    let app = gated(router, PermissionConfig::default(), RuleTable::new(), Hits::default())
        .layer(tower_http::catch_panic::CatchPanicLayer::custom(permission_gate::record::panic_response))
        .layer(axum::middleware::from_fn(permission_gate::record::record_middleware));

    let (status, body) = call(app, get_req("/boom")).await?;
    assert_rejected(status, &body, 1, "Server Internal Error");
    Ok(())
}

#[tokio::test]
async fn large_multipart_uploads_are_gated_up_to_the_configured_limit() -> Result<()> {
    let (router, rules) = ProtectedRouter::<()>::new()
        .route(PermissionRule::post("/lcdp/upload").unwrap().with_permissions(["B"]), upload_sizes)
        .into_parts();
    let hits = Hits::default();
    let limit = 8 * 1024 * 1024;
    let app = gated(router, default_config().max_body_bytes(limit), rules, hits.clone())
        .layer(DefaultBodyLimit::max(limit));

    let file = "x".repeat(3 * 1024 * 1024);
    let form = multipart_body(&[("token", "tok-b")], Some(("attachment", file.as_str())));
    let (status, body) = call(app, multipart_post("/lcdp/upload", form)).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["name"], "carol");
    assert_eq!(body["sizes"], json!([["token", 5], ["attachment", 3 * 1024 * 1024]]));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn ignore_listed_paths_are_never_decoded() -> Result<()> {
    let hits = Hits::default();
    let req = Request::builder()
        .method("POST")
        .uri("/lcdp/about")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{definitely not json"))?;
    let (_, body) = call(app(default_config(), hits.clone()), req).await?;
    assert_eq!(body, json!({ "code": 0 }));

    // larger than the extraction limit, still untouched
    let config = default_config().max_body_bytes(8);
    let req = json_post("/lcdp/about", json!({ "padding": "x".repeat(64) }));
    let (_, body) = call(app(config, hits.clone()), req).await?;
    assert_eq!(body, json!({ "code": 0 }));

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    Ok(())
}
