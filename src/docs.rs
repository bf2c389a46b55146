use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::errors::ErrorBody;
use crate::permission::DEFAULT_TOKEN_KEY;
use crate::routes::{apps, health};

#[derive(OpenApi)]
#[openapi(
	paths(health::health, apps::about, apps::create_app_entry, apps::get_resource),
	components(
		schemas(
			ErrorBody,
			health::HealthResponse,
			apps::AboutInfo,
			apps::CreateAppRequest,
			apps::AppEntry,
			apps::ResourceInfo
		)
	),
	tags(
		(name = "Health", description = "Liveness and database reachability"),
		(name = "Apps", description = "Permission-guarded application endpoints")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(&ApiDoc::openapi())?;

	normalize_path_operations(&mut doc);
	ensure_security_components(&mut doc);
	add_rejection_examples(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = {
		let doc_json = Arc::clone(&doc_json);
		get(move || {
			let doc_json = Arc::clone(&doc_json);
			async move { Json((*doc_json).clone()) }
		})
	};

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn normalize_path_operations(doc: &mut Value) {
	if let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) {
		let snapshot = paths.clone();
		for (path, item) in snapshot {
			if let Some(ops) = item.as_object() {
				let mut normalized = Map::new();
				for (method, val) in ops {
					let key = method.to_lowercase();
					if let Some(existing) = normalized.get_mut(&key) {
						merge_values(existing, val);
					} else {
						normalized.insert(key, val.clone());
					}
				}
				paths.insert(path, Value::Object(normalized));
			}
		}
	}
}

/// Token travels in the query string for reads; Swagger UI can fill it in
/// from the Authorize dialog.
fn ensure_security_components(doc: &mut Value) {
	let Some(root) = doc.as_object_mut() else {
		return;
	};

	let components = root
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()));
	let Some(components) = components.as_object_mut() else {
		return;
	};

	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()));
	if let Some(schemes) = schemes.as_object_mut() {
		schemes.insert(
			"sessionToken".to_string(),
			json!({
				"type": "apiKey",
				"in": "query",
				"name": DEFAULT_TOKEN_KEY
			}),
		);
	}
}

fn add_rejection_examples(doc: &mut Value) {
	let Some(paths) = doc.get_mut("paths").and_then(Value::as_object_mut) else {
		return;
	};

	for (path, item) in paths.iter_mut() {
		if !path.starts_with("/lcdp/app") {
			continue;
		}
		let Some(ops) = item.as_object_mut() else {
			continue;
		};
		for op in ops.values_mut().filter(|op| op.is_object()) {
			op["security"] = json!([{ "sessionToken": [] }]);
			if let Some(ok) = op.pointer_mut("/responses/200") {
				merge_values(
					ok,
					&json!({
						"content": {
							"application/json": {
								"examples": {
									"tokenMissing": { "value": { "code": 2, "msg": "Token Not Exist Error" } },
									"tokenInvalid": { "value": { "code": 3, "msg": "Token Invalid Error" } },
									"permissionDenied": { "value": { "code": 4, "msg": "Permission Error" } }
								}
							}
						}
					}),
				);
			}
		}
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let server_url = format!("http://localhost:{}", port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}

fn merge_values(target: &mut Value, addition: &Value) {
	match (target, addition) {
		(Value::Object(a), Value::Object(b)) => {
			for (key, value) in b {
				match a.get_mut(key) {
					Some(existing) => merge_values(existing, value),
					None => {
						a.insert(key.clone(), value.clone());
					}
				}
			}
		}
		(Value::Array(a), Value::Array(b)) => {
			for item in b {
				if !a.contains(item) {
					a.push(item.clone());
				}
			}
		}
		_ => {}
	}
}
