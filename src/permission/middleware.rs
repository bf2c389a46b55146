use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::caller::{Caller, GrantedPermissions};
use super::config::PermissionConfig;
use super::evaluator::{evaluate, DefaultPolicyEvaluator, PolicyEvaluator};
use super::extractor::extract_token;
use super::rule::RuleTable;
use crate::errors::Rejection;
use crate::utils::{language_tag, token_fingerprint};

/// Everything the middleware consults per request. Built once at startup and
/// shared behind an `Arc`; nothing in here changes afterwards.
pub struct PermissionGate {
    config: PermissionConfig,
    rules: RuleTable,
    evaluator: Arc<dyn PolicyEvaluator>,
}

impl PermissionGate {
    pub fn new(config: PermissionConfig, rules: RuleTable) -> Self {
        Self {
            config,
            rules,
            evaluator: Arc::new(DefaultPolicyEvaluator::new()),
        }
    }

    pub fn with_evaluator<E>(mut self, evaluator: E) -> Self
    where
        E: PolicyEvaluator + 'static,
    {
        self.evaluator = Arc::new(evaluator);
        self
    }

    pub fn config(&self) -> &PermissionConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    fn reject(&self, rejection: Rejection, lang: &str) -> Response {
        self.config.errors.render(rejection, lang).into_response()
    }
}

impl std::fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionGate")
            .field("config", &self.config)
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

/// Authorization middleware.
///
/// ```rust,ignore
/// let gate = Arc::new(PermissionGate::new(config, rules));
/// let app = router.layer(axum::middleware::from_fn_with_state(gate, permission_middleware));
/// ```
pub async fn permission_middleware(
    State(gate): State<Arc<PermissionGate>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    if gate.config.ignore.matches(&path) {
        return next.run(req).await;
    }

    let lang = language_tag(req.headers());

    let (mut req, extracted) = extract_token(req, &gate.config.key, gate.config.max_body_bytes).await;
    let extraction = match extracted {
        Ok(extraction) => extraction,
        Err(err) => {
            tracing::error!(path = %path, method = %method, error = %err, "token extraction failed");
            return gate.reject(Rejection::Internal, &lang);
        }
    };

    tracing::info!(path = %path, method = %method, content = %extraction.payload, "inbound request");

    if gate.rules.is_empty() {
        return next.run(req).await;
    }

    if extraction.token.is_empty() {
        return gate.reject(Rejection::TokenMissing, &lang);
    }

    let token = extraction.token;
    let token_fp = token_fingerprint(&token);

    let Some(permissions) = gate.config.lookup.permissions(&token).await else {
        tracing::info!(path = %path, token_fp = %token_fp, "token not resolvable");
        return gate.reject(Rejection::TokenInvalid, &lang);
    };
    let granted = GrantedPermissions::new(&permissions);

    let rule = gate.rules.find(&path);
    if !evaluate(gate.evaluator.as_ref(), rule, &granted).is_pass() {
        tracing::info!(
            path = %path,
            token_fp = %token_fp,
            rule = rule.map(|r| r.url()).unwrap_or_default(),
            "permission denied"
        );
        return gate.reject(Rejection::PermissionDenied, &lang);
    }

    let mut caller = Caller::new(token, granted);
    if let Some(builder) = &gate.config.context {
        let ctx = builder.context(&caller.token).await;
        caller = caller.with_context(ctx);
    }

    if let Some(decoded) = extraction.decoded {
        req.extensions_mut().insert(decoded);
    }
    req.extensions_mut().insert(caller);

    next.run(req).await
}
