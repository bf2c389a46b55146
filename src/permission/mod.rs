//! Request authorization gate.
//!
//! The gate sits in front of the handler chain and, for every request:
//! - bypasses paths on the ignore list
//! - extracts the token from the query string, a multipart field or a JSON body
//! - resolves the token's permissions through a [`PermissionLookup`](crate::session::PermissionLookup)
//! - evaluates the first rule whose route template matches the path
//! - injects the caller's context and forwards the (still unread) request
//!
//! Rejections are `{"code", "msg"}` bodies served with HTTP 200.

mod caller;
mod config;
mod evaluator;
mod extractor;
mod matcher;
mod middleware;
mod registry;
mod rule;

pub use caller::{Caller, DecodedFields, GrantedPermissions};
pub use config::{
    ErrorRenderers, IgnoreList, PermissionConfig, RenderFn, DEFAULT_MAX_BODY_BYTES, DEFAULT_TOKEN_KEY,
};
pub use evaluator::{evaluate, Decision, DefaultPolicyEvaluator, PolicyEvaluator};
pub use extractor::{extract_token, shape_of, ExtractError, Extraction, Shape};
pub use matcher::{PathMatcher, PARAM_SEGMENT};
pub use middleware::{permission_middleware, PermissionGate};
pub use registry::ProtectedRouter;
pub use rule::{HttpMethod, Operation, PermissionRule, RuleTable};

/// Permission identifiers used by the bundled routes.
pub mod permissions {
    pub const APP_MANAGE: &str = "A";
    pub const ADMIN: &str = "admin";
}
