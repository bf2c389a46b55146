use std::collections::HashMap;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde_json::{Map, Value};

use crate::errors::Rejection;

/// Caller's permissions in the comma-joined form the evaluator tests against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantedPermissions {
    joined: String,
}

impl GrantedPermissions {
    pub fn new<I, P>(permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let joined = permissions
            .into_iter()
            .map(|p| p.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self { joined }
    }

    pub fn as_str(&self) -> &str {
        &self.joined
    }

    pub fn is_empty(&self) -> bool {
        self.joined.is_empty()
    }

    /// Substring containment, not set membership: `"A"` is held by `"BA12"`.
    pub fn contains(&self, permission: &str) -> bool {
        self.joined.contains(permission)
    }
}

/// Request-scoped identity placed in the request extensions once the gate
/// accepts a token.
#[derive(Debug, Clone)]
pub struct Caller {
    pub token: String,
    pub permissions: GrantedPermissions,
    pub context: HashMap<String, Value>,
}

impl Caller {
    pub fn new(token: impl Into<String>, permissions: GrantedPermissions) -> Self {
        Self {
            token: token.into(),
            permissions,
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, context: HashMap<String, Value>) -> Self {
        self.context.extend(context);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Caller>().cloned().ok_or_else(|| {
            tracing::error!(path = %parts.uri.path(), "caller requested on a route the permission gate did not resolve");
            Rejection::Internal
        })
    }
}

/// JSON object the gate decoded while looking for the token.
///
/// Only present when the body went through the JSON branch of extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFields(pub Map<String, Value>);

impl DecodedFields {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for DecodedFields
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<DecodedFields>()
            .cloned()
            .ok_or(Rejection::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_join_with_commas() {
        let granted = GrantedPermissions::new(["A", "B"]);
        assert_eq!(granted.as_str(), "A,B");
        assert!(GrantedPermissions::new(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn containment_is_substring_based() {
        let granted = GrantedPermissions::new(["BA12"]);
        assert!(granted.contains("A"));
        assert!(granted.contains("BA"));
        assert!(!granted.contains("C"));
    }

    #[test]
    fn caller_context_lookup() {
        let mut ctx = HashMap::new();
        ctx.insert("name".to_string(), Value::String("ada".into()));
        let caller = Caller::new("t1", GrantedPermissions::default()).with_context(ctx);
        assert_eq!(caller.get_str("name"), Some("ada"));
        assert!(caller.get("missing").is_none());
    }
}
