use std::fmt;

use axum::http::Method;
use serde::{Deserialize, Serialize};

use super::matcher::PathMatcher;
use crate::errors::AppError;

/// Verbs a protected route can be registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
}

impl HttpMethod {
    pub fn as_method(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
            HttpMethod::Options => Method::OPTIONS,
            HttpMethod::Trace => Method::TRACE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_method().as_str())
    }
}

/// How a rule's required permissions combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    And,
    #[default]
    Or,
}

/// One row of the rule table.
///
/// The path matcher is compiled in [`PermissionRule::new`] and never
/// rebuilt afterwards.
#[derive(Debug, Clone)]
pub struct PermissionRule {
    method: HttpMethod,
    matcher: PathMatcher,
    master_key: Option<String>,
    permissions: Vec<String>,
    operation: Operation,
}

impl PermissionRule {
    pub fn new(method: HttpMethod, url: &str) -> Result<Self, AppError> {
        let matcher = PathMatcher::compile(url)
            .map_err(|err| AppError::configuration(format!("invalid route template {url}: {err}")))?;

        Ok(Self {
            method,
            matcher,
            master_key: None,
            permissions: Vec::new(),
            operation: Operation::default(),
        })
    }

    pub fn get(url: &str) -> Result<Self, AppError> {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: &str) -> Result<Self, AppError> {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: &str) -> Result<Self, AppError> {
        Self::new(HttpMethod::Put, url)
    }

    pub fn delete(url: &str) -> Result<Self, AppError> {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_master_key(mut self, master_key: impl Into<String>) -> Self {
        let master_key = master_key.into();
        // an empty master key would be contained in every permission string
        self.master_key = (!master_key.is_empty()).then_some(master_key);
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        self.matcher.template()
    }

    pub fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    pub fn master_key(&self) -> Option<&str> {
        self.master_key.as_deref()
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

/// Ordered, append-only collection of rules.
///
/// Filled during startup, then frozen inside the gate and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<PermissionRule>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, rule: PermissionRule) {
        tracing::debug!(
            method = %rule.method(),
            url = %rule.url(),
            pattern = %rule.matcher().as_str(),
            "permission rule registered"
        );
        self.rules.push(rule);
    }

    pub fn with_rule(mut self, rule: PermissionRule) -> Self {
        self.register(rule);
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PermissionRule> {
        self.rules.iter()
    }

    /// First rule, in registration order, whose template matches `path`.
    pub fn find(&self, path: &str) -> Option<&PermissionRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }
}

impl FromIterator<PermissionRule> for RuleTable {
    fn from_iter<T: IntoIterator<Item = PermissionRule>>(iter: T) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}
