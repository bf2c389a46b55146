use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::errors::{AppError, ErrorBody, Rejection};
use crate::session::{AnyTokenLookup, ContextBuilder, PermissionLookup};

pub const DEFAULT_TOKEN_KEY: &str = "token";
pub const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Builds the rejection payload for a language tag.
pub type RenderFn = Arc<dyn Fn(&str) -> ErrorBody + Send + Sync>;

/// One renderer per rejection kind. Unset renderers fall back to the fixed
/// `{"code", "msg"}` bodies.
#[derive(Clone, Default)]
pub struct ErrorRenderers {
    internal: Option<RenderFn>,
    token_missing: Option<RenderFn>,
    token_invalid: Option<RenderFn>,
    permission_denied: Option<RenderFn>,
}

impl ErrorRenderers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn internal<F>(mut self, render: F) -> Self
    where
        F: Fn(&str) -> ErrorBody + Send + Sync + 'static,
    {
        self.internal = Some(Arc::new(render));
        self
    }

    pub fn token_missing<F>(mut self, render: F) -> Self
    where
        F: Fn(&str) -> ErrorBody + Send + Sync + 'static,
    {
        self.token_missing = Some(Arc::new(render));
        self
    }

    pub fn token_invalid<F>(mut self, render: F) -> Self
    where
        F: Fn(&str) -> ErrorBody + Send + Sync + 'static,
    {
        self.token_invalid = Some(Arc::new(render));
        self
    }

    pub fn permission_denied<F>(mut self, render: F) -> Self
    where
        F: Fn(&str) -> ErrorBody + Send + Sync + 'static,
    {
        self.permission_denied = Some(Arc::new(render));
        self
    }

    pub fn render(&self, rejection: Rejection, lang: &str) -> ErrorBody {
        let render = match rejection {
            Rejection::Internal => &self.internal,
            Rejection::TokenMissing => &self.token_missing,
            Rejection::TokenInvalid => &self.token_invalid,
            Rejection::PermissionDenied => &self.permission_denied,
        };

        match render {
            Some(render) => render(lang),
            None => ErrorBody::from(rejection),
        }
    }
}

impl fmt::Debug for ErrorRenderers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorRenderers")
            .field("internal", &self.internal.is_some())
            .field("token_missing", &self.token_missing.is_some())
            .field("token_invalid", &self.token_invalid.is_some())
            .field("permission_denied", &self.permission_denied.is_some())
            .finish()
    }
}

/// Paths that bypass the gate entirely. Entries are regexes anchored at both
/// ends and tested against the request path.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    patterns: Vec<Regex>,
}

impl IgnoreList {
    pub fn new<I, S>(entries: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = entries
            .into_iter()
            .map(|entry| Regex::new(&format!("^(?:{})$", entry.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }
}

/// Collaborators and knobs of the permission gate.
#[derive(Clone)]
pub struct PermissionConfig {
    pub(crate) key: String,
    pub(crate) ignore: IgnoreList,
    pub(crate) lookup: Arc<dyn PermissionLookup>,
    pub(crate) context: Option<Arc<dyn ContextBuilder>>,
    pub(crate) errors: ErrorRenderers,
    pub(crate) max_body_bytes: usize,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_TOKEN_KEY.to_string(),
            ignore: IgnoreList::default(),
            lookup: Arc::new(AnyTokenLookup),
            context: None,
            errors: ErrorRenderers::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl PermissionConfig {
    pub fn with_lookup<L>(lookup: L) -> Self
    where
        L: PermissionLookup + 'static,
    {
        Self::default().lookup(lookup)
    }

    pub fn lookup<L>(mut self, lookup: L) -> Self
    where
        L: PermissionLookup + 'static,
    {
        self.lookup = Arc::new(lookup);
        self
    }

    pub fn shared_lookup(mut self, lookup: Arc<dyn PermissionLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn context_builder<C>(mut self, builder: C) -> Self
    where
        C: ContextBuilder + 'static,
    {
        self.context = Some(Arc::new(builder));
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn ignore_urls<I, S>(mut self, urls: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ignore = IgnoreList::new(urls)?;
        Ok(self)
    }

    pub fn errors(mut self, errors: ErrorRenderers) -> Self {
        self.errors = errors;
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn token_key(&self) -> &str {
        &self.key
    }

    pub fn ignore_list(&self) -> &IgnoreList {
        &self.ignore
    }

    pub fn renderers(&self) -> &ErrorRenderers {
        &self.errors
    }
}

impl fmt::Debug for PermissionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionConfig")
            .field("key", &self.key)
            .field("ignore", &self.ignore)
            .field("context", &self.context.is_some())
            .field("errors", &self.errors)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_entries_are_anchored() {
        let ignore = IgnoreList::new(["/lcdp/about", "/docs.*"]).unwrap();
        assert!(ignore.matches("/lcdp/about"));
        assert!(!ignore.matches("/lcdp/about/more"));
        assert!(!ignore.matches("/x/lcdp/about"));
        assert!(ignore.matches("/docs/index.html"));
    }

    #[test]
    fn alternation_stays_anchored() {
        let ignore = IgnoreList::new(["/a|/b"]).unwrap();
        assert!(ignore.matches("/a"));
        assert!(ignore.matches("/b"));
        assert!(!ignore.matches("/ab/c"));
    }

    #[test]
    fn invalid_ignore_entry_is_a_configuration_error() {
        let err = IgnoreList::new(["/broken("]).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn renderers_fall_back_to_fixed_bodies() {
        let renderers = ErrorRenderers::new().permission_denied(|lang| {
            ErrorBody::new(4, if lang == "zh" { "权限不足" } else { "Forbidden" })
        });

        assert_eq!(renderers.render(Rejection::PermissionDenied, "zh").msg, "权限不足");
        assert_eq!(renderers.render(Rejection::PermissionDenied, "en").msg, "Forbidden");
        assert_eq!(
            renderers.render(Rejection::TokenMissing, "zh"),
            ErrorBody::new(2, "Token Not Exist Error")
        );
    }

    #[test]
    fn defaults_use_token_key() {
        let config = PermissionConfig::default();
        assert_eq!(config.token_key(), "token");
        assert!(config.ignore_list().is_empty());
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }
}
