//! Session store seam.
//!
//! The gate only ever asks two questions of a session store: which
//! permissions does this token carry, and which context values should the
//! downstream handlers see. Both are answered through the traits below so any
//! backend (or a plain closure) can be plugged in.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

mod memory;
mod sqlite;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

/// Resolves a token to the caller's permissions.
///
/// `None` means the token is unknown or the store failed; `Some(vec![])` is a
/// valid token that carries no permissions.
#[async_trait]
pub trait PermissionLookup: Send + Sync {
    async fn permissions(&self, token: &str) -> Option<Vec<String>>;
}

/// Supplies the key/value pairs injected into the request for a token.
#[async_trait]
pub trait ContextBuilder: Send + Sync {
    async fn context(&self, token: &str) -> HashMap<String, Value>;
}

#[async_trait]
impl<F> PermissionLookup for F
where
    F: Fn(&str) -> Option<Vec<String>> + Send + Sync,
{
    async fn permissions(&self, token: &str) -> Option<Vec<String>> {
        self(token)
    }
}

#[async_trait]
impl<F> ContextBuilder for F
where
    F: Fn(&str) -> HashMap<String, Value> + Send + Sync,
{
    async fn context(&self, token: &str) -> HashMap<String, Value> {
        self(token)
    }
}

/// Lookup used when none is configured: every token is valid and carries no
/// permissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyTokenLookup;

#[async_trait]
impl PermissionLookup for AnyTokenLookup {
    async fn permissions(&self, _token: &str) -> Option<Vec<String>> {
        Some(Vec::new())
    }
}
