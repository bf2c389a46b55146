use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{ContextBuilder, PermissionLookup};
use crate::models::session::SessionRecord;
use crate::utils::{token_fingerprint, utc_now};

/// Process-local session store.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: SessionRecord) {
        self.write().insert(session.token.clone(), session);
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.write().remove(token).is_some()
    }

    pub fn get(&self, token: &str) -> Option<SessionRecord> {
        let sessions = self.read();
        let session = sessions.get(token)?;
        if session.is_expired(utc_now()) {
            tracing::debug!(token_fp = %token_fingerprint(token), "session expired");
            return None;
        }
        Some(session.clone())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A writer that panicked leaves the map itself intact; keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions.read().unwrap_or_else(|poisoned| {
            tracing::warn!("session store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions.write().unwrap_or_else(|poisoned| {
            tracing::warn!("session store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[async_trait]
impl PermissionLookup for MemorySessionStore {
    async fn permissions(&self, token: &str) -> Option<Vec<String>> {
        self.get(token).map(|session| session.permissions)
    }
}

#[async_trait]
impl ContextBuilder for MemorySessionStore {
    async fn context(&self, token: &str) -> HashMap<String, Value> {
        self.get(token).map(|s| s.context()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn unknown_and_expired_tokens_are_absent() {
        let store = MemorySessionStore::new();
        store.insert(SessionRecord::new("live", Uuid::new_v4(), "ada").with_permissions(["A"]));
        store.insert(
            SessionRecord::new("old", Uuid::new_v4(), "bob")
                .with_permissions(["A"])
                .with_expiry(utc_now() - Duration::minutes(1)),
        );

        assert_eq!(store.permissions("live").await, Some(vec!["A".to_string()]));
        assert_eq!(store.permissions("old").await, None);
        assert_eq!(store.permissions("missing").await, None);
    }

    #[tokio::test]
    async fn empty_permission_set_is_still_valid() {
        let store = MemorySessionStore::new();
        store.insert(SessionRecord::new("t", Uuid::new_v4(), "ada"));
        assert_eq!(store.permissions("t").await, Some(vec![]));
    }

    #[tokio::test]
    async fn revoke_removes_session() {
        let store = MemorySessionStore::new();
        store.insert(SessionRecord::new("t", Uuid::new_v4(), "ada"));
        assert!(store.revoke("t"));
        assert!(!store.revoke("t"));
        assert!(store.is_empty());
        assert!(store.context("t").await.is_empty());
    }

    #[tokio::test]
    async fn poisoned_lock_still_reads_and_writes() {
        let store = MemorySessionStore::new();
        store.insert(SessionRecord::new("before", Uuid::new_v4(), "ada").with_permissions(["A"]));

        let sessions = Arc::clone(&store.sessions);
        let _ = std::thread::spawn(move || {
            let _guard = sessions.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(store.sessions.is_poisoned());

        store.insert(SessionRecord::new("after", Uuid::new_v4(), "bob"));
        assert_eq!(store.len(), 2);
        assert_eq!(store.permissions("before").await, Some(vec!["A".to_string()]));
        assert!(store.revoke("after"));
        assert_eq!(store.len(), 1);
    }
}
