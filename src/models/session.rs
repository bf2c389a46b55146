use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What the session store keeps per token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token: String,
    pub user_id: Uuid,
    pub name: String,
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn new(token: impl Into<String>, user_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id,
            name: name.into(),
            permissions: Vec::new(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }

    /// Values handed to downstream handlers for this session.
    pub fn context(&self) -> HashMap<String, Value> {
        let mut ctx = HashMap::new();
        ctx.insert("user_id".to_string(), Value::String(self.user_id.to_string()));
        ctx.insert("name".to_string(), Value::String(self.name.clone()));
        ctx
    }
}

/// Raw `sessions` row; timestamps and ids are stored as text.
#[derive(Debug, Clone)]
pub struct DbSession {
    pub token: String,
    pub user_id: String,
    pub name: String,
    pub permissions: String,
    pub created_at: String,
    pub expires_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let session = SessionRecord::new("t", Uuid::new_v4(), "ada").with_expiry(now);
        assert!(session.is_expired(now));
        assert!(!session.is_expired(now - Duration::seconds(1)));
        assert!(!SessionRecord::new("t", Uuid::new_v4(), "ada").is_expired(now));
    }

    #[test]
    fn context_exposes_user_identity() {
        let user_id = Uuid::new_v4();
        let ctx = SessionRecord::new("t", user_id, "ada").context();
        assert_eq!(ctx["user_id"], Value::String(user_id.to_string()));
        assert_eq!(ctx["name"], Value::String("ada".into()));
    }
}
