use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{ContextBuilder, PermissionLookup};
use crate::errors::{AppError, AppResult};
use crate::models::session::{DbSession, SessionRecord};
use crate::utils::{token_fingerprint, utc_now};

const SESSION_COLUMNS: &str = "token, user_id, name, permissions, created_at, expires_at";

/// Session store backed by the `sessions` table.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert(&self, session: &SessionRecord) -> AppResult<()> {
        let permissions = serde_json::to_string(&session.permissions)
            .map_err(|err| AppError::internal(format!("failed to encode permissions: {err}")))?;

        sqlx::query(
            "INSERT INTO sessions (token, user_id, name, permissions, created_at, expires_at) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(token) DO UPDATE SET user_id = excluded.user_id, name = excluded.name, \
             permissions = excluded.permissions, created_at = excluded.created_at, expires_at = excluded.expires_at",
        )
        .bind(&session.token)
        .bind(session.user_id.to_string())
        .bind(&session.name)
        .bind(permissions)
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.map(|exp| exp.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn revoke(&self, token: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found("session not found"));
        }

        Ok(())
    }

    pub async fn find(&self, token: &str) -> AppResult<Option<SessionRecord>> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token = ?"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| db_session_from_row(&row).and_then(SessionRecord::try_from))
            .transpose()
    }

    pub async fn list(&self) -> AppResult<Vec<SessionRecord>> {
        let rows = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| db_session_from_row(row).and_then(SessionRecord::try_from))
            .collect()
    }

    /// Deletes every session whose expiry has passed; returns how many went.
    ///
    /// Rows whose expiry cannot be parsed are logged and left in place.
    pub async fn purge_expired(&self) -> AppResult<u64> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query("SELECT token, expires_at FROM sessions WHERE expires_at IS NOT NULL")
            .fetch_all(&mut *tx)
            .await?;

        let now = utc_now();
        let mut purged = 0;

        for row in &rows {
            let token: String = row.try_get("token")?;
            let raw: String = row.try_get("expires_at")?;

            let expires_at = match parse_datetime(&raw) {
                Ok(expires_at) => expires_at,
                Err(err) => {
                    tracing::warn!(token_fp = %token_fingerprint(&token), error = %err, "skipping session with unreadable expiry");
                    continue;
                }
            };
            if expires_at > now {
                continue;
            }

            purged += sqlx::query("DELETE FROM sessions WHERE token = ?")
                .bind(&token)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(purged)
    }

    /// Live session for `token`; store failures are logged and read as absent.
    async fn live_session(&self, token: &str) -> Option<SessionRecord> {
        match self.find(token).await {
            Ok(Some(session)) if session.is_expired(utc_now()) => {
                tracing::debug!(token_fp = %token_fingerprint(token), "session expired");
                None
            }
            Ok(session) => session,
            Err(err) => {
                tracing::error!(token_fp = %token_fingerprint(token), error = %err, "session lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl PermissionLookup for SqliteSessionStore {
    async fn permissions(&self, token: &str) -> Option<Vec<String>> {
        self.live_session(token).await.map(|s| s.permissions)
    }
}

#[async_trait]
impl ContextBuilder for SqliteSessionStore {
    async fn context(&self, token: &str) -> HashMap<String, Value> {
        self.live_session(token)
            .await
            .map(|s| s.context())
            .unwrap_or_default()
    }
}

impl TryFrom<DbSession> for SessionRecord {
    type Error = AppError;

    fn try_from(value: DbSession) -> Result<Self, Self::Error> {
        let user_id = Uuid::parse_str(&value.user_id)
            .map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))?;
        let permissions: Vec<String> = serde_json::from_str(&value.permissions)
            .map_err(|e| AppError::internal(format!("invalid permissions: {}", e)))?;
        let created_at = parse_datetime(&value.created_at)?;
        let expires_at = match value.expires_at {
            Some(s) if !s.trim().is_empty() => Some(parse_datetime(&s)?),
            _ => None,
        };

        Ok(SessionRecord {
            token: value.token,
            user_id,
            name: value.name,
            permissions,
            created_at,
            expires_at,
        })
    }
}

fn db_session_from_row(row: &SqliteRow) -> Result<DbSession, AppError> {
    let column = |name: &str| AppError::internal(format!("missing {}", name));

    Ok(DbSession {
        token: row.try_get("token").map_err(|_| column("token"))?,
        user_id: row.try_get("user_id").map_err(|_| column("user_id"))?,
        name: row.try_get("name").map_err(|_| column("name"))?,
        permissions: row.try_get("permissions").map_err(|_| column("permissions"))?,
        created_at: row.try_get("created_at").map_err(|_| column("created_at"))?,
        expires_at: row.try_get("expires_at").map_err(|_| column("expires_at"))?,
    })
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite CURRENT_TIMESTAMP format
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}
