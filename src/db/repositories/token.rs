//! Password reset and e-mail verification tokens

use crate::db::{parse_id, DynDatabasePool};
use crate::models::{AccountToken, AccountTokenKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;


#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn create(&self, token: &AccountToken) -> Result<()>;

    /// Look a token up by its value, used or not
    async fn find(&self, kind: AccountTokenKind, token: &str) -> Result<Option<AccountToken>>;

    /// Mark a token used. Returns `false` if it had already been used, so
    /// two concurrent redemptions cannot both succeed.
    async fn mark_used(&self, kind: AccountTokenKind, id: Uuid, at: DateTime<Utc>) -> Result<bool>;
}

pub struct SqlxTokenRepository {
    pool: DynDatabasePool,
}

impl SqlxTokenRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TokenRepository> {
        Arc::new(Self::new(pool))
    }
}

#[derive(sqlx::FromRow)]
struct TokenRecord {
    id: String,
    user_id: String,
    token: String,
    new_email: Option<String>,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TokenRecord {
    fn into_token(self, kind: AccountTokenKind) -> Result<AccountToken> {
        Ok(AccountToken {
            id: parse_id(&self.id)?,
            kind,
            user_id: parse_id(&self.user_id)?,
            token: self.token,
            new_email: self.new_email,
            expires_at: self.expires_at,
            used_at: self.used_at,
            created_at: self.created_at,
        })
    }
}

/// Column list for `kind`; reset tokens have no `new_email` column.
fn select_columns(kind: AccountTokenKind) -> &'static str {
    match kind {
        AccountTokenKind::PasswordReset => {
            "id, user_id, token, NULL AS new_email, expires_at, used_at, created_at"
        }
        AccountTokenKind::EmailVerification => {
            "id, user_id, token, new_email, expires_at, used_at, created_at"
        }
    }
}

#[async_trait]
impl TokenRepository for SqlxTokenRepository {
    async fn create(&self, token: &AccountToken) -> Result<()> {
        let sql = match token.kind {
            AccountTokenKind::PasswordReset => format!(
                "INSERT INTO {} (id, user_id, token, expires_at, used_at, created_at) VALUES (?, ?, ?, ?, ?, ?)",
                token.kind.table()
            ),
            AccountTokenKind::EmailVerification => format!(
                "INSERT INTO {} (id, user_id, token, expires_at, used_at, created_at, new_email) VALUES (?, ?, ?, ?, ?, ?, ?)",
                token.kind.table()
            ),
        };
        on_backend!(self.pool, |pool| {
            let mut query = sqlx::query(&sql)
                .bind(token.id.to_string())
                .bind(token.user_id.to_string())
                .bind(&token.token)
                .bind(token.expires_at)
                .bind(token.used_at)
                .bind(token.created_at);
            if token.kind == AccountTokenKind::EmailVerification {
                query = query.bind(token.new_email.clone().unwrap_or_default());
            }
            query
                .execute(pool)
                .await
                .context("Failed to store account token")?;
        });
        Ok(())
    }

    async fn find(&self, kind: AccountTokenKind, token: &str) -> Result<Option<AccountToken>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE token = ?",
            select_columns(kind),
            kind.table()
        );
        let row = on_backend!(self.pool, |pool| {
            sqlx::query_as::<_, TokenRecord>(&sql)
                .bind(token)
                .fetch_optional(pool)
                .await
                .context("Failed to look up account token")?
        });
        row.map(|r| r.into_token(kind)).transpose()
    }

    async fn mark_used(&self, kind: AccountTokenKind, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET used_at = ? WHERE id = ? AND used_at IS NULL",
            kind.table()
        );
        let affected = on_backend!(self.pool, |pool| {
            sqlx::query(&sql)
                .bind(at)
                .bind(id.to_string())
                .execute(pool)
                .await
                .context("Failed to mark account token used")?
                .rows_affected()
        });
        Ok(affected > 0)
    }
}
