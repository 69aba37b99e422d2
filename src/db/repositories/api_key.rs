//! API key repository
//!
//! Keys are stored as hashes only. The unscoped [`ApiKeyRepository::list_active`]
//! exists for authentication, which has to find the owner of a presented key
//! before any tenant is known; everything else is scoped.

use crate::db::{parse_id, DynDatabasePool};
use crate::models::ApiKey;
use crate::services::tenant::TenantScope;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;


#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn create(&self, key: &ApiKey) -> Result<ApiKey>;

    /// Every active key of every user
    async fn list_active(&self) -> Result<Vec<ApiKey>>;

    /// All keys of one user, newest first
    async fn list(&self, scope: TenantScope) -> Result<Vec<ApiKey>>;

    async fn has_active(&self, scope: TenantScope) -> Result<bool>;

    /// Returns `false` when the key does not exist or belongs to someone else
    async fn deactivate(&self, scope: TenantScope, id: Uuid) -> Result<bool>;

    async fn deactivate_all(&self, scope: TenantScope) -> Result<u64>;

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

pub struct SqlxApiKeyRepository {
    pool: DynDatabasePool,
}

impl SqlxApiKeyRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ApiKeyRepository> {
        Arc::new(Self::new(pool))
    }
}

const SELECT_KEY: &str = r#"
    SELECT id, user_id, key_hash, name, created_at, last_used_at, is_active
    FROM api_keys
"#;

#[derive(sqlx::FromRow)]
struct ApiKeyRecord {
    id: String,
    user_id: String,
    key_hash: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
    is_active: bool,
}

impl TryFrom<ApiKeyRecord> for ApiKey {
    type Error = anyhow::Error;

    fn try_from(row: ApiKeyRecord) -> Result<Self> {
        Ok(ApiKey {
            id: parse_id(&row.id)?,
            user_id: parse_id(&row.user_id)?,
            key_hash: row.key_hash,
            name: row.name,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
            is_active: row.is_active,
        })
    }
}

fn into_keys(rows: Vec<ApiKeyRecord>) -> Result<Vec<ApiKey>> {
    rows.into_iter().map(ApiKey::try_from).collect()
}

#[async_trait]
impl ApiKeyRepository for SqlxApiKeyRepository {
    async fn create(&self, key: &ApiKey) -> Result<ApiKey> {
        let sql = r#"
            INSERT INTO api_keys (id, user_id, key_hash, name, created_at, last_used_at, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#;
        on_backend!(self.pool, |pool| {
            sqlx::query(sql)
                .bind(key.id.to_string())
                .bind(key.user_id.to_string())
                .bind(&key.key_hash)
                .bind(&key.name)
                .bind(key.created_at)
                .bind(key.last_used_at)
                .bind(key.is_active)
                .execute(pool)
                .await
                .context("Failed to create API key")?;
        });
        Ok(key.clone())
    }

    async fn list_active(&self) -> Result<Vec<ApiKey>> {
        let sql = format!("{} WHERE is_active = ?", SELECT_KEY);
        let rows = on_backend!(self.pool, |pool| {
            sqlx::query_as::<_, ApiKeyRecord>(&sql)
                .bind(true)
                .fetch_all(pool)
                .await
                .context("Failed to list active API keys")?
        });
        into_keys(rows)
    }

    async fn list(&self, scope: TenantScope) -> Result<Vec<ApiKey>> {
        let sql = format!("{} WHERE user_id = ? ORDER BY created_at DESC", SELECT_KEY);
        let rows = on_backend!(self.pool, |pool| {
            sqlx::query_as::<_, ApiKeyRecord>(&sql)
                .bind(scope.user_id().to_string())
                .fetch_all(pool)
                .await
                .context("Failed to list API keys")?
        });
        into_keys(rows)
    }

    async fn has_active(&self, scope: TenantScope) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM api_keys WHERE user_id = ? AND is_active = ?";
        let count: i64 = on_backend!(self.pool, |pool| {
            sqlx::query_scalar(sql)
                .bind(scope.user_id().to_string())
                .bind(true)
                .fetch_one(pool)
                .await
                .context("Failed to count API keys")?
        });
        Ok(count > 0)
    }

    async fn deactivate(&self, scope: TenantScope, id: Uuid) -> Result<bool> {
        let sql = "UPDATE api_keys SET is_active = ? WHERE id = ? AND user_id = ?";
        let affected = on_backend!(self.pool, |pool| {
            sqlx::query(sql)
                .bind(false)
                .bind(id.to_string())
                .bind(scope.user_id().to_string())
                .execute(pool)
                .await
                .context("Failed to revoke API key")?
                .rows_affected()
        });
        Ok(affected > 0)
    }

    async fn deactivate_all(&self, scope: TenantScope) -> Result<u64> {
        let sql = "UPDATE api_keys SET is_active = ? WHERE user_id = ? AND is_active = ?";
        let affected = on_backend!(self.pool, |pool| {
            sqlx::query(sql)
                .bind(false)
                .bind(scope.user_id().to_string())
                .bind(true)
                .execute(pool)
                .await
                .context("Failed to revoke API keys")?
                .rows_affected()
        });
        Ok(affected)
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let sql = "UPDATE api_keys SET last_used_at = ? WHERE id = ?";
        on_backend!(self.pool, |pool| {
            sqlx::query(sql)
                .bind(at)
                .bind(id.to_string())
                .execute(pool)
                .await
                .context("Failed to record API key use")?;
        });
        Ok(())
    }
}
