//! User repository
//!
//! Database operations for users.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite and MySQL

use crate::db::{parse_id, DynDatabasePool};
use crate::models::{User, UserRole};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;


/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, user: &User) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Get user by username (case-sensitive)
    async fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Get user by email (case-insensitive)
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Whether any user already has this username or this email
    async fn exists(&self, username: &str, email: &str) -> Result<bool>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()>;

    async fn update_email(&self, id: Uuid, email: &str) -> Result<()>;

    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<()>;

    /// Count total users
    async fn count(&self) -> Result<i64>;

    /// List users with pagination, newest first. `page` is 1-based.
    async fn list(&self, page: i64, per_page: i64) -> Result<(Vec<User>, i64)>;
}

/// SQLx-based user repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

const SELECT_USER: &str = r#"
    SELECT id, username, email, role, password_hash, is_active, created_at
    FROM users
"#;

#[derive(sqlx::FromRow)]
struct UserRecord {
    id: String,
    username: String,
    email: String,
    role: String,
    password_hash: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRecord) -> Result<Self> {
        Ok(User {
            id: parse_id(&row.id)?,
            username: row.username,
            email: row.email,
            role: UserRole::parse_or_default(&row.role),
            password_hash: row.password_hash,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

fn into_user(row: Option<UserRecord>) -> Result<Option<User>> {
    row.map(User::try_from).transpose()
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        let sql = r#"
            INSERT INTO users (id, username, email, role, password_hash, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#;
        on_backend!(self.pool, |pool| {
            sqlx::query(sql)
                .bind(user.id.to_string())
                .bind(&user.username)
                .bind(&user.email)
                .bind(user.role.to_string())
                .bind(&user.password_hash)
                .bind(user.is_active)
                .bind(user.created_at)
                .execute(pool)
                .await
                .context("Failed to create user")?;
        });
        Ok(user.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let sql = format!("{} WHERE id = ?", SELECT_USER);
        let row = on_backend!(self.pool, |pool| {
            sqlx::query_as::<_, UserRecord>(&sql)
                .bind(id.to_string())
                .fetch_optional(pool)
                .await
                .context("Failed to get user by ID")?
        });
        into_user(row)
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        // users are stored with a binary collation on MySQL, so `=` is case-sensitive on both drivers
        let sql = format!("{} WHERE username = ?", SELECT_USER);
        let row = on_backend!(self.pool, |pool| {
            sqlx::query_as::<_, UserRecord>(&sql)
                .bind(username)
                .fetch_optional(pool)
                .await
                .context("Failed to get user by username")?
        });
        into_user(row)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("{} WHERE LOWER(email) = LOWER(?)", SELECT_USER);
        let row = on_backend!(self.pool, |pool| {
            sqlx::query_as::<_, UserRecord>(&sql)
                .bind(email)
                .fetch_optional(pool)
                .await
                .context("Failed to get user by email")?
        });
        into_user(row)
    }

    async fn exists(&self, username: &str, email: &str) -> Result<bool> {
        let sql = "SELECT COUNT(*) FROM users WHERE username = ? OR LOWER(email) = LOWER(?)";
        let count: i64 = on_backend!(self.pool, |pool| {
            sqlx::query_scalar(sql)
                .bind(username)
                .bind(email)
                .fetch_one(pool)
                .await
                .context("Failed to check for existing user")?
        });
        Ok(count > 0)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let sql = "UPDATE users SET password_hash = ? WHERE id = ?";
        on_backend!(self.pool, |pool| {
            sqlx::query(sql)
                .bind(password_hash)
                .bind(id.to_string())
                .execute(pool)
                .await
                .context("Failed to update password")?;
        });
        Ok(())
    }

    async fn update_email(&self, id: Uuid, email: &str) -> Result<()> {
        let sql = "UPDATE users SET email = ? WHERE id = ?";
        on_backend!(self.pool, |pool| {
            sqlx::query(sql)
                .bind(email)
                .bind(id.to_string())
                .execute(pool)
                .await
                .context("Failed to update email")?;
        });
        Ok(())
    }

    async fn set_active(&self, id: Uuid, is_active: bool) -> Result<()> {
        let sql = "UPDATE users SET is_active = ? WHERE id = ?";
        on_backend!(self.pool, |pool| {
            sqlx::query(sql)
                .bind(is_active)
                .bind(id.to_string())
                .execute(pool)
                .await
                .context("Failed to update user status")?;
        });
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = on_backend!(self.pool, |pool| {
            sqlx::query_scalar("SELECT COUNT(*) FROM users")
                .fetch_one(pool)
                .await
                .context("Failed to count users")?
        });
        Ok(count)
    }

    async fn list(&self, page: i64, per_page: i64) -> Result<(Vec<User>, i64)> {
        let offset = (page.max(1) - 1) * per_page;
        let sql = format!("{} ORDER BY created_at DESC LIMIT ? OFFSET ?", SELECT_USER);
        let rows = on_backend!(self.pool, |pool| {
            sqlx::query_as::<_, UserRecord>(&sql)
                .bind(per_page)
                .bind(offset)
                .fetch_all(pool)
                .await
                .context("Failed to list users")?
        });
        let users = rows
            .into_iter()
            .map(User::try_from)
            .collect::<Result<Vec<_>>>()?;
        let total = self.count().await?;
        Ok((users, total))
    }
}
