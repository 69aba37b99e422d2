//! Command repository
//!
//! Filtered listing binds the parameters produced by
//! [`TenantQuery::sql_predicate`], whose first condition is always the owner.

use crate::db::{parse_id, Backend, DynDatabasePool};
use crate::models::Command;
use crate::services::tenant::{FilterValue, TenantQuery, TenantScope};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySql, MySqlPool, Sqlite, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;


#[async_trait]
pub trait CommandRepository: Send + Sync {
    /// Store a command for `scope`. The command's `user_id` is taken from the scope.
    async fn insert(&self, scope: TenantScope, command: &Command) -> Result<Command>;

    /// Newest first, with the total number of matches
    async fn search(&self, query: &TenantQuery, limit: i64, offset: i64) -> Result<(Vec<Command>, i64)>;

    async fn get(&self, scope: TenantScope, id: Uuid) -> Result<Option<Command>>;

    /// Returns `false` when nothing owned by `scope` had this id
    async fn delete(&self, scope: TenantScope, id: Uuid) -> Result<bool>;

    async fn count(&self, scope: TenantScope) -> Result<i64>;
}

pub struct SqlxCommandRepository {
    pool: DynDatabasePool,
}

impl SqlxCommandRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CommandRepository> {
        Arc::new(Self::new(pool))
    }
}

const SELECT_COMMAND: &str = r#"
    SELECT id, command, hostname, username, alt_username, cwd, old_pwd, exit_code,
           timestamp, session_id, redacted, user_id, host_id
    FROM commands
"#;

#[derive(sqlx::FromRow)]
struct CommandRecord {
    id: String,
    command: String,
    hostname: String,
    username: String,
    alt_username: Option<String>,
    cwd: Option<String>,
    old_pwd: Option<String>,
    exit_code: Option<i32>,
    timestamp: DateTime<Utc>,
    session_id: Option<String>,
    redacted: bool,
    user_id: String,
    host_id: String,
}

impl TryFrom<CommandRecord> for Command {
    type Error = anyhow::Error;

    fn try_from(row: CommandRecord) -> Result<Self> {
        Ok(Command {
            id: parse_id(&row.id)?,
            command: row.command,
            hostname: row.hostname,
            username: row.username,
            alt_username: row.alt_username,
            cwd: row.cwd,
            old_pwd: row.old_pwd,
            exit_code: row.exit_code,
            timestamp: row.timestamp,
            session_id: row.session_id,
            redacted: row.redacted,
            user_id: parse_id(&row.user_id)?,
            host_id: parse_id(&row.host_id)?,
        })
    }
}

#[async_trait]
impl CommandRepository for SqlxCommandRepository {
    async fn insert(&self, scope: TenantScope, command: &Command) -> Result<Command> {
        let sql = r#"
            INSERT INTO commands (id, command, hostname, username, alt_username, cwd, old_pwd,
                                  exit_code, timestamp, session_id, redacted, user_id, host_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#;
        on_backend!(self.pool, |pool| {
            sqlx::query(sql)
                .bind(command.id.to_string())
                .bind(&command.command)
                .bind(&command.hostname)
                .bind(&command.username)
                .bind(&command.alt_username)
                .bind(&command.cwd)
                .bind(&command.old_pwd)
                .bind(command.exit_code)
                .bind(command.timestamp)
                .bind(&command.session_id)
                .bind(command.redacted)
                .bind(scope.user_id().to_string())
                .bind(command.host_id.to_string())
                .execute(pool)
                .await
                .context("Failed to store command")?;
        });
        Ok(Command {
            user_id: scope.user_id(),
            ..command.clone()
        })
    }

    async fn search(&self, query: &TenantQuery, limit: i64, offset: i64) -> Result<(Vec<Command>, i64)> {
        let (rows, total) = match self.pool.backend() {
            Backend::Sqlite(pool) => search_sqlite(pool, query, limit, offset).await?,
            Backend::Mysql(pool) => search_mysql(pool, query, limit, offset).await?,
        };
        let commands = rows
            .into_iter()
            .map(Command::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok((commands, total))
    }

    async fn get(&self, scope: TenantScope, id: Uuid) -> Result<Option<Command>> {
        let sql = format!("{} WHERE user_id = ? AND id = ?", SELECT_COMMAND);
        let row = on_backend!(self.pool, |pool| {
            sqlx::query_as::<_, CommandRecord>(&sql)
                .bind(scope.user_id().to_string())
                .bind(id.to_string())
                .fetch_optional(pool)
                .await
                .context("Failed to get command")?
        });
        row.map(Command::try_from).transpose()
    }

    async fn delete(&self, scope: TenantScope, id: Uuid) -> Result<bool> {
        let sql = "DELETE FROM commands WHERE user_id = ? AND id = ?";
        let affected = on_backend!(self.pool, |pool| {
            sqlx::query(sql)
                .bind(scope.user_id().to_string())
                .bind(id.to_string())
                .execute(pool)
                .await
                .context("Failed to delete command")?
                .rows_affected()
        });
        Ok(affected > 0)
    }

    async fn count(&self, scope: TenantScope) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM commands WHERE user_id = ?";
        let count: i64 = on_backend!(self.pool, |pool| {
            sqlx::query_scalar(sql)
                .bind(scope.user_id().to_string())
                .fetch_one(pool)
                .await
                .context("Failed to count commands")?
        });
        Ok(count)
    }
}

/// Bind every [`FilterValue`] in order.
macro_rules! bind_filters {
    ($query:expr, $values:expr) => {{
        let mut query = $query;
        for value in $values {
            query = match value {
                FilterValue::Text(text) => query.bind(text.as_str()),
                FilterValue::Int(int) => query.bind(*int),
                FilterValue::Time(time) => query.bind(*time),
            };
        }
        query
    }};
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn search_sqlite(
    pool: &SqlitePool,
    query: &TenantQuery,
    limit: i64,
    offset: i64,
) -> Result<(Vec<CommandRecord>, i64)> {
    let (predicate, values) = query.sql_predicate();

    let count_sql = format!("SELECT COUNT(*) FROM commands {}", predicate);
    let total = bind_filters!(sqlx::query_scalar::<Sqlite, i64>(&count_sql), &values)
        .fetch_one(pool)
        .await
        .context("Failed to count commands")?;

    let list_sql = format!(
        "{} {} ORDER BY timestamp DESC LIMIT ? OFFSET ?",
        SELECT_COMMAND, predicate
    );
    let rows = bind_filters!(sqlx::query_as::<Sqlite, CommandRecord>(&list_sql), &values)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("Failed to search commands")?;

    Ok((rows, total))
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn search_mysql(
    pool: &MySqlPool,
    query: &TenantQuery,
    limit: i64,
    offset: i64,
) -> Result<(Vec<CommandRecord>, i64)> {
    let (predicate, values) = query.sql_predicate();

    let count_sql = format!("SELECT COUNT(*) FROM commands {}", predicate);
    let total = bind_filters!(sqlx::query_scalar::<MySql, i64>(&count_sql), &values)
        .fetch_one(pool)
        .await
        .context("Failed to count commands")?;

    let list_sql = format!(
        "{} {} ORDER BY timestamp DESC LIMIT ? OFFSET ?",
        SELECT_COMMAND, predicate
    );
    let rows = bind_filters!(sqlx::query_as::<MySql, CommandRecord>(&list_sql), &values)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("Failed to search commands")?;

    Ok((rows, total))
}
