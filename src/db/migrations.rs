//! Database migrations
//!
//! Migrations are embedded in the binary as SQL strings, one variant per
//! driver, and tracked in the `_migrations` table.
//!
//! ```ignore
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```

use anyhow::{Context, Result};
use sqlx::Row;

use super::{Backend, DynDatabasePool};
use crate::config::DatabaseDriver;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements for SQLite
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL
    pub up_mysql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS users (
                id VARCHAR(36) PRIMARY KEY,
                username VARCHAR(100) NOT NULL UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                role VARCHAR(20) NOT NULL DEFAULT 'user',
                password_hash VARCHAR(255),
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at TIMESTAMP NOT NULL
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id VARCHAR(36) PRIMARY KEY,
                username VARCHAR(100) NOT NULL UNIQUE,
                email VARCHAR(255) NOT NULL UNIQUE,
                role VARCHAR(20) NOT NULL DEFAULT 'user',
                password_hash VARCHAR(255) NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin;
        "#,
    },
    Migration {
        version: 2,
        name: "create_api_keys",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS api_keys (
                id VARCHAR(36) PRIMARY KEY,
                user_id VARCHAR(36) NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                key_hash VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(100),
                created_at TIMESTAMP NOT NULL,
                last_used_at TIMESTAMP,
                is_active BOOLEAN NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_api_keys_user ON api_keys(user_id);
            CREATE INDEX IF NOT EXISTS idx_api_keys_active ON api_keys(is_active);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS api_keys (
                id VARCHAR(36) PRIMARY KEY,
                user_id VARCHAR(36) NOT NULL,
                key_hash VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(100) NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                last_used_at TIMESTAMP NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                INDEX idx_api_keys_user (user_id),
                INDEX idx_api_keys_active (is_active),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin;
        "#,
    },
    Migration {
        version: 3,
        name: "create_hosts",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS hosts (
                id VARCHAR(36) PRIMARY KEY,
                hostname VARCHAR(255) NOT NULL,
                ip_address VARCHAR(45),
                os_type VARCHAR(50),
                is_active BOOLEAN NOT NULL DEFAULT 1,
                last_seen TIMESTAMP NOT NULL,
                user_id VARCHAR(36) NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                UNIQUE (hostname, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_hosts_user ON hosts(user_id);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS hosts (
                id VARCHAR(36) PRIMARY KEY,
                hostname VARCHAR(255) NOT NULL,
                ip_address VARCHAR(45) NULL,
                os_type VARCHAR(50) NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                last_seen TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                user_id VARCHAR(36) NOT NULL,
                UNIQUE KEY uq_hosts_hostname_user (hostname, user_id),
                INDEX idx_hosts_user (user_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin;
        "#,
    },
    Migration {
        version: 4,
        name: "create_commands",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS commands (
                id VARCHAR(36) PRIMARY KEY,
                command TEXT NOT NULL,
                hostname VARCHAR(255) NOT NULL,
                username VARCHAR(100) NOT NULL,
                alt_username VARCHAR(100),
                cwd TEXT,
                old_pwd TEXT,
                exit_code INTEGER,
                timestamp TIMESTAMP NOT NULL,
                session_id VARCHAR(100),
                redacted BOOLEAN NOT NULL DEFAULT 0,
                user_id VARCHAR(36) NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                host_id VARCHAR(36) NOT NULL REFERENCES hosts(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_commands_user_time ON commands(user_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_commands_hostname ON commands(hostname);
            CREATE INDEX IF NOT EXISTS idx_commands_username ON commands(username);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS commands (
                id VARCHAR(36) PRIMARY KEY,
                command TEXT NOT NULL,
                hostname VARCHAR(255) NOT NULL,
                username VARCHAR(100) NOT NULL,
                alt_username VARCHAR(100) NULL,
                cwd TEXT NULL,
                old_pwd TEXT NULL,
                exit_code INT NULL,
                timestamp TIMESTAMP(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                session_id VARCHAR(100) NULL,
                redacted BOOLEAN NOT NULL DEFAULT FALSE,
                user_id VARCHAR(36) NOT NULL,
                host_id VARCHAR(36) NOT NULL,
                INDEX idx_commands_user_time (user_id, timestamp),
                INDEX idx_commands_hostname (hostname),
                INDEX idx_commands_username (username),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (host_id) REFERENCES hosts(id) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin;
        "#,
    },
    Migration {
        version: 5,
        name: "create_password_reset_tokens",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS password_reset_tokens (
                id VARCHAR(36) PRIMARY KEY,
                user_id VARCHAR(36) NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                token VARCHAR(255) NOT NULL UNIQUE,
                expires_at TIMESTAMP NOT NULL,
                used_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS password_reset_tokens (
                id VARCHAR(36) PRIMARY KEY,
                user_id VARCHAR(36) NOT NULL,
                token VARCHAR(255) NOT NULL UNIQUE,
                expires_at TIMESTAMP NOT NULL,
                used_at TIMESTAMP NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin;
        "#,
    },
    Migration {
        version: 6,
        name: "create_email_verification_tokens",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS email_verification_tokens (
                id VARCHAR(36) PRIMARY KEY,
                user_id VARCHAR(36) NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                new_email VARCHAR(255) NOT NULL,
                token VARCHAR(255) NOT NULL UNIQUE,
                expires_at TIMESTAMP NOT NULL,
                used_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS email_verification_tokens (
                id VARCHAR(36) PRIMARY KEY,
                user_id VARCHAR(36) NOT NULL,
                new_email VARCHAR(255) NOT NULL,
                token VARCHAR(255) NOT NULL UNIQUE,
                expires_at TIMESTAMP NOT NULL,
                used_at TIMESTAMP NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_bin;
        "#,
    },
];

/// Run all pending migrations, returning how many were applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_versions(pool).await?;

    let mut count = 0;
    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }
        tracing::info!(
            "Applying migration {}: {}",
            migration.version,
            migration.name
        );
        apply_migration(pool, migration)
            .await
            .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
        count += 1;
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INT PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

async fn get_applied_versions(pool: &DynDatabasePool) -> Result<Vec<i32>> {
    const SQL: &str = "SELECT version FROM _migrations ORDER BY version";
    let versions = match pool.backend() {
        Backend::Sqlite(p) => sqlx::query(SQL)
            .fetch_all(p)
            .await?
            .iter()
            .map(|row| row.get::<i32, _>("version"))
            .collect(),
        Backend::Mysql(p) => sqlx::query(SQL)
            .fetch_all(p)
            .await?
            .iter()
            .map(|row| row.get::<i32, _>("version"))
            .collect(),
    };
    Ok(versions)
}

async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    const RECORD: &str = "INSERT INTO _migrations (version, name) VALUES (?, ?)";

    match pool.backend() {
        Backend::Sqlite(p) => {
            for statement in split_sql_statements(migration.up_sqlite) {
                sqlx::query(statement)
                    .execute(p)
                    .await
                    .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
            }
            sqlx::query(RECORD)
                .bind(migration.version)
                .bind(migration.name)
                .execute(p)
                .await?;
        }
        Backend::Mysql(p) => {
            for statement in split_sql_statements(migration.up_mysql) {
                sqlx::query(statement)
                    .execute(p)
                    .await
                    .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
            }
            sqlx::query(RECORD)
                .bind(migration.version)
                .bind(migration.name)
                .execute(p)
                .await?;
        }
    }

    Ok(())
}

fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split a migration body on `;`, dropping blank and comment-only pieces.
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !is_comment_only(s))
        .collect()
}

fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Number of migrations not yet applied
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;
    let applied = get_applied_versions(pool).await?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| !applied.contains(&m.version))
        .count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    async fn migrated_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool
    }

    fn sqlite(pool: &DynDatabasePool) -> &sqlx::SqlitePool {
        match pool.backend() {
            Backend::Sqlite(p) => p,
            Backend::Mysql(_) => panic!("test pool is sqlite"),
        }
    }

    async fn insert_user(pool: &DynDatabasePool, id: &str, username: &str, email: &str) {
        sqlx::query(
            "INSERT INTO users (id, username, email, role, is_active, created_at) VALUES (?, ?, ?, 'user', 1, CURRENT_TIMESTAMP)",
        )
        .bind(id)
        .bind(username)
        .bind(email)
        .execute(sqlite(pool))
        .await
        .expect("Failed to insert user");
    }

    #[tokio::test]
    async fn test_run_migrations_is_idempotent() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        assert_eq!(pending_count(&pool).await.unwrap(), MIGRATIONS.len());

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, MIGRATIONS.len());

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, 0);
        assert_eq!(pending_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_username_and_email_are_unique() {
        let pool = migrated_pool().await;
        insert_user(&pool, "00000000-0000-0000-0000-000000000001", "alice", "a@example.com").await;

        let dup_name = sqlx::query(
            "INSERT INTO users (id, username, email, created_at) VALUES (?, ?, ?, CURRENT_TIMESTAMP)",
        )
        .bind("00000000-0000-0000-0000-000000000002")
        .bind("alice")
        .bind("other@example.com")
        .execute(sqlite(&pool))
        .await;
        assert!(dup_name.is_err());

        let dup_email = sqlx::query(
            "INSERT INTO users (id, username, email, created_at) VALUES (?, ?, ?, CURRENT_TIMESTAMP)",
        )
        .bind("00000000-0000-0000-0000-000000000003")
        .bind("bob")
        .bind("a@example.com")
        .execute(sqlite(&pool))
        .await;
        assert!(dup_email.is_err());
    }

    #[tokio::test]
    async fn test_host_unique_per_owner() {
        let pool = migrated_pool().await;
        let alice = "00000000-0000-0000-0000-00000000000a";
        let bob = "00000000-0000-0000-0000-00000000000b";
        insert_user(&pool, alice, "alice", "a@example.com").await;
        insert_user(&pool, bob, "bob", "b@example.com").await;

        let insert = |id: &'static str, owner: &'static str| {
            sqlx::query::<sqlx::Sqlite>(
                "INSERT INTO hosts (id, hostname, is_active, last_seen, user_id) VALUES (?, 'web-1', 1, CURRENT_TIMESTAMP, ?)",
            )
            .bind(id)
            .bind(owner)
        };

        insert("10000000-0000-0000-0000-000000000001", alice)
            .execute(sqlite(&pool))
            .await
            .expect("first host");
        insert("10000000-0000-0000-0000-000000000002", bob)
            .execute(sqlite(&pool))
            .await
            .expect("same hostname, other owner");
        assert!(insert("10000000-0000-0000-0000-000000000003", alice)
            .execute(sqlite(&pool))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_api_key_requires_existing_user() {
        let pool = migrated_pool().await;

        let result = sqlx::query(
            "INSERT INTO api_keys (id, user_id, key_hash, created_at, is_active) VALUES (?, ?, 'h', CURRENT_TIMESTAMP, 1)",
        )
        .bind("20000000-0000-0000-0000-000000000001")
        .bind("00000000-0000-0000-0000-0000000000ff")
        .execute(sqlite(&pool))
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_split_sql_statements() {
        let statements = split_sql_statements("CREATE TABLE a (id INT); CREATE TABLE b (id INT);");
        assert_eq!(statements, vec!["CREATE TABLE a (id INT)", "CREATE TABLE b (id INT)"]);

        let statements = split_sql_statements("-- header\n;CREATE TABLE a (id INT);\n");
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn test_every_migration_has_both_dialects() {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version, i as i32 + 1);
            assert!(!split_sql_statements(migration.up_sqlite).is_empty());
            assert!(!split_sql_statements(migration.up_mysql).is_empty());
        }
    }
}
