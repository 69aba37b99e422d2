//! Host repository

use crate::db::{parse_id, DynDatabasePool};
use crate::models::Host;
use crate::services::tenant::TenantScope;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;


#[async_trait]
pub trait HostRepository: Send + Sync {
    /// Insert a host owned by `scope`. Fails on a duplicate hostname.
    async fn create(&self, scope: TenantScope, host: &Host) -> Result<Host>;

    async fn find_by_hostname(&self, scope: TenantScope, hostname: &str) -> Result<Option<Host>>;

    async fn get(&self, scope: TenantScope, id: Uuid) -> Result<Option<Host>>;

    /// Hosts ordered by most recently seen
    async fn list(&self, scope: TenantScope, active_only: bool) -> Result<Vec<Host>>;

    async fn touch(&self, scope: TenantScope, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn deactivate(&self, scope: TenantScope, id: Uuid) -> Result<bool>;

    async fn count_active(&self, scope: TenantScope) -> Result<i64>;
}

pub struct SqlxHostRepository {
    pool: DynDatabasePool,
}

impl SqlxHostRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn HostRepository> {
        Arc::new(Self::new(pool))
    }
}

const SELECT_HOST: &str = r#"
    SELECT id, hostname, ip_address, os_type, is_active, last_seen, user_id
    FROM hosts
"#;

#[derive(sqlx::FromRow)]
struct HostRecord {
    id: String,
    hostname: String,
    ip_address: Option<String>,
    os_type: Option<String>,
    is_active: bool,
    last_seen: DateTime<Utc>,
    user_id: String,
}

impl TryFrom<HostRecord> for Host {
    type Error = anyhow::Error;

    fn try_from(row: HostRecord) -> Result<Self> {
        Ok(Host {
            id: parse_id(&row.id)?,
            hostname: row.hostname,
            ip_address: row.ip_address,
            os_type: row.os_type,
            is_active: row.is_active,
            last_seen: row.last_seen,
            user_id: parse_id(&row.user_id)?,
        })
    }
}

#[async_trait]
impl HostRepository for SqlxHostRepository {
    async fn create(&self, scope: TenantScope, host: &Host) -> Result<Host> {
        let sql = r#"
            INSERT INTO hosts (id, hostname, ip_address, os_type, is_active, last_seen, user_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#;
        on_backend!(self.pool, |pool| {
            sqlx::query(sql)
                .bind(host.id.to_string())
                .bind(&host.hostname)
                .bind(&host.ip_address)
                .bind(&host.os_type)
                .bind(host.is_active)
                .bind(host.last_seen)
                .bind(scope.user_id().to_string())
                .execute(pool)
                .await
                .with_context(|| format!("Failed to create host {}", host.hostname))?;
        });
        Ok(Host {
            user_id: scope.user_id(),
            ..host.clone()
        })
    }

    async fn find_by_hostname(&self, scope: TenantScope, hostname: &str) -> Result<Option<Host>> {
        let sql = format!("{} WHERE user_id = ? AND hostname = ?", SELECT_HOST);
        let row = on_backend!(self.pool, |pool| {
            sqlx::query_as::<_, HostRecord>(&sql)
                .bind(scope.user_id().to_string())
                .bind(hostname)
                .fetch_optional(pool)
                .await
                .context("Failed to look up host")?
        });
        row.map(Host::try_from).transpose()
    }

    async fn get(&self, scope: TenantScope, id: Uuid) -> Result<Option<Host>> {
        let sql = format!("{} WHERE user_id = ? AND id = ?", SELECT_HOST);
        let row = on_backend!(self.pool, |pool| {
            sqlx::query_as::<_, HostRecord>(&sql)
                .bind(scope.user_id().to_string())
                .bind(id.to_string())
                .fetch_optional(pool)
                .await
                .context("Failed to get host")?
        });
        row.map(Host::try_from).transpose()
    }

    async fn list(&self, scope: TenantScope, active_only: bool) -> Result<Vec<Host>> {
        let sql = if active_only {
            format!(
                "{} WHERE user_id = ? AND is_active = ? ORDER BY last_seen DESC",
                SELECT_HOST
            )
        } else {
            format!("{} WHERE user_id = ? ORDER BY last_seen DESC", SELECT_HOST)
        };
        let rows = on_backend!(self.pool, |pool| {
            let mut query = sqlx::query_as::<_, HostRecord>(&sql).bind(scope.user_id().to_string());
            if active_only {
                query = query.bind(true);
            }
            query.fetch_all(pool).await.context("Failed to list hosts")?
        });
        rows.into_iter().map(Host::try_from).collect()
    }

    async fn touch(&self, scope: TenantScope, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let sql = "UPDATE hosts SET last_seen = ? WHERE user_id = ? AND id = ?";
        on_backend!(self.pool, |pool| {
            sqlx::query(sql)
                .bind(at)
                .bind(scope.user_id().to_string())
                .bind(id.to_string())
                .execute(pool)
                .await
                .context("Failed to update host last_seen")?;
        });
        Ok(())
    }

    async fn deactivate(&self, scope: TenantScope, id: Uuid) -> Result<bool> {
        let sql = "UPDATE hosts SET is_active = ? WHERE user_id = ? AND id = ?";
        let affected = on_backend!(self.pool, |pool| {
            sqlx::query(sql)
                .bind(false)
                .bind(scope.user_id().to_string())
                .bind(id.to_string())
                .execute(pool)
                .await
                .context("Failed to deactivate host")?
                .rows_affected()
        });
        Ok(affected > 0)
    }

    async fn count_active(&self, scope: TenantScope) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM hosts WHERE user_id = ? AND is_active = ?";
        let count: i64 = on_backend!(self.pool, |pool| {
            sqlx::query_scalar(sql)
                .bind(scope.user_id().to_string())
                .bind(true)
                .fetch_one(pool)
                .await
                .context("Failed to count hosts")?
        });
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{User, UserRole};
    use chrono::Duration;

    async fn setup() -> (SqlxHostRepository, TenantScope, TenantScope) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let users = SqlxUserRepository::new(pool.clone());
        let alice = User::new("alice".into(), "alice@example.com".into(), None, UserRole::User);
        let bob = User::new("bob".into(), "bob@example.com".into(), None, UserRole::User);
        users.create(&alice).await.unwrap();
        users.create(&bob).await.unwrap();
        (
            SqlxHostRepository::new(pool),
            TenantScope::of(&alice),
            TenantScope::of(&bob),
        )
    }

    #[tokio::test]
    async fn test_same_hostname_for_two_tenants() {
        let (repo, alice, bob) = setup().await;
        repo.create(alice, &Host::new(alice.user_id(), "web-1".into()))
            .await
            .unwrap();
        repo.create(bob, &Host::new(bob.user_id(), "web-1".into()))
            .await
            .unwrap();

        let a = repo.find_by_hostname(alice, "web-1").await.unwrap().unwrap();
        let b = repo.find_by_hostname(bob, "web-1").await.unwrap().unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.user_id, alice.user_id());
    }

    #[tokio::test]
    async fn test_duplicate_hostname_per_tenant_fails() {
        let (repo, alice, _) = setup().await;
        repo.create(alice, &Host::new(alice.user_id(), "web-1".into()))
            .await
            .unwrap();
        assert!(repo
            .create(alice, &Host::new(alice.user_id(), "web-1".into()))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_get_is_scoped() {
        let (repo, alice, bob) = setup().await;
        let host = repo
            .create(alice, &Host::new(alice.user_id(), "db".into()))
            .await
            .unwrap();

        assert!(repo.get(alice, host.id).await.unwrap().is_some());
        assert!(repo.get(bob, host.id).await.unwrap().is_none());
        assert!(!repo.deactivate(bob, host.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_and_deactivate() {
        let (repo, alice, _) = setup().await;
        let old = repo
            .create(alice, &Host::new(alice.user_id(), "old".into()))
            .await
            .unwrap();
        let new = repo
            .create(alice, &Host::new(alice.user_id(), "new".into()))
            .await
            .unwrap();
        repo.touch(alice, new.id, Utc::now() + Duration::minutes(5))
            .await
            .unwrap();

        let hosts = repo.list(alice, false).await.unwrap();
        assert_eq!(hosts[0].hostname, "new");
        assert_eq!(repo.count_active(alice).await.unwrap(), 2);

        assert!(repo.deactivate(alice, old.id).await.unwrap());
        assert_eq!(repo.list(alice, true).await.unwrap().len(), 1);
        assert_eq!(repo.list(alice, false).await.unwrap().len(), 2);
        assert_eq!(repo.count_active(alice).await.unwrap(), 1);
    }
}
