//! Command history, hosts and per-user statistics

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::RateLimitPolicy;
use crate::db::repositories::{CommandRepository, HostRepository};
use crate::db::DynDatabasePool;
use crate::models::{Command, HistoryStats, Host, NewCommand, NewHost, PagedResult};

use super::rate_limiter::RateLimiter;
use super::search::SearchIndex;
use super::tenant::{TenantQuery, TenantScope};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Rate limit exceeded. Please slow down.")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub struct HistoryService {
    commands: Arc<dyn CommandRepository>,
    hosts: Arc<dyn HostRepository>,
    search: Arc<SearchIndex>,
    limiter: Arc<RateLimiter>,
    ingest_policy: RateLimitPolicy,
    pool: DynDatabasePool,
}

fn ingest_key(scope: TenantScope) -> String {
    format!("api_commands:{}", scope.user_id())
}

impl HistoryService {
    pub fn new(
        commands: Arc<dyn CommandRepository>,
        hosts: Arc<dyn HostRepository>,
        search: Arc<SearchIndex>,
        limiter: Arc<RateLimiter>,
        ingest_policy: RateLimitPolicy,
        pool: DynDatabasePool,
    ) -> Self {
        Self {
            commands,
            hosts,
            search,
            limiter,
            ingest_policy,
            pool,
        }
    }

    /// Store a command pushed by a shell client.
    ///
    /// The host is registered on first sight and its `last_seen` refreshed
    /// afterwards. Indexing failures are logged; the command is stored anyway.
    ///
    /// # Errors
    ///
    /// * `HistoryError::RateLimited` - The caller used up the ingestion policy
    /// * `HistoryError::Validation` - Command, hostname or username is blank
    /// * `HistoryError::Internal` - The command or host could not be written
    pub async fn ingest(&self, scope: TenantScope, input: NewCommand) -> Result<Command, HistoryError> {
        if !self.limiter.check(&ingest_key(scope), self.ingest_policy).await.allowed {
            tracing::warn!(user_id = %scope.user_id(), "Command ingest rate limit exceeded");
            return Err(HistoryError::RateLimited);
        }

        let hostname = input.hostname.trim();
        if input.command.is_empty() || hostname.is_empty() || input.username.trim().is_empty() {
            return Err(HistoryError::Validation(
                "command, hostname and username are required".to_string(),
            ));
        }

        let host = self.host_for(scope, hostname).await?;
        let command = Command {
            id: Uuid::new_v4(),
            command: input.command,
            hostname: host.hostname.clone(),
            username: input.username,
            alt_username: input.alt_username,
            cwd: input.cwd,
            old_pwd: input.old_pwd,
            exit_code: input.exit_code,
            timestamp: Utc::now(),
            session_id: input.session_id,
            redacted: input.redacted,
            user_id: scope.user_id(),
            host_id: host.id,
        };
        let command = self.commands.insert(scope, &command).await?;

        if self.search.is_enabled() {
            if let Err(e) = self.search.index_command(&command).await {
                tracing::warn!(command_id = %command.id, "Failed to index command: {}", e);
            }
        }
        Ok(command)
    }

    /// Ingestion requests `scope` may still make in the current window
    pub async fn ingest_budget(&self, scope: TenantScope) -> u32 {
        self.limiter
            .remaining(
                &ingest_key(scope),
                self.ingest_policy.max_requests,
                self.ingest_policy.window_seconds,
            )
            .await
    }

    /// Configured ingestion policy
    pub fn ingest_policy(&self) -> RateLimitPolicy {
        self.ingest_policy
    }

    async fn host_for(&self, scope: TenantScope, hostname: &str) -> anyhow::Result<Host> {
        let now = Utc::now();
        if let Some(mut host) = self.hosts.find_by_hostname(scope, hostname).await? {
            self.hosts.touch(scope, host.id, now).await?;
            host.last_seen = now;
            return Ok(host);
        }

        match self
            .hosts
            .create(scope, &Host::new(scope.user_id(), hostname.to_string()))
            .await
        {
            Ok(host) => {
                tracing::info!(hostname, user_id = %scope.user_id(), "Registered new host");
                Ok(host)
            }
            // A concurrent ingest from the same host may have won the insert.
            Err(e) => match self.hosts.find_by_hostname(scope, hostname).await? {
                Some(host) => Ok(host),
                None => Err(e),
            },
        }
    }

    /// Newest commands first. Free text goes to the search index when one is
    /// configured; the database answers otherwise or when the index fails.
    pub async fn search(
        &self,
        query: &TenantQuery,
        page: u32,
        page_size: u32,
    ) -> Result<PagedResult<Command>, HistoryError> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = page.saturating_mul(page_size);

        if query.text().is_some() && self.search.is_enabled() {
            match self.search.search(query, page_size, offset).await {
                Ok(hits) => {
                    return Ok(PagedResult::new(hits.commands, hits.total, page, page_size));
                }
                Err(e) => tracing::warn!("Search index query failed, using database: {}", e),
            }
        }

        let (items, total) = self
            .commands
            .search(query, page_size as i64, offset as i64)
            .await?;
        Ok(PagedResult::new(items, total, page, page_size))
    }

    pub async fn get(&self, scope: TenantScope, id: Uuid) -> Result<Command, HistoryError> {
        self.commands
            .get(scope, id)
            .await?
            .ok_or_else(|| HistoryError::NotFound("Command not found".to_string()))
    }

    pub async fn delete(&self, scope: TenantScope, id: Uuid) -> Result<(), HistoryError> {
        if !self.commands.delete(scope, id).await? {
            return Err(HistoryError::NotFound("Command not found".to_string()));
        }
        if self.search.is_enabled() {
            if let Err(e) = self.search.delete_command(id).await {
                tracing::warn!(command_id = %id, "Failed to remove command from index: {}", e);
            }
        }
        Ok(())
    }

    pub async fn list_hosts(
        &self,
        scope: TenantScope,
        active_only: bool,
        page: u32,
        page_size: u32,
    ) -> Result<PagedResult<Host>, HistoryError> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let hosts = self.hosts.list(scope, active_only).await?;
        let total = hosts.len() as i64;
        let items = hosts
            .into_iter()
            .skip(page as usize * page_size as usize)
            .take(page_size as usize)
            .collect();
        Ok(PagedResult::new(items, total, page, page_size))
    }

    pub async fn get_host(&self, scope: TenantScope, id: Uuid) -> Result<Host, HistoryError> {
        self.hosts
            .get(scope, id)
            .await?
            .ok_or_else(|| HistoryError::NotFound("Host not found".to_string()))
    }

    pub async fn create_host(&self, scope: TenantScope, input: NewHost) -> Result<Host, HistoryError> {
        let hostname = input.hostname.trim();
        if hostname.is_empty() {
            return Err(HistoryError::Validation("hostname is required".to_string()));
        }
        if self.hosts.find_by_hostname(scope, hostname).await?.is_some() {
            return Err(HistoryError::Conflict("Host already registered".to_string()));
        }

        let mut host = Host::new(scope.user_id(), hostname.to_string());
        host.ip_address = input.ip_address.filter(|v| !v.is_empty());
        host.os_type = input.os_type.filter(|v| !v.is_empty());
        Ok(self.hosts.create(scope, &host).await?)
    }

    pub async fn deactivate_host(&self, scope: TenantScope, id: Uuid) -> Result<(), HistoryError> {
        if !self.hosts.deactivate(scope, id).await? {
            return Err(HistoryError::NotFound("Host not found".to_string()));
        }
        Ok(())
    }

    pub async fn stats(&self, scope: TenantScope) -> Result<HistoryStats, HistoryError> {
        let total_commands = self.commands.count(scope).await?;
        let active_hosts = self.hosts.count_active(scope).await?;

        // Size of the whole database file, shared by all tenants
        let storage_used = self
            .pool
            .storage_path()
            .and_then(|path| std::fs::metadata(path).ok())
            .map(|meta| format_storage(meta.len()))
            .unwrap_or_else(|| format_storage(0));

        Ok(HistoryStats {
            total_commands,
            active_hosts,
            storage_used,
        })
    }
}

pub fn format_storage(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    }
}
