//! Command and host models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One executed shell command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub command: String,
    pub hostname: String,
    pub username: String,
    pub alt_username: Option<String>,
    pub cwd: Option<String>,
    pub old_pwd: Option<String>,
    pub exit_code: Option<i32>,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    /// Set by the client when it scrubbed secrets from `command`
    #[serde(default)]
    pub redacted: bool,
    #[serde(skip_serializing, default = "Uuid::nil")]
    pub user_id: Uuid,
    #[serde(skip_serializing, default = "Uuid::nil")]
    pub host_id: Uuid,
}

/// Command payload pushed by shell clients
#[derive(Debug, Clone, Deserialize)]
pub struct NewCommand {
    pub command: String,
    pub hostname: String,
    pub username: String,
    #[serde(default)]
    pub alt_username: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub old_pwd: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub redacted: bool,
}

/// A machine commands are collected from
#[derive(Debug, Clone, Serialize)]
pub struct Host {
    pub id: Uuid,
    pub hostname: String,
    pub ip_address: Option<String>,
    pub os_type: Option<String>,
    pub is_active: bool,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
}

impl Host {
    pub fn new(user_id: Uuid, hostname: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            hostname,
            ip_address: None,
            os_type: None,
            is_active: true,
            last_seen: Utc::now(),
            user_id,
        }
    }
}

/// Host registration payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewHost {
    pub hostname: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub os_type: Option<String>,
}

/// A page of results
#[derive(Debug, Clone, Serialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total: i64,
    /// Zero-based page index
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total: i64, page: u32, page_size: u32) -> Self {
        let seen = (page as i64 + 1) * page_size as i64;
        Self {
            items,
            total,
            page,
            page_size,
            has_more: seen < total,
        }
    }
}

/// Per-tenant counters for the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HistoryStats {
    pub total_commands: i64,
    pub active_hosts: i64,
    pub storage_used: String,
}
