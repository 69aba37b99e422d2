//! Multi-tenant query scoping
//!
//! Every read or write of commands, hosts and API keys is constrained to one
//! owner. Repositories take a [`TenantScope`] instead of a raw user id, and a
//! scope can only be obtained from an authenticated [`User`], so an unscoped
//! query over owned rows cannot be written by accident.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::User;

/// The owner every scoped query is restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantScope {
    user_id: Uuid,
}

impl TenantScope {
    pub fn of(user: &User) -> Self {
        Self { user_id: user.id }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }
}

/// Structured command filters as they arrive from a request
#[derive(Debug, Clone, Default)]
pub struct CommandFilter {
    pub hostname: Option<String>,
    pub username: Option<String>,
    /// Raw value; ignored unless it parses as an integer
    pub exit_code: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// A bound SQL parameter produced by [`TenantQuery::sql_predicate`]
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Int(i64),
    Time(DateTime<Utc>),
}

/// A command query that is always restricted to one tenant
#[derive(Debug, Clone)]
pub struct TenantQuery {
    scope: TenantScope,
    text: Option<String>,
    hostname: Option<String>,
    username: Option<String>,
    exit_code: Option<i64>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl TenantQuery {
    pub fn new(scope: TenantScope, text: Option<String>, filter: CommandFilter) -> Self {
        Self {
            scope,
            text: text
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            hostname: filter.hostname.as_deref().and_then(sanitize),
            username: filter.username.as_deref().and_then(sanitize),
            exit_code: filter
                .exit_code
                .as_deref()
                .and_then(|raw| raw.trim().parse().ok()),
            start: filter.start,
            end: filter.end,
        }
    }

    /// Unfiltered query over the whole tenant
    pub fn all(scope: TenantScope) -> Self {
        Self::new(scope, None, CommandFilter::default())
    }

    pub fn scope(&self) -> TenantScope {
        self.scope
    }

    /// Free-text search terms, if any
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Filter expressions for the search index.
    ///
    /// The tenant clause always comes first.
    pub fn search_filters(&self) -> Vec<String> {
        let mut filters = vec![format!("user_id = \"{}\"", self.scope.user_id)];
        if let Some(hostname) = &self.hostname {
            filters.push(format!("hostname = \"{}\"", hostname));
        }
        if let Some(username) = &self.username {
            filters.push(format!("username = \"{}\"", username));
        }
        if let Some(exit_code) = self.exit_code {
            filters.push(format!("exit_code = {}", exit_code));
        }
        if let Some(start) = self.start {
            filters.push(format!("timestamp_unix >= {}", start.timestamp()));
        }
        if let Some(end) = self.end {
            filters.push(format!("timestamp_unix <= {}", end.timestamp()));
        }
        filters
    }

    /// `WHERE` clause and bound values for the `commands` table.
    ///
    /// The clause always starts with `user_id = ?` bound to the scope.
    pub fn sql_predicate(&self) -> (String, Vec<FilterValue>) {
        let mut sql = String::from("WHERE user_id = ?");
        let mut values = vec![FilterValue::Text(self.scope.user_id.to_string())];

        if let Some(text) = &self.text {
            sql.push_str(" AND command LIKE ?");
            values.push(FilterValue::Text(format!("%{}%", text)));
        }
        if let Some(hostname) = &self.hostname {
            sql.push_str(" AND hostname = ?");
            values.push(FilterValue::Text(hostname.clone()));
        }
        if let Some(username) = &self.username {
            sql.push_str(" AND username = ?");
            values.push(FilterValue::Text(username.clone()));
        }
        if let Some(exit_code) = self.exit_code {
            sql.push_str(" AND exit_code = ?");
            values.push(FilterValue::Int(exit_code));
        }
        if let Some(start) = self.start {
            sql.push_str(" AND timestamp >= ?");
            values.push(FilterValue::Time(start));
        }
        if let Some(end) = self.end {
            sql.push_str(" AND timestamp <= ?");
            values.push(FilterValue::Time(end));
        }
        (sql, values)
    }
}

/// Trim and strip quote characters; empty results are dropped.
fn sanitize(raw: &str) -> Option<String> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != '"' && *c != '\'').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}
