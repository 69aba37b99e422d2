//! Full-text search over commands, backed by Meilisearch
//!
//! The index is optional. Without `search.url` every operation returns
//! [`SearchError::Disabled`] and callers fall back to the database. Every query
//! carries the tenant filter from [`TenantQuery::search_filters`].

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::config::SearchConfig;
use crate::models::Command;

use super::tenant::TenantQuery;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search index is not configured")]
    Disabled,

    #[error("Search request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Search index returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// One page of index hits
#[derive(Debug, Clone)]
pub struct SearchHits {
    pub commands: Vec<Command>,
    pub total: i64,
}

/// Document shape stored in the index
#[derive(Debug, Serialize)]
struct CommandDocument<'a> {
    id: Uuid,
    command: &'a str,
    hostname: &'a str,
    username: &'a str,
    alt_username: Option<&'a str>,
    cwd: Option<&'a str>,
    old_pwd: Option<&'a str>,
    exit_code: Option<i32>,
    timestamp: String,
    timestamp_unix: i64,
    session_id: Option<&'a str>,
    redacted: bool,
    user_id: Uuid,
    host_id: Uuid,
}

impl<'a> From<&'a Command> for CommandDocument<'a> {
    fn from(c: &'a Command) -> Self {
        Self {
            id: c.id,
            command: &c.command,
            hostname: &c.hostname,
            username: &c.username,
            alt_username: c.alt_username.as_deref(),
            cwd: c.cwd.as_deref(),
            old_pwd: c.old_pwd.as_deref(),
            exit_code: c.exit_code,
            timestamp: c.timestamp.to_rfc3339(),
            timestamp_unix: c.timestamp.timestamp(),
            session_id: c.session_id.as_deref(),
            redacted: c.redacted,
            user_id: c.user_id,
            host_id: c.host_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    hits: Vec<Command>,
    #[serde(default)]
    estimated_total_hits: Option<i64>,
    #[serde(default)]
    total_hits: Option<i64>,
}

struct Endpoint {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    index: String,
}

/// Meilisearch client
pub struct SearchIndex {
    endpoint: Option<Endpoint>,
}

impl SearchIndex {
    pub fn from_config(config: &SearchConfig) -> Self {
        let Some(url) = config.url.as_deref().filter(|u| !u.is_empty()) else {
            tracing::info!("Search index not configured, using database search");
            return Self::disabled();
        };

        let client = match Client::builder()
            .user_agent("shellhist")
            .timeout(Duration::from_secs(5))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Failed to build search client, using database search: {}", e);
                return Self::disabled();
            }
        };

        Self {
            endpoint: Some(Endpoint {
                client,
                base_url: url.trim_end_matches('/').to_string(),
                api_key: config.api_key.clone().filter(|k| !k.is_empty()),
                index: config.index.clone(),
            }),
        }
    }

    pub fn disabled() -> Self {
        Self { endpoint: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Create the index if needed and apply its attribute settings.
    pub async fn ensure_index(&self) -> Result<(), SearchError> {
        let endpoint = self.endpoint()?;

        let create = endpoint
            .request(reqwest::Method::POST, "/indexes")
            .json(&json!({ "uid": endpoint.index, "primaryKey": "id" }));
        // An existing index makes the creation task fail asynchronously, not this request.
        check(create.send().await?).await?;

        let settings = endpoint
            .request(
                reqwest::Method::PATCH,
                &format!("/indexes/{}/settings", endpoint.index),
            )
            .json(&json!({
                "searchableAttributes": ["command", "hostname", "username"],
                "filterableAttributes": ["hostname", "username", "exit_code", "timestamp", "timestamp_unix", "user_id"],
                "sortableAttributes": ["timestamp", "timestamp_unix"],
            }));
        check(settings.send().await?).await?;
        tracing::info!(index = %endpoint.index, "Search index ready");
        Ok(())
    }

    pub async fn index_command(&self, command: &Command) -> Result<(), SearchError> {
        let endpoint = self.endpoint()?;
        let request = endpoint
            .request(
                reqwest::Method::POST,
                &format!("/indexes/{}/documents", endpoint.index),
            )
            .json(&[CommandDocument::from(command)]);
        check(request.send().await?).await
    }

    pub async fn search(
        &self,
        query: &TenantQuery,
        limit: u32,
        offset: u32,
    ) -> Result<SearchHits, SearchError> {
        let endpoint = self.endpoint()?;
        let request = endpoint
            .request(
                reqwest::Method::POST,
                &format!("/indexes/{}/search", endpoint.index),
            )
            .json(&json!({
                "q": query.text().unwrap_or_default(),
                "filter": query.search_filters(),
                "limit": limit,
                "offset": offset,
                "sort": ["timestamp_unix:desc"],
            }));

        let response = check_response(request.send().await?).await?;
        let body: SearchResponse = response.json().await?;
        let total = body
            .total_hits
            .or(body.estimated_total_hits)
            .unwrap_or(body.hits.len() as i64);

        // The tenant filter is enforced by the index; re-check so a misconfigured
        // index can never leak another tenant's rows.
        let owner = query.scope().user_id();
        let commands = body
            .hits
            .into_iter()
            .filter(|c| c.user_id == owner)
            .collect();
        Ok(SearchHits { commands, total })
    }

    pub async fn delete_command(&self, id: Uuid) -> Result<(), SearchError> {
        let endpoint = self.endpoint()?;
        let request = endpoint.request(
            reqwest::Method::DELETE,
            &format!("/indexes/{}/documents/{}", endpoint.index, id),
        );
        check(request.send().await?).await
    }

    fn endpoint(&self) -> Result<&Endpoint, SearchError> {
        self.endpoint.as_ref().ok_or(SearchError::Disabled)
    }
}

impl Endpoint {
    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, SearchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SearchError::Status { status, body })
}

async fn check(response: reqwest::Response) -> Result<(), SearchError> {
    check_response(response).await.map(|_| ())
}
