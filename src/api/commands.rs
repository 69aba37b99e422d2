//! Command history endpoints
//!
//! - POST /api/v1/commands - Ingest one command, reporting the caller's
//!   remaining ingestion budget in `X-RateLimit-*` headers
//! - GET /api/v1/commands - Search the caller's history
//! - GET /api/v1/commands/{id} - Get one command
//! - DELETE /api/v1/commands/{id} - Delete one command

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue},
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{Command, NewCommand, PagedResult};
use crate::services::history::DEFAULT_PAGE_SIZE;
use crate::services::tenant::{CommandFilter, TenantQuery, TenantScope};

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Search parameters shared by the JSON API and the history page
#[derive(Debug, Deserialize)]
pub struct CommandQuery {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub q: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub hostname: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub exit_code: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub start_date: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// Blank form fields arrive as `""`; treat them as absent.
pub(crate) fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
}

impl CommandQuery {
    /// Turn the raw parameters into a query confined to `scope`.
    pub fn to_tenant_query(&self, scope: TenantScope) -> Result<TenantQuery, ApiError> {
        let start = self
            .start_date
            .as_deref()
            .map(|v| parse_date(v, false))
            .transpose()?;
        let end = self
            .end_date
            .as_deref()
            .map(|v| parse_date(v, true))
            .transpose()?;

        Ok(TenantQuery::new(
            scope,
            self.q.clone(),
            CommandFilter {
                hostname: self.hostname.clone(),
                username: self.username.clone(),
                exit_code: self.exit_code.clone(),
                start,
                end,
            },
        ))
    }
}

/// Accept RFC 3339 timestamps or plain `YYYY-MM-DD` dates. A plain end date
/// covers the whole day.
pub fn parse_date(value: &str, end_of_day: bool) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ApiError::validation_error(format!("Invalid date: {}", value)))?;
    let start = date.and_time(NaiveTime::MIN).and_utc();
    Ok(if end_of_day {
        start + Duration::days(1) - Duration::microseconds(1)
    } else {
        start
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Build the commands router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/commands", get(search_commands).post(ingest_command))
        .route("/commands/{id}", get(get_command).delete(delete_command))
}

/// POST /api/v1/commands
async fn ingest_command(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(input): Json<NewCommand>,
) -> Result<(HeaderMap, Json<Command>), ApiError> {
    let scope = auth.scope();
    let command = state.history.ingest(scope, input).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        RATE_LIMIT_LIMIT_HEADER,
        HeaderValue::from(state.history.ingest_policy().max_requests),
    );
    headers.insert(
        RATE_LIMIT_REMAINING_HEADER,
        HeaderValue::from(state.history.ingest_budget(scope).await),
    );
    Ok((headers, Json(command)))
}

/// GET /api/v1/commands
async fn search_commands(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(params): Query<CommandQuery>,
) -> Result<Json<PagedResult<Command>>, ApiError> {
    let query = params.to_tenant_query(auth.scope())?;
    let result = state
        .history
        .search(&query, params.page, params.page_size)
        .await?;
    Ok(Json(result))
}

/// GET /api/v1/commands/{id}
async fn get_command(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Command>, ApiError> {
    Ok(Json(state.history.get(auth.scope(), id).await?))
}

/// DELETE /api/v1/commands/{id}
async fn delete_command(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.history.delete(auth.scope(), id).await?;
    Ok(Json(MessageResponse::new("Command deleted successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_plain_dates() {
        let start = parse_date("2024-03-05", false).unwrap();
        assert_eq!((start.year(), start.month(), start.day()), (2024, 3, 5));
        assert_eq!((start.hour(), start.minute()), (0, 0));

        let end = parse_date("2024-03-05", true).unwrap();
        assert_eq!(end.day(), 5);
        assert_eq!((end.hour(), end.minute(), end.second()), (23, 59, 59));
    }

    #[test]
    fn test_parse_rfc3339() {
        let ts = parse_date("2024-03-05T10:30:00+02:00", true).unwrap();
        assert_eq!(ts.hour(), 8);
        assert_eq!(ts.minute(), 30);
    }

    #[test]
    fn test_parse_invalid_date() {
        let err = parse_date("yesterday", false).unwrap_err();
        assert_eq!(err.error.code, "VALIDATION_ERROR");
    }

    #[test]
    fn test_blank_fields_are_absent() {
        let params: CommandQuery =
            parse_query("q=&hostname=web-1&exit_code=&page=2").unwrap();
        assert!(params.q.is_none());
        assert_eq!(params.hostname.as_deref(), Some("web-1"));
        assert!(params.exit_code.is_none());
        assert_eq!(params.page, 2);
        assert_eq!(params.page_size, DEFAULT_PAGE_SIZE);
    }

    fn parse_query(query: &str) -> Result<CommandQuery, String> {
        let uri: axum::http::Uri = format!("/commands?{}", query).parse().unwrap();
        Query::<CommandQuery>::try_from_uri(&uri)
            .map(|Query(q)| q)
            .map_err(|e| e.to_string())
    }
}
