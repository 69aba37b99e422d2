//! Host endpoints
//!
//! - GET /api/v1/hosts - List the caller's hosts
//! - POST /api/v1/hosts - Register a host
//! - GET /api/v1/hosts/{id} - Get one host
//! - PUT /api/v1/hosts/{id}/deactivate - Stop listing a host as active

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::commands::MessageResponse;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{Host, NewHost, PagedResult};
use crate::services::history::DEFAULT_PAGE_SIZE;

#[derive(Debug, Deserialize)]
pub struct ListHostsQuery {
    #[serde(default)]
    pub active_only: bool,
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// Build the hosts router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/hosts", get(list_hosts).post(create_host))
        .route("/hosts/{id}", get(get_host))
        .route("/hosts/{id}/deactivate", put(deactivate_host))
}

/// GET /api/v1/hosts
async fn list_hosts(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(params): Query<ListHostsQuery>,
) -> Result<Json<PagedResult<Host>>, ApiError> {
    let hosts = state
        .history
        .list_hosts(auth.scope(), params.active_only, params.page, params.page_size)
        .await?;
    Ok(Json(hosts))
}

/// POST /api/v1/hosts
async fn create_host(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(input): Json<NewHost>,
) -> Result<Json<Host>, ApiError> {
    Ok(Json(state.history.create_host(auth.scope(), input).await?))
}

/// GET /api/v1/hosts/{id}
async fn get_host(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Host>, ApiError> {
    Ok(Json(state.history.get_host(auth.scope(), id).await?))
}

/// PUT /api/v1/hosts/{id}/deactivate
async fn deactivate_host(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.history.deactivate_host(auth.scope(), id).await?;
    Ok(Json(MessageResponse::new("Host deactivated")))
}
