//! User endpoints
//!
//! Any caller:
//! - GET /api/v1/users/me
//! - POST /api/v1/users/me/api-key/regenerate
//!
//! Admin only:
//! - GET /api/v1/users
//! - GET /api/v1/users/{id}
//! - POST /api/v1/users

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{PagedResult, User, UserRole};
use crate::services::account::UserSummary;
use crate::services::history::DEFAULT_PAGE_SIZE;

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// A user together with a key that will not be shown again
#[derive(Debug, Serialize)]
pub struct UserWithKey<T: Serialize> {
    #[serde(flatten)]
    pub user: T,
    pub api_key: String,
}

/// Routes available to every authenticated caller
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_me))
        .route("/users/me/api-key/regenerate", post(regenerate_my_key))
}

/// Routes that sit behind the admin check
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", get(get_user))
}

/// GET /api/v1/users/me
async fn get_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<UserSummary>, ApiError> {
    let summary = state.accounts.summarize(auth.user().clone()).await?;
    Ok(Json(summary))
}

/// POST /api/v1/users/me/api-key/regenerate
async fn regenerate_my_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<UserWithKey<UserSummary>>, ApiError> {
    let (user, key) = state.accounts.regenerate_api_key(auth.user().id).await?;
    Ok(Json(UserWithKey {
        user: UserSummary {
            user,
            has_api_key: true,
        },
        api_key: key.plaintext,
    }))
}

/// GET /api/v1/users
async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<ListUsersQuery>,
) -> Result<Json<PagedResult<UserSummary>>, ApiError> {
    let users = state
        .accounts
        .list_users(params.page, params.page_size)
        .await?;
    Ok(Json(users))
}

/// GET /api/v1/users/{id}
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.accounts.get_user(id).await?))
}

/// POST /api/v1/users
async fn create_user(
    State(state): State<AppState>,
    Json(input): Json<CreateUserRequest>,
) -> Result<Json<UserWithKey<User>>, ApiError> {
    let role = match input.role.as_deref().filter(|r| !r.is_empty()) {
        Some(role) => role
            .parse::<UserRole>()
            .map_err(|e| ApiError::validation_error(e.to_string()))?,
        None => UserRole::default(),
    };

    let (user, key) = state
        .accounts
        .create_user(&input.username, &input.email, input.password.as_deref(), role)
        .await?;
    Ok(Json(UserWithKey {
        user,
        api_key: key.plaintext,
    }))
}
