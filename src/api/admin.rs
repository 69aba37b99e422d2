//! Admin pages
//!
//! - GET|POST /admin/login, POST /admin/logout
//! - GET /admin - User list
//! - GET|POST /admin/users/new - Create a user
//! - POST /admin/users/{id}/toggle - Activate or deactivate a user
//! - POST /admin/users/{id}/regenerate-key - Replace a user's API keys
//!
//! New API keys are handed to the admin once, through the flash cookie.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Extension, Form, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::{
    build_cookie, clear_cookie, set_cookie_header, ApiError, AppState, AuthenticatedUser,
    ClientIp,
};
use crate::api::ui::{handle_login, page_context, render, take_flash, LoginForm};
use crate::models::UserRole;
use crate::services::account::AccountError;
use crate::services::flash::{FLASH_COOKIE, FLASH_MAX_AGE_SECONDS};
use crate::services::history::DEFAULT_PAGE_SIZE;
use crate::services::login::LoginPortal;
use crate::services::session::SESSION_COOKIE;

#[derive(Debug, Deserialize)]
struct DashboardQuery {
    #[serde(default)]
    page: u32,
}

#[derive(Debug, Deserialize)]
struct NewUserForm {
    username: String,
    email: String,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

/// Sign-in pages for the admin portal
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/admin/login", get(login_page).post(login))
        .route("/admin/logout", post(logout))
}

/// Pages behind the admin check
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin", get(dashboard))
        .route("/admin/users/new", get(new_user_page).post(create_user))
        .route("/admin/users/{id}/toggle", post(toggle_user))
        .route("/admin/users/{id}/regenerate-key", post(regenerate_key))
}

/// Redirect to the dashboard carrying a one-shot message.
fn redirect_with_flash(state: &AppState, message: &str, category: &str) -> Response {
    let flash = state.flash.set_flash(message, category);
    let cookie = build_cookie(FLASH_COOKIE, &flash, FLASH_MAX_AGE_SECONDS, state.secure_cookies());
    (set_cookie_header(&cookie), Redirect::to("/admin")).into_response()
}

/// GET /admin/login
async fn login_page(State(state): State<AppState>) -> Response {
    render(&state, "admin/login.html", &page_context(&state, None), StatusCode::OK)
}

/// POST /admin/login
async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Form(form): Form<LoginForm>,
) -> Response {
    handle_login(&state, LoginPortal::Admin, &ip, form, "admin/login.html", "/admin").await
}

/// POST /admin/logout
async fn logout() -> Response {
    (set_cookie_header(&clear_cookie(SESSION_COOKIE)), Redirect::to("/admin/login")).into_response()
}

/// GET /admin
async fn dashboard(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(query): Query<DashboardQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let users = state
        .accounts
        .list_users(query.page, DEFAULT_PAGE_SIZE)
        .await?;

    let mut ctx = page_context(&state, Some(auth.user()));
    let clear_flash = take_flash(&state, &headers, &mut ctx);
    ctx.insert("users", &users.items);
    ctx.insert("total", &users.total);
    ctx.insert("page", &users.page);
    ctx.insert("has_more", &users.has_more);

    let page = render(&state, "admin/dashboard.html", &ctx, StatusCode::OK);
    Ok(match clear_flash {
        Some(cookie) => (set_cookie_header(&cookie), page).into_response(),
        None => page,
    })
}

/// GET /admin/users/new
async fn new_user_page(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Response {
    render(
        &state,
        "admin/user_form.html",
        &page_context(&state, Some(auth.user())),
        StatusCode::OK,
    )
}

/// POST /admin/users/new
async fn create_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Form(form): Form<NewUserForm>,
) -> Result<Response, ApiError> {
    let role = UserRole::parse_or_default(form.role.as_deref().unwrap_or_default());
    let result = state
        .accounts
        .create_user(&form.username, &form.email, form.password.as_deref(), role)
        .await;

    match result {
        Ok((user, key)) => Ok(redirect_with_flash(
            &state,
            &format!(
                "User '{}' created successfully. API Key: {}",
                user.username, key.plaintext
            ),
            "success",
        )),
        Err(AccountError::Validation(msg) | AccountError::Conflict(msg)) => {
            let mut ctx = page_context(&state, Some(auth.user()));
            ctx.insert("error", &msg);
            ctx.insert("username", &form.username);
            ctx.insert("email", &form.email);
            Ok(render(&state, "admin/user_form.html", &ctx, StatusCode::BAD_REQUEST))
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /admin/users/{id}/toggle
async fn toggle_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    match state.accounts.toggle_active(auth.user(), id).await {
        Ok(_) => Ok(Redirect::to("/admin").into_response()),
        Err(AccountError::Validation(msg)) => Ok(redirect_with_flash(&state, &msg, "error")),
        Err(e) => Err(e.into()),
    }
}

/// POST /admin/users/{id}/regenerate-key
async fn regenerate_key(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let (user, key) = state.accounts.regenerate_api_key(id).await?;
    Ok(redirect_with_flash(
        &state,
        &format!(
            "API key regenerated for '{}'. New API Key: {}",
            user.username, key.plaintext
        ),
        "success",
    ))
}
