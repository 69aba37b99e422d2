//! Browser pages
//!
//! Server-rendered pages for signing in, managing the account and browsing
//! history. State-changing requests pass the CSRF layer before reaching these
//! handlers; partial responses are swapped in by htmx.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{delete, get, post},
    Extension, Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tera::Context as TeraContext;
use uuid::Uuid;

use crate::api::commands::{empty_as_none, CommandQuery};
use crate::api::middleware::{
    base_url, build_cookie, clear_cookie, read_cookie, set_cookie_header, ApiError, AppState,
    AuthenticatedUser, ClientIp,
};
use crate::models::User;
use crate::services::account::AccountError;
use crate::services::flash::FLASH_COOKIE;
use crate::services::history::MAX_PAGE_SIZE;
use crate::services::login::{LoginOutcome, LoginPortal};
use crate::services::session::SESSION_COOKIE;

const RESET_REQUESTED: &str = "If that email address exists, a password reset link has been sent.";

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct LoginPageQuery {
    #[serde(default)]
    reset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountQuery {
    #[serde(default)]
    email_verified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiKeyForm {
    #[serde(default, deserialize_with = "empty_as_none")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangeEmailForm {
    new_email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct ChangePasswordForm {
    current_password: String,
    new_password: String,
    confirm_password: String,
}

#[derive(Debug, Deserialize)]
struct ForgotPasswordForm {
    email: String,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResetPasswordForm {
    token: String,
    password: String,
}

/// Pages anyone can reach
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(|| async { Redirect::to("/history") }))
        .route("/health", get(health))
        .route("/login", get(login_page).post(login))
        .route("/logout", post(logout))
        .route("/forgot-password", get(forgot_password_page).post(forgot_password))
        .route("/reset-password", get(reset_password_page).post(reset_password))
        .route("/verify-email", get(verify_email))
}

/// Pages that need a signed-in user
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/account", get(account_page))
        .route("/account/api-keys", post(create_api_key))
        .route("/account/api-keys/{id}/revoke", post(revoke_api_key))
        .route("/account/change-email", post(change_email))
        .route("/account/change-password", post(change_password))
        .route("/history", get(history_page))
        .route("/ui/search", get(search_partial))
        .route("/ui/commands/{id}", delete(delete_command))
}

/// Context every page starts from: a fresh CSRF token and the signed-in user.
pub(crate) fn page_context(state: &AppState, user: Option<&User>) -> TeraContext {
    let mut ctx = TeraContext::new();
    ctx.insert("csrf_token", &state.csrf.generate_token());
    if let Some(user) = user {
        ctx.insert("current_user", user);
    }
    ctx
}

pub(crate) fn render(state: &AppState, template: &str, ctx: &TeraContext, status: StatusCode) -> Response {
    match state.templates.render(template, ctx) {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            tracing::error!("{}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

pub(crate) fn render_error(state: &AppState, status: StatusCode, message: &str) -> Response {
    let mut ctx = page_context(state, None);
    ctx.insert("status", &status.as_u16());
    ctx.insert("message", message);
    render(state, "error.html", &ctx, status)
}

/// Run a login attempt from either portal and answer with a redirect or the
/// re-rendered form.
pub(crate) async fn handle_login(
    state: &AppState,
    portal: LoginPortal,
    client_ip: &str,
    form: LoginForm,
    template: &str,
    success_url: &str,
) -> Response {
    let outcome = state
        .login
        .attempt_login(portal, client_ip, &form.username, &form.password)
        .await;

    let (status, error) = match outcome {
        Ok(LoginOutcome::Success(session)) => {
            let cookie = build_cookie(
                SESSION_COOKIE,
                &session.token,
                session.max_age_seconds,
                state.secure_cookies(),
            );
            return (set_cookie_header(&cookie), Redirect::to(success_url)).into_response();
        }
        Ok(LoginOutcome::RateLimited) => (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many login attempts. Please try again in 15 minutes.",
        ),
        Ok(LoginOutcome::InvalidCredentials) => {
            (StatusCode::UNAUTHORIZED, "Invalid username or password")
        }
        Ok(LoginOutcome::RoleDenied) => (StatusCode::FORBIDDEN, "Admin access required"),
        Ok(LoginOutcome::AccountInactive) => (StatusCode::FORBIDDEN, "Account is inactive"),
        Err(e) => {
            tracing::error!("Login failed: {:#}", e);
            return render_error(state, StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };

    let mut ctx = page_context(state, None);
    ctx.insert("error", error);
    ctx.insert("username", &form.username);
    render(state, template, &ctx, status)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// GET /login
async fn login_page(State(state): State<AppState>, Query(query): Query<LoginPageQuery>) -> Response {
    let mut ctx = page_context(&state, None);
    if query.reset.as_deref() == Some("success") {
        ctx.insert("message", "Your password has been reset. Please log in.");
    }
    render(&state, "login.html", &ctx, StatusCode::OK)
}

/// POST /login
async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Form(form): Form<LoginForm>,
) -> Response {
    handle_login(&state, LoginPortal::User, &ip, form, "login.html", "/account").await
}

/// POST /logout
async fn logout() -> Response {
    (set_cookie_header(&clear_cookie(SESSION_COOKIE)), Redirect::to("/login")).into_response()
}

/// GET /account
async fn account_page(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(query): Query<AccountQuery>,
) -> Result<Response, ApiError> {
    let keys: Vec<_> = state
        .accounts
        .list_api_keys(auth.scope())
        .await?
        .into_iter()
        .filter(|k| k.is_active)
        .collect();

    let mut ctx = page_context(&state, Some(auth.user()));
    ctx.insert("user", auth.user());
    ctx.insert("api_keys", &keys);
    ctx.insert("email_verified", &(query.email_verified.as_deref() == Some("true")));
    Ok(render(&state, "account.html", &ctx, StatusCode::OK))
}

/// POST /account/api-keys
async fn create_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Form(form): Form<ApiKeyForm>,
) -> Result<Response, ApiError> {
    let issued = state
        .accounts
        .create_api_key(auth.scope(), form.name.as_deref())
        .await?;

    let mut ctx = TeraContext::new();
    ctx.insert("api_key", &issued.record);
    ctx.insert("plaintext", &issued.plaintext);
    Ok(render(&state, "partials/api_key_item.html", &ctx, StatusCode::OK))
}

/// POST /account/api-keys/{id}/revoke
///
/// Answers with an empty body so htmx drops the list item.
async fn revoke_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Html<&'static str>, ApiError> {
    state.accounts.revoke_api_key(auth.scope(), id).await?;
    Ok(Html(""))
}

/// POST /account/change-email
async fn change_email(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    Form(form): Form<ChangeEmailForm>,
) -> Result<Response, ApiError> {
    let base = base_url(&headers, state.secure_cookies());
    let result = state
        .accounts
        .request_email_change(auth.user(), &form.new_email, &form.password, &base)
        .await;

    let mut ctx = TeraContext::new();
    let status = match result {
        Ok(()) => {
            ctx.insert(
                "email_form_message",
                &format!(
                    "Verification email sent to {}. Please check your inbox.",
                    form.new_email.trim()
                ),
            );
            StatusCode::OK
        }
        Err(AccountError::Validation(msg) | AccountError::Conflict(msg)) => {
            ctx.insert("email_form_error", &msg);
            StatusCode::BAD_REQUEST
        }
        Err(e) => return Err(e.into()),
    };
    Ok(render(&state, "partials/change_email_form.html", &ctx, status))
}

/// POST /account/change-password
async fn change_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Form(form): Form<ChangePasswordForm>,
) -> Result<Response, ApiError> {
    let result = state
        .accounts
        .change_password(
            auth.user(),
            &form.current_password,
            &form.new_password,
            &form.confirm_password,
        )
        .await;

    let mut ctx = TeraContext::new();
    let status = match result {
        Ok(()) => {
            ctx.insert("password_form_message", "Password updated successfully.");
            StatusCode::OK
        }
        Err(AccountError::Validation(msg)) => {
            ctx.insert("password_form_error", &msg);
            StatusCode::BAD_REQUEST
        }
        Err(e) => return Err(e.into()),
    };
    Ok(render(&state, "partials/change_password_form.html", &ctx, status))
}

/// GET /forgot-password
async fn forgot_password_page(State(state): State<AppState>) -> Response {
    render(&state, "forgot_password.html", &page_context(&state, None), StatusCode::OK)
}

/// POST /forgot-password
///
/// Always reports success so the form cannot be used to probe addresses.
async fn forgot_password(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    Form(form): Form<ForgotPasswordForm>,
) -> Response {
    let mut ctx = page_context(&state, None);

    let decision = state
        .limiter
        .check(&format!("forgot_password:{}", ip), state.config.rate_limit.password_reset)
        .await;
    if !decision.allowed {
        ctx.insert("error", "Too many password reset requests. Please try again later.");
        return render(&state, "forgot_password.html", &ctx, StatusCode::TOO_MANY_REQUESTS);
    }

    let base = base_url(&headers, state.secure_cookies());
    if let Err(e) = state.accounts.request_password_reset(&form.email, &base).await {
        tracing::error!("Password reset request failed: {}", e);
    }
    ctx.insert("message", RESET_REQUESTED);
    render(&state, "forgot_password.html", &ctx, StatusCode::OK)
}

/// GET /reset-password
async fn reset_password_page(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    let token = query.token.unwrap_or_default();
    let mut ctx = page_context(&state, None);
    if !state.accounts.reset_token_is_valid(&token).await? {
        ctx.insert("error", crate::services::account::INVALID_RESET_TOKEN);
        return Ok(render(&state, "reset_password.html", &ctx, StatusCode::BAD_REQUEST));
    }
    ctx.insert("token", &token);
    Ok(render(&state, "reset_password.html", &ctx, StatusCode::OK))
}

/// POST /reset-password
async fn reset_password(
    State(state): State<AppState>,
    Form(form): Form<ResetPasswordForm>,
) -> Result<Response, ApiError> {
    match state.accounts.reset_password(&form.token, &form.password).await {
        Ok(()) => Ok(Redirect::to("/login?reset=success").into_response()),
        Err(AccountError::Validation(msg)) => {
            let mut ctx = page_context(&state, None);
            ctx.insert("error", &msg);
            ctx.insert("token", &form.token);
            Ok(render(&state, "reset_password.html", &ctx, StatusCode::BAD_REQUEST))
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /verify-email
async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    let token = query.token.unwrap_or_default();
    match state.accounts.verify_email(&token).await {
        Ok(()) => Ok(Redirect::to("/account?email_verified=true").into_response()),
        Err(AccountError::Validation(msg) | AccountError::Conflict(msg)) => {
            let mut ctx = page_context(&state, None);
            ctx.insert("error", &msg);
            Ok(render(&state, "account.html", &ctx, StatusCode::BAD_REQUEST))
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /history
async fn history_page(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(params): Query<CommandQuery>,
) -> Result<Response, ApiError> {
    let scope = auth.scope();
    let query = params.to_tenant_query(scope)?;
    let result = state
        .history
        .search(&query, params.page, params.page_size)
        .await?;
    let hosts = state
        .history
        .list_hosts(scope, false, 0, MAX_PAGE_SIZE)
        .await?;

    let mut ctx = page_context(&state, Some(auth.user()));
    ctx.insert("hosts", &hosts.items);
    ctx.insert(
        "filters",
        &json!({
            "q": params.q,
            "hostname": params.hostname,
            "username": params.username,
            "exit_code": params.exit_code,
            "start_date": params.start_date,
            "end_date": params.end_date,
        }),
    );
    ctx.insert("result", &result);
    ctx.insert("query_string", &filter_query_string(&params));
    Ok(render(&state, "history.html", &ctx, StatusCode::OK))
}

/// GET /ui/search
async fn search_partial(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(params): Query<CommandQuery>,
) -> Result<Response, ApiError> {
    let query = params.to_tenant_query(auth.scope())?;
    let result = state
        .history
        .search(&query, params.page, params.page_size)
        .await?;

    let mut ctx = TeraContext::new();
    ctx.insert("result", &result);
    ctx.insert("query_string", &filter_query_string(&params));
    Ok(render(&state, "partials/command_list.html", &ctx, StatusCode::OK))
}

/// DELETE /ui/commands/{id}
async fn delete_command(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> Result<Html<&'static str>, ApiError> {
    state.history.delete(auth.scope(), id).await?;
    Ok(Html(""))
}

/// The active filters as a query string, without the page number, for the
/// pagination links.
fn filter_query_string(params: &CommandQuery) -> String {
    [
        ("q", &params.q),
        ("hostname", &params.hostname),
        ("username", &params.username),
        ("exit_code", &params.exit_code),
        ("start_date", &params.start_date),
        ("end_date", &params.end_date),
    ]
    .into_iter()
    .filter_map(|(key, value)| {
        value
            .as_deref()
            .map(|v| format!("{}={}", key, urlencoding::encode(v)))
    })
    .chain(std::iter::once(format!("page_size={}", params.page_size)))
    .collect::<Vec<_>>()
    .join("&")
}

/// Read and clear the flash cookie.
pub(crate) fn take_flash(state: &AppState, headers: &HeaderMap, ctx: &mut TeraContext) -> Option<String> {
    let cookie = read_cookie(headers, FLASH_COOKIE)?;
    if let Some(flash) = state.flash.get_flash(Some(&cookie)) {
        ctx.insert("flash", &flash);
    }
    Some(clear_cookie(FLASH_COOKIE))
}
