//! API middleware
//!
//! Contains middleware for:
//! - Authentication (API key or session cookie)
//! - Authorization (admin role)
//! - CSRF verification for browser forms
//! - Security headers on every response
//!
//! plus the shared application state, the JSON error type and cookie helpers.

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::db::repositories::{
    SqlxApiKeyRepository, SqlxCommandRepository, SqlxHostRepository, SqlxTokenRepository,
    SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::User;
use crate::services::account::{AccountError, AccountService};
use crate::services::auth::{AuthContext, AuthError, Authenticator, Credentials};
use crate::services::csrf::{CsrfService, CSRF_FORM_FIELD, CSRF_HEADER};
use crate::services::email::EmailService;
use crate::services::flash::FlashService;
use crate::services::history::{HistoryError, HistoryService};
use crate::services::login::LoginService;
use crate::services::password::CredentialHasher;
use crate::services::rate_limiter::RateLimiter;
use crate::services::search::SearchIndex;
use crate::services::session::{SessionService, SESSION_COOKIE};
use crate::services::tenant::TenantScope;
use crate::templates::Templates;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Largest form body the CSRF check will buffer
const MAX_FORM_BYTES: usize = 64 * 1024;

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
    script-src 'self' 'unsafe-inline' https://unpkg.com; \
    style-src 'self' 'unsafe-inline' https://fonts.googleapis.com; \
    font-src 'self' https://fonts.gstatic.com; \
    img-src 'self' data:; \
    connect-src 'self'; \
    frame-ancestors 'none';";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub config: Arc<Config>,
    pub authenticator: Arc<Authenticator>,
    pub login: Arc<LoginService>,
    pub accounts: Arc<AccountService>,
    pub history: Arc<HistoryService>,
    pub limiter: Arc<RateLimiter>,
    pub sessions: SessionService,
    pub csrf: Arc<CsrfService>,
    pub flash: Arc<FlashService>,
    pub templates: Arc<Templates>,
}

impl AppState {
    /// Wire every service from configuration.
    pub fn new(
        config: Config,
        pool: DynDatabasePool,
        hasher: CredentialHasher,
        search: SearchIndex,
        templates: Templates,
    ) -> Self {
        let secret = config.security.secret_key.as_str();
        let sessions = SessionService::new(secret, config.security.session_expire_hours);
        let limiter = Arc::new(RateLimiter::new());
        let templates = Arc::new(templates);

        let users = SqlxUserRepository::boxed(pool.clone());
        let api_keys = SqlxApiKeyRepository::boxed(pool.clone());

        let authenticator = Authenticator::new(
            users.clone(),
            api_keys.clone(),
            sessions.clone(),
            hasher.clone(),
        );
        let login = LoginService::new(
            users.clone(),
            limiter.clone(),
            sessions.clone(),
            hasher.clone(),
            config.rate_limit.login,
        );
        let accounts = AccountService::new(
            users,
            api_keys,
            SqlxTokenRepository::boxed(pool.clone()),
            hasher,
            Arc::new(EmailService::new(config.smtp.clone())),
            templates.clone(),
        );
        let history = HistoryService::new(
            SqlxCommandRepository::boxed(pool.clone()),
            SqlxHostRepository::boxed(pool.clone()),
            Arc::new(search),
            limiter.clone(),
            config.rate_limit.command_ingest,
            pool.clone(),
        );

        Self {
            csrf: Arc::new(CsrfService::new(secret)),
            flash: Arc::new(FlashService::new(secret)),
            pool,
            authenticator: Arc::new(authenticator),
            login: Arc::new(login),
            accounts: Arc::new(accounts),
            history: Arc::new(history),
            limiter,
            sessions,
            templates,
            config: Arc::new(config),
        }
    }

    pub fn secure_cookies(&self) -> bool {
        self.config.security.secure_cookies
    }
}

/// Authenticated caller, inserted into request extensions by [`require_auth`]
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub AuthContext);

impl AuthenticatedUser {
    pub fn user(&self) -> &User {
        &self.0.user
    }

    pub fn scope(&self) -> TenantScope {
        TenantScope::of(&self.0.user)
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new("RATE_LIMITED", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::Validation(msg) => ApiError::validation_error(msg),
            AccountError::Conflict(msg) => ApiError::conflict(msg),
            AccountError::NotFound(msg) => ApiError::not_found(msg),
            AccountError::Internal(e) => {
                tracing::error!("Account operation failed: {:#}", e);
                ApiError::internal_error("Internal server error")
            }
        }
    }
}

impl From<HistoryError> for ApiError {
    fn from(e: HistoryError) -> Self {
        match e {
            HistoryError::Validation(msg) => ApiError::validation_error(msg),
            HistoryError::NotFound(msg) => ApiError::not_found(msg),
            HistoryError::Conflict(msg) => ApiError::conflict(msg),
            HistoryError::RateLimited => ApiError::rate_limited(e.to_string()),
            HistoryError::Internal(e) => {
                tracing::error!("History operation failed: {:#}", e);
                ApiError::internal_error("Internal server error")
            }
        }
    }
}

/// Read one cookie from the `Cookie` header.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// `Set-Cookie` value for an HttpOnly, SameSite=Lax cookie.
pub fn build_cookie(name: &str, value: &str, max_age_seconds: u64, secure: bool) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        name,
        value,
        max_age_seconds,
        if secure { "; Secure" } else { "" }
    )
}

pub fn clear_cookie(name: &str) -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", name)
}

/// Header map carrying one `Set-Cookie`.
pub fn set_cookie_header(cookie: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(cookie) {
        headers.append(header::SET_COOKIE, value);
    }
    headers
}

fn credentials(headers: &HeaderMap) -> Credentials {
    Credentials {
        api_key: headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        session_token: read_cookie(headers, SESSION_COOKIE),
    }
}

/// Browsers navigating to a page, as opposed to API clients and htmx calls
fn wants_html(headers: &HeaderMap) -> bool {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    accept.contains("text/html") && !accept.contains("application/json")
}

/// Where an unauthenticated browser should be sent, if anywhere
fn login_redirect(path: &str) -> Option<&'static str> {
    if path.starts_with("/admin") {
        Some("/admin/login")
    } else if path.starts_with("/account") || path.starts_with("/history") {
        Some("/login")
    } else {
        None
    }
}

/// Authentication middleware
///
/// Resolves the API key or session cookie and stores the caller as an
/// [`AuthenticatedUser`] extension.
pub async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let credentials = credentials(request.headers());
    match state.authenticator.resolve(&credentials).await {
        Ok(ctx) => {
            request.extensions_mut().insert(AuthenticatedUser(ctx));
            next.run(request).await
        }
        Err(AuthError::Unauthorized(reason)) => {
            if wants_html(request.headers()) {
                if let Some(target) = login_redirect(request.uri().path()) {
                    return Redirect::to(target).into_response();
                }
            }
            ApiError::unauthorized(reason.to_string()).into_response()
        }
        Err(AuthError::Storage(e)) => {
            tracing::error!("Authentication lookup failed: {:#}", e);
            ApiError::internal_error("Internal server error").into_response()
        }
    }
}

/// Admin authorization middleware
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.user().is_admin() {
        return Err(ApiError::forbidden("Admin access required"));
    }

    Ok(next.run(request).await)
}

/// CSRF middleware for browser routes
///
/// State-changing requests need a valid token in the `X-CSRF-Token` header or
/// the `csrf_token` form field. JSON API paths and requests carrying an API
/// key are exempt: a cross-site form can set neither.
pub async fn require_csrf(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let exempt = matches!(
        *request.method(),
        Method::GET | Method::HEAD | Method::OPTIONS
    ) || request.uri().path().starts_with("/api/")
        || request
            .headers()
            .get(API_KEY_HEADER)
            .is_some_and(|v| !v.is_empty());
    if exempt {
        return Ok(next.run(request).await);
    }

    let header_token = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let (request, token) = match header_token {
        Some(token) => (request, Some(token)),
        None => form_token(request).await?,
    };

    if !state.csrf.verify_token(token.as_deref()) {
        tracing::warn!(path = %request.uri().path(), "Rejected request with invalid CSRF token");
        return Err(ApiError::forbidden("Invalid or missing CSRF token"));
    }
    Ok(next.run(request).await)
}

/// Pull the token out of a url-encoded form body, handing the body back intact.
async fn form_token(request: Request) -> Result<(Request, Option<String>), ApiError> {
    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));
    if !is_form {
        return Ok((request, None));
    }

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_FORM_BYTES)
        .await
        .map_err(|_| ApiError::validation_error("Request body too large"))?;
    let token = form_field(&bytes, CSRF_FORM_FIELD);
    Ok((Request::from_parts(parts, Body::from(bytes)), token))
}

fn form_field(body: &[u8], name: &str) -> Option<String> {
    serde_urlencoded::from_bytes::<HashMap<String, String>>(body)
        .ok()?
        .remove(name)
}

/// Add the security headers to every response.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("x-xss-protection", "1; mode=block"),
        ("referrer-policy", "strict-origin-when-cross-origin"),
        ("content-security-policy", CONTENT_SECURITY_POLICY),
    ] {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    response
}

/// Client address for rate limiting
///
/// `X-Forwarded-For` (first hop), then `X-Real-IP`, then the socket peer.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientIp(extract_client_ip(&parts.headers, peer)))
    }
}

pub fn extract_client_ip(headers: &HeaderMap, peer: Option<String>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(forwarded) = header("x-forwarded-for") {
        if let Some(first) = forwarded.split(',').next() {
            return first.trim().to_string();
        }
    }
    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }
    peer.unwrap_or_else(|| "unknown".to_string())
}

/// Scheme and host the request was addressed to, for links in e-mails
pub fn base_url(headers: &HeaderMap, secure: bool) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = if secure { "https" } else { "http" };
    format!("{}://{}", scheme, host)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(HeaderName::from_static(name), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_read_cookie() {
        let map = headers(&[("cookie", "flash=abc; session=tok.en.sig ; theme=dark")]);
        assert_eq!(read_cookie(&map, "session").as_deref(), Some("tok.en.sig"));
        assert_eq!(read_cookie(&map, "flash").as_deref(), Some("abc"));
        assert!(read_cookie(&map, "sess").is_none());
        assert!(read_cookie(&HeaderMap::new(), "session").is_none());
    }

    #[test]
    fn test_build_cookie() {
        let cookie = build_cookie("session", "v", 86_400, false);
        assert_eq!(cookie, "session=v; Path=/; HttpOnly; SameSite=Lax; Max-Age=86400");
        assert!(build_cookie("session", "v", 1, true).ends_with("; Secure"));
        assert!(clear_cookie("session").contains("Max-Age=0"));
    }

    #[test]
    fn test_credentials_from_headers() {
        let map = headers(&[("x-api-key", "key-1"), ("cookie", "session=s1")]);
        let creds = credentials(&map);
        assert_eq!(creds.api_key.as_deref(), Some("key-1"));
        assert_eq!(creds.session_token.as_deref(), Some("s1"));
    }

    #[test]
    fn test_extract_client_ip() {
        let forwarded = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1"), ("x-real-ip", "10.0.0.2")]);
        assert_eq!(extract_client_ip(&forwarded, Some("127.0.0.1".into())), "203.0.113.7");

        let real = headers(&[("x-real-ip", " 10.0.0.2 ")]);
        assert_eq!(extract_client_ip(&real, None), "10.0.0.2");

        assert_eq!(extract_client_ip(&HeaderMap::new(), Some("127.0.0.1".into())), "127.0.0.1");
        assert_eq!(extract_client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_wants_html() {
        assert!(wants_html(&headers(&[("accept", "text/html,application/xhtml+xml")])));
        assert!(!wants_html(&headers(&[("accept", "application/json, text/html")])));
        assert!(!wants_html(&headers(&[("accept", "*/*")])));
    }

    #[test]
    fn test_login_redirect_targets() {
        assert_eq!(login_redirect("/admin"), Some("/admin/login"));
        assert_eq!(login_redirect("/admin/users/new"), Some("/admin/login"));
        assert_eq!(login_redirect("/account"), Some("/login"));
        assert_eq!(login_redirect("/history"), Some("/login"));
        assert_eq!(login_redirect("/api/v1/commands"), None);
    }

    #[test]
    fn test_form_field() {
        let body = b"username=alice&csrf_token=abc.def-_&note=a+b%21";
        assert_eq!(form_field(body, "csrf_token").as_deref(), Some("abc.def-_"));
        assert_eq!(form_field(body, "note").as_deref(), Some("a b!"));
        assert!(form_field(body, "missing").is_none());
    }

    #[test]
    fn test_form_field_decodes_reserved_characters() {
        let body = b"csrf_token=a%2Bb%3D%26c&plus=1+2%2B3";
        assert_eq!(form_field(body, "csrf_token").as_deref(), Some("a+b=&c"));
        assert_eq!(form_field(body, "plus").as_deref(), Some("1 2+3"));
        assert!(form_field(b"\xff\xfe=1", "csrf_token").is_none());
    }

    #[test]
    fn test_api_error_status() {
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::rate_limited("x").status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::new("SOMETHING", "x").status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = serde_json::to_value(ApiError::not_found("Command not found")).unwrap();
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "Command not found");
    }

    #[tokio::test]
    async fn test_csrf_form_body_reaches_handler() {
        use axum::{routing::post, Router};
        use tower::ServiceExt;

        let state = crate::api::test_support::test_state().await;
        let token = state.csrf.generate_token();
        let app = Router::new()
            .route("/echo", post(|body: String| async move { body }))
            .route_layer(axum::middleware::from_fn_with_state(state.clone(), require_csrf))
            .with_state(state);

        let body = format!("name=laptop&csrf_token={}", token);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.clone()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let echoed = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(echoed, body.as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("name=laptop"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_history_error_mapping() {
        let err: ApiError = HistoryError::RateLimited.into();
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        let err: ApiError = AccountError::Conflict("User already exists".into()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
