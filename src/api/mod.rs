//! API layer - HTTP handlers and routing
//!
//! This module contains every HTTP endpoint of the collector:
//! - JSON API under `/api/v1` (commands, hosts, users, stats)
//! - Browser pages (login, account, history)
//! - Admin pages (user management)

pub mod admin;
pub mod commands;
pub mod hosts;
pub mod middleware;
pub mod stats;
pub mod ui;
pub mod users;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::services::csrf::CSRF_HEADER;

pub use middleware::{ApiError, AppState, AuthenticatedUser};

/// Build the JSON API router (mounted at `/api/v1`)
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Admin routes (need admin role)
    let admin_routes = users::admin_router()
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .merge(commands::router())
        .merge(hosts::router())
        .merge(users::router())
        .merge(stats::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_auth,
        ))
        .merge(admin_routes)
}

/// Build the browser-facing router
pub fn build_ui_router(state: AppState) -> Router<AppState> {
    let admin_pages = admin::router()
        .route_layer(axum_middleware::from_fn(middleware::require_admin))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    let protected_pages = ui::protected_router().route_layer(axum_middleware::from_fn_with_state(
        state.clone(),
        middleware::require_auth,
    ));

    Router::new()
        .merge(ui::public_router())
        .merge(admin::public_router())
        .merge(protected_pages)
        .merge(admin_pages)
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_csrf,
        ))
}

/// CORS for the configured origins; `None` when no origin is configured.
fn cors_layer(config: &ServerConfig) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                HeaderName::from_static(middleware::API_KEY_HEADER),
                HeaderName::from_static(CSRF_HEADER),
            ])
            .allow_credentials(config.cors_allow_credentials),
    )
}

async fn not_found() -> ApiError {
    ApiError::not_found("Not found")
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .merge(build_ui_router(state.clone()))
        .fallback(not_found)
        .layer(axum_middleware::from_fn(middleware::security_headers));

    if let Some(cors) = cors_layer(&state.config.server) {
        router = router.layer(cors);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::Config;
    use crate::db::{create_test_pool, migrations};
    use crate::models::{User, UserRole};
    use crate::services::password::test_hasher;
    use crate::services::search::SearchIndex;
    use crate::templates::Templates;

    pub async fn test_state() -> AppState {
        let pool = create_test_pool().await.expect("Failed to create pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        AppState::new(
            Config::default(),
            pool,
            test_hasher(),
            SearchIndex::disabled(),
            Templates::load().expect("templates"),
        )
    }

    /// A user with password `password123` and the plaintext of its first key
    pub async fn user_with_key(state: &AppState, username: &str, role: UserRole) -> (User, String) {
        let (user, key) = state
            .accounts
            .create_user(
                username,
                &format!("{}@example.com", username),
                Some("password123"),
                role,
            )
            .await
            .expect("Failed to create user");
        (user, key.plaintext)
    }
}
