//! shellhist - A multi-tenant shell history collector

use anyhow::Result;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shellhist::{
    api::{self, AppState},
    config::Config,
    db,
    services::{password::CredentialHasher, search::SearchIndex},
    templates::Templates,
};

/// Seconds between sweeps of idle rate-limit keys
const LIMITER_CLEANUP_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shellhist=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting shellhist...");

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yml"));
    let config = Config::load_with_env(&config_path)?;
    config.validate()?;
    tracing::info!("Configuration loaded from {}", config_path.display());

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    let applied = db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed ({} applied)", applied);

    let hasher = CredentialHasher::from_config(&config.security)?;
    let templates = Templates::load()?;

    let search = SearchIndex::from_config(&config.search);
    if search.is_enabled() {
        match search.ensure_index().await {
            Ok(()) => tracing::info!("Search index ready"),
            Err(e) => tracing::warn!("Search index unavailable, falling back to database: {}", e),
        }
    }

    // Build application state
    let state = AppState::new(config.clone(), pool, hasher, search, templates);

    if let Some((admin, key)) = state.accounts.bootstrap_admin(&config.admin).await? {
        tracing::info!(
            "Created admin user '{}'. API key (shown once): {}",
            admin.username,
            key.plaintext
        );
    }

    // Start rate limiter cleanup task (runs every 5 minutes)
    {
        let limiter = state.limiter.clone();
        let longest_window = [
            config.rate_limit.login,
            config.rate_limit.password_reset,
            config.rate_limit.command_ingest,
        ]
        .iter()
        .map(|p| p.window_seconds)
        .max()
        .unwrap_or_default();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(LIMITER_CLEANUP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                limiter.cleanup_older_than(longest_window).await;
            }
        });
    }

    // Build router
    let app = api::build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
