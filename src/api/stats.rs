//! GET /api/v1/stats - Counters for the caller's history

use axum::{extract::State, routing::get, Extension, Json, Router};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::HistoryStats;

pub fn router() -> Router<AppState> {
    Router::new().route("/stats", get(get_stats))
}

async fn get_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<HistoryStats>, ApiError> {
    Ok(Json(state.history.stats(auth.scope()).await?))
}
