use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use services::DashboardCounts;

use crate::AppState;
use crate::error::ApiError;
use crate::extract::AdminGuard;

pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard))
}

async fn dashboard(
    _admin: AdminGuard,
    State(state): State<AppState>,
) -> Result<Json<DashboardCounts>, ApiError> {
    Ok(Json(state.services.stats().dashboard().await?))
}
