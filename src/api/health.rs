//! `/health`: database reachability plus the upstream throttle state.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::warn;

use super::routes::ApiState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub backoff_active: bool,
    pub backoff_secs: u64,
    pub full_backfill_running: bool,
}

pub async fn health(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match sqlx::query("SELECT 1").execute(state.analytics.storage().pool()).await {
        Ok(_) => true,
        Err(e) => {
            warn!("Health check database ping failed: {e}");
            false
        }
    };
    let backoff = state.collector.backoff();

    let body = HealthResponse {
        status: if database { "ok" } else { "degraded" },
        database,
        backoff_active: backoff.remaining().is_some(),
        backoff_secs: backoff.current_duration().as_secs(),
        full_backfill_running: state.collector.is_full_backfill_running(),
    };
    let code = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body))
}
