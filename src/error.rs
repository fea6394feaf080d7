use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] crate::client::FetchError),

    #[error("Cancelled by shutdown")]
    Cancelled(#[from] crate::shutdown::Cancelled),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, format!("not found: {what}")).into_response(),
            AppError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Upstream(e) => {
                warn!("Upstream call failed: {e}");
                (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response()
            }
            other => {
                // Details stay in the server log.
                error!("Request failed: {other}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}
