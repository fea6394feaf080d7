use std::time::Duration;

use crate::error::{AppError, Result};

pub const PRICE_API_URL: &str = "https://api.market.example.com/v1";
pub const CATALOG_URL: &str = "https://api.market.example.com/v1/items";

/// Bulk latest-price poll cadence (seconds).
pub const POLL_INTERVAL_SECS: u64 = 60;

/// Incremental history backfill cadence (seconds).
pub const BACKFILL_INTERVAL_SECS: u64 = 120;

/// Catalog refresh cadence (seconds). A refresh inside this window is skipped
/// unless forced.
pub const CATALOG_REFRESH_SECS: u64 = 3600;

/// UTC hour at which the daily full backfill starts.
pub const DAILY_BACKFILL_HOUR_UTC: u32 = 3;

/// Overview cache rows younger than this are served as-is.
pub const OVERVIEW_FRESHNESS_SECS: i64 = 300;

/// Upstream allows ~40 calls per rolling window; stay under it.
pub const MAX_BATCH_SIZE: usize = 35;

/// Length of the upstream rate window (seconds).
pub const RATE_WINDOW_SECS: u64 = 120;

/// Backoff bounds for throttled responses.
pub mod backoff {
    use std::time::Duration;

    pub const INITIAL: Duration = Duration::from_secs(30);
    pub const MAX: Duration = Duration::from_secs(300);
}

/// Lookback tolerances used by the analytics queries (seconds).
pub mod tolerance {
    /// A comparison snapshot must sit within this distance of its target time.
    pub const COMPARISON_SECS: i64 = 3600;
    /// A "current" snapshot for movers must be at most this old.
    pub const RECENT_SECS: i64 = 2 * 3600;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub price_api_url: String,
    pub catalog_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Calls per rate window (COLLECTOR_BATCH_SIZE), clamped to 1..=MAX_BATCH_SIZE.
    pub batch_size: usize,
    /// Rate window the batch is spread across (RATE_WINDOW_SECS).
    pub rate_window: Duration,
    /// Per-request timeout for upstream calls (HTTP_TIMEOUT_SECS).
    pub http_timeout: Duration,
    /// Set COLLECTOR_ENABLED=false to serve reads without polling upstream.
    pub collector_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let batch_size = std::env::var("COLLECTOR_BATCH_SIZE")
            .unwrap_or_else(|_| MAX_BATCH_SIZE.to_string())
            .parse::<usize>()
            .map_err(|_| {
                AppError::Config("COLLECTOR_BATCH_SIZE must be a positive integer".to_string())
            })?;

        Ok(Self {
            price_api_url: std::env::var("PRICE_API_URL")
                .unwrap_or_else(|_| PRICE_API_URL.to_string()),
            catalog_url: std::env::var("CATALOG_URL").unwrap_or_else(|_| CATALOG_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "market.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            batch_size: clamp_batch_size(batch_size),
            rate_window: Duration::from_secs(
                std::env::var("RATE_WINDOW_SECS")
                    .unwrap_or_else(|_| RATE_WINDOW_SECS.to_string())
                    .parse::<u64>()
                    .unwrap_or(RATE_WINDOW_SECS),
            ),
            http_timeout: Duration::from_secs(
                std::env::var("HTTP_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse::<u64>()
                    .unwrap_or(30),
            ),
            collector_enabled: std::env::var("COLLECTOR_ENABLED")
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
        })
    }

    /// Delay between consecutive upstream calls so one batch fills one rate window.
    pub fn per_call_delay(&self) -> Duration {
        self.rate_window / self.batch_size.max(1) as u32
    }
}

pub fn clamp_batch_size(n: usize) -> usize {
    n.clamp(1, MAX_BATCH_SIZE)
}

#[cfg(test)]
impl Config {
    /// Config pointing at a mock upstream, with pacing disabled.
    pub fn for_tests(base_url: &str) -> Self {
        Self {
            price_api_url: base_url.to_string(),
            catalog_url: format!("{base_url}/items"),
            log_level: "debug".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            batch_size: MAX_BATCH_SIZE,
            rate_window: Duration::ZERO,
            http_timeout: Duration::from_secs(5),
            collector_enabled: true,
        }
    }
}
