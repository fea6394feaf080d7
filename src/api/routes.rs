use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::analytics::movers::Movers;
use crate::analytics::{Analytics, ItemSummary, MovingAveragePoint, SpreadAnalysis, VolumeAnalysis};
use crate::collector::{BackfillStatus, CollectionStats, Collector};
use crate::error::AppError;
use crate::types::{Candle, DailyAggregate, Interval, Item, MarketOverview, Mover, PriceSnapshot};

use super::health::health;

const DEFAULT_HOURS: i64 = 24;
const MAX_HOURS: i64 = 24 * 365;
const DEFAULT_LIMIT: usize = 10;
/// 9999-12-31T23:59:59Z.
const MAX_TIMESTAMP: i64 = 253_402_300_799;
const MAX_LIMIT: usize = 100;

#[derive(Clone)]
pub struct ApiState {
    pub analytics: Analytics,
    pub collector: Collector,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/items", get(get_items))
        .route("/items/by-slug/:slug", get(get_item_by_slug))
        .route("/items/:id/summary", get(get_item_summary))
        .route("/items/:id/refresh", post(post_item_refresh))
        .route("/items/:id/history", get(get_item_history))
        .route("/items/:id/ohlc", get(get_item_ohlc))
        .route("/items/:id/moving-average", get(get_moving_average))
        .route("/items/:id/spread", get(get_spread))
        .route("/items/:id/volume", get(get_volume))
        .route("/items/:id/daily", get(get_daily))
        .route("/market/overview", get(get_market_overview))
        .route("/market/movers", get(get_movers))
        .route("/market/most-traded", get(get_most_traded))
        .route("/collector/stats", get(get_collector_stats))
        .route(
            "/collector/backfill",
            get(get_backfill_status).post(post_backfill_trigger),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RangeQuery {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

#[derive(Deserialize)]
pub struct OhlcQuery {
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub interval: Option<String>,
}

#[derive(Deserialize)]
pub struct MovingAverageQuery {
    pub from: Option<i64>,
    pub to: Option<i64>,
    /// Trailing window in minutes.
    pub window: Option<i64>,
}

#[derive(Deserialize)]
pub struct HoursQuery {
    pub hours: Option<i64>,
}

#[derive(Deserialize)]
pub struct DaysQuery {
    pub days: Option<i64>,
}

#[derive(Deserialize)]
pub struct MoversQuery {
    pub hours: Option<i64>,
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct TriggerResponse {
    pub triggered: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_items(State(state): State<ApiState>) -> Result<Json<Vec<Item>>, AppError> {
    Ok(Json(state.collector.storage().list_items().await?))
}

/// Resolve a slug through the in-memory catalog map.
async fn get_item_by_slug(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
) -> Result<Json<Item>, AppError> {
    let id = state
        .collector
        .catalog()
        .id_of(&slug)
        .ok_or_else(|| AppError::NotFound(format!("item {slug}")))?;
    let item = state
        .collector
        .storage()
        .get_item(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("item {id}")))?;
    Ok(Json(item))
}

async fn get_item_summary(
    State(state): State<ApiState>,
    Path(item_id): Path<i64>,
) -> Result<Json<ItemSummary>, AppError> {
    Ok(Json(state.analytics.item_summary(item_id).await?))
}

/// Poll one item now instead of waiting for the next bulk poll.
async fn post_item_refresh(
    State(state): State<ApiState>,
    Path(item_id): Path<i64>,
) -> Result<Json<Option<PriceSnapshot>>, AppError> {
    Ok(Json(state.collector.refresh_item(item_id).await?))
}

async fn get_item_history(
    State(state): State<ApiState>,
    Path(item_id): Path<i64>,
    Query(params): Query<RangeQuery>,
) -> Result<Json<Vec<Candle>>, AppError> {
    let (from, to) = resolve_range(params.from, params.to)?;
    Ok(Json(state.analytics.price_history(item_id, from, to).await?))
}

async fn get_item_ohlc(
    State(state): State<ApiState>,
    Path(item_id): Path<i64>,
    Query(params): Query<OhlcQuery>,
) -> Result<Json<Vec<Candle>>, AppError> {
    let interval = match params.interval.as_deref() {
        None => Interval::OneHour,
        Some(s) => Interval::parse(s)
            .ok_or_else(|| AppError::InvalidRequest(format!("unsupported interval: {s}")))?,
    };
    let (from, to) = resolve_range(params.from, params.to)?;
    Ok(Json(state.analytics.ohlc(item_id, from, to, interval).await?))
}

async fn get_moving_average(
    State(state): State<ApiState>,
    Path(item_id): Path<i64>,
    Query(params): Query<MovingAverageQuery>,
) -> Result<Json<Vec<MovingAveragePoint>>, AppError> {
    let window_mins = params.window.unwrap_or(60);
    if !(1..=MAX_HOURS * 60).contains(&window_mins) {
        return Err(AppError::InvalidRequest("window out of range".into()));
    }
    let (from, to) = resolve_range(params.from, params.to)?;
    let points = state
        .analytics
        .moving_average(item_id, from, to, window_mins * 60)
        .await?;
    Ok(Json(points))
}

async fn get_spread(
    State(state): State<ApiState>,
    Path(item_id): Path<i64>,
    Query(params): Query<HoursQuery>,
) -> Result<Json<SpreadAnalysis>, AppError> {
    let hours = validate_hours(params.hours)?;
    Ok(Json(state.analytics.spread_analysis(item_id, hours).await?))
}

async fn get_volume(
    State(state): State<ApiState>,
    Path(item_id): Path<i64>,
    Query(params): Query<HoursQuery>,
) -> Result<Json<VolumeAnalysis>, AppError> {
    let hours = validate_hours(params.hours)?;
    Ok(Json(state.analytics.volume_analysis(item_id, hours).await?))
}

async fn get_daily(
    State(state): State<ApiState>,
    Path(item_id): Path<i64>,
    Query(params): Query<DaysQuery>,
) -> Result<Json<Vec<DailyAggregate>>, AppError> {
    let days = params.days.unwrap_or(30);
    if !(1..=365).contains(&days) {
        return Err(AppError::InvalidRequest("days must be between 1 and 365".into()));
    }
    Ok(Json(state.analytics.daily_history(item_id, days).await?))
}

async fn get_market_overview(
    State(state): State<ApiState>,
) -> Result<Json<MarketOverview>, AppError> {
    Ok(Json(state.analytics.market_overview().await?))
}

async fn get_movers(
    State(state): State<ApiState>,
    Query(params): Query<MoversQuery>,
) -> Result<Json<Movers>, AppError> {
    let hours = validate_hours(params.hours)?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(state.analytics.top_movers(hours, limit).await?))
}

async fn get_most_traded(
    State(state): State<ApiState>,
    Query(params): Query<MoversQuery>,
) -> Result<Json<Vec<Mover>>, AppError> {
    let hours = validate_hours(params.hours)?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(state.analytics.most_traded(hours, limit).await?))
}

async fn get_collector_stats(
    State(state): State<ApiState>,
) -> Result<Json<CollectionStats>, AppError> {
    Ok(Json(state.collector.collection_stats().await?))
}

async fn get_backfill_status(
    State(state): State<ApiState>,
) -> Result<Json<BackfillStatus>, AppError> {
    Ok(Json(state.collector.backfill_status().await?))
}

async fn post_backfill_trigger(State(state): State<ApiState>) -> Json<TriggerResponse> {
    Json(TriggerResponse {
        triggered: state.collector.trigger_full_backfill(),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Defaults: `to` = now, `from` = 24h before `to`. Both must be unix seconds
/// between the epoch and the end of year 9999.
fn resolve_range(from: Option<i64>, to: Option<i64>) -> Result<(i64, i64), AppError> {
    let to = to.unwrap_or_else(|| chrono::Utc::now().timestamp());
    check_timestamp("to", to)?;
    let from = from.unwrap_or((to - DEFAULT_HOURS * 3_600).max(0));
    check_timestamp("from", from)?;
    Ok((from, to))
}

fn check_timestamp(name: &str, value: i64) -> Result<(), AppError> {
    if !(0..=MAX_TIMESTAMP).contains(&value) {
        return Err(AppError::InvalidRequest(format!(
            "{name} must be between 0 and {MAX_TIMESTAMP}"
        )));
    }
    Ok(())
}

fn validate_hours(hours: Option<i64>) -> Result<i64, AppError> {
    let hours = hours.unwrap_or(DEFAULT_HOURS);
    if !(1..=MAX_HOURS).contains(&hours) {
        return Err(AppError::InvalidRequest(format!(
            "hours must be between 1 and {MAX_HOURS}"
        )));
    }
    Ok(hours)
}
