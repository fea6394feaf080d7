use serde::Serialize;

use super::Analytics;
use crate::db::bucket;
use crate::error::{AppError, Result};
use crate::types::{Candle, DailyAggregate, Interval, PricePoint};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovingAveragePoint {
    pub time: i64,
    pub price: i64,
    pub average: f64,
    /// Priced points inside the trailing window.
    pub samples: usize,
}

impl Analytics {
    /// OHLC candles over the merged snapshot/history series.
    pub async fn ohlc(&self, item_id: i64, from: i64, to: i64, interval: Interval) -> Result<Vec<Candle>> {
        check_range(from, to)?;
        let points = self.storage().price_points(item_id, from, to).await?;
        Ok(bucket::aggregate(&points, interval.secs()))
    }

    /// Range query with an automatically chosen bucket width.
    pub async fn price_history(&self, item_id: i64, from: i64, to: i64) -> Result<Vec<Candle>> {
        check_range(from, to)?;
        self.storage().price_history(item_id, from, to).await
    }

    /// Trailing average over `window_secs` for every priced point in
    /// `[from, to]`. Points before `from` still feed the first averages.
    pub async fn moving_average(
        &self,
        item_id: i64,
        from: i64,
        to: i64,
        window_secs: i64,
    ) -> Result<Vec<MovingAveragePoint>> {
        check_range(from, to)?;
        if window_secs <= 0 {
            return Err(AppError::InvalidRequest("window must be positive".into()));
        }
        let points = self
            .storage()
            .price_points(item_id, from.saturating_sub(window_secs), to)
            .await?;
        Ok(trailing_average(&points, from, window_secs))
    }

    /// Stored daily aggregates for the last `days` days, today included.
    pub async fn daily_history(&self, item_id: i64, days: i64) -> Result<Vec<DailyAggregate>> {
        if days <= 0 {
            return Err(AppError::InvalidRequest("days must be positive".into()));
        }
        let since = chrono::Utc::now().date_naive() - chrono::Duration::days(days - 1);
        self.storage().daily_aggregates(item_id, since).await
    }
}

fn check_range(from: i64, to: i64) -> Result<()> {
    if from > to {
        return Err(AppError::InvalidRequest(format!("from ({from}) is after to ({to})")));
    }
    Ok(())
}

/// Average of priced points in `(t - window, t]` for each priced point at or
/// after `from`. `points` must be time-ordered. Each window is sliced and
/// averaged on its own.
pub fn trailing_average(points: &[PricePoint], from: i64, window_secs: i64) -> Vec<MovingAveragePoint> {
    let priced: Vec<&PricePoint> = points.iter().filter(|p| p.price > 0).collect();

    priced
        .iter()
        .enumerate()
        .filter(|(_, p)| p.time >= from)
        .map(|(i, p)| {
            let start = p.time.saturating_sub(window_secs);
            let lo = priced[..=i].partition_point(|q| q.time <= start);
            let window = &priced[lo..=i];
            let sum: i64 = window.iter().map(|q| q.price).sum();
            MovingAveragePoint {
                time: p.time,
                price: p.price,
                average: sum as f64 / window.len() as f64,
                samples: window.len(),
            }
        })
        .collect()
}
