use serde::Serialize;

use super::{std_dev, Analytics};
use crate::config::tolerance::COMPARISON_SECS;
use crate::error::{AppError, Result};
use crate::types::{Item, PriceSnapshot};

const DAY_SECS: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceChange {
    pub previous: i64,
    pub current: i64,
    pub change: i64,
    pub change_percent: f64,
}

impl PriceChange {
    /// `None` unless both prices are positive.
    pub fn between(previous: i64, current: i64) -> Option<Self> {
        if previous <= 0 || current <= 0 {
            return None;
        }
        let change = current - previous;
        Some(Self {
            previous,
            current,
            change,
            change_percent: change as f64 / previous as f64 * 100.0,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemSummary {
    pub item_id: i64,
    pub item: Option<Item>,
    pub current: PriceSnapshot,
    pub spread: Option<i64>,
    pub spread_percent: Option<f64>,
    pub change_24h: Option<PriceChange>,
    /// Standard deviation of successive percentage returns over 24h.
    pub volatility_24h: Option<f64>,
}

impl Analytics {
    pub async fn item_summary(&self, item_id: i64) -> Result<ItemSummary> {
        let storage = self.storage();
        let current = storage
            .latest_snapshot(item_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no snapshots for item {item_id}")))?;
        let item = storage.get_item(item_id).await?;

        let change_24h = storage
            .snapshot_near(item_id, current.time - DAY_SECS, COMPARISON_SECS)
            .await?
            .and_then(|prev| PriceChange::between(prev.sell_price, current.sell_price));

        let window = storage
            .snapshots_between(item_id, current.time - DAY_SECS, current.time)
            .await?;
        let prices: Vec<i64> = window.iter().map(|s| s.sell_price).collect();

        Ok(ItemSummary {
            item_id,
            item,
            spread: current.spread(),
            spread_percent: current.spread_percent(),
            change_24h,
            volatility_24h: volatility(&prices),
            current,
        })
    }
}

/// Population standard deviation of percentage returns between consecutive
/// nonzero prices. Needs at least two returns.
pub fn volatility(prices: &[i64]) -> Option<f64> {
    let priced: Vec<f64> = prices.iter().filter(|&&p| p > 0).map(|&p| p as f64).collect();
    let returns: Vec<f64> = priced
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0] * 100.0)
        .collect();
    if returns.len() < 2 {
        return None;
    }
    std_dev(&returns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_storage;

    fn snap(time: i64, sell: i64, buy: i64) -> PriceSnapshot {
        PriceSnapshot {
            time,
            item_id: 1,
            sell_price: sell,
            sell_volume: 1,
            buy_price: buy,
            buy_volume: 1,
        }
    }

    #[test]
    fn volatility_needs_two_returns() {
        assert_eq!(volatility(&[100, 110]), None);
        // returns +10%, -10%: mean 0, population sd 10
        let v = volatility(&[100, 110, 99]).unwrap();
        assert!((v - 10.0).abs() < 1e-9);
        // zero prices are skipped rather than producing infinite returns
        assert_eq!(volatility(&[100, 0, 110]), None);
    }

    #[tokio::test]
    async fn change_against_snapshot_a_day_earlier() {
        let storage = test_storage().await;
        let now = 1_700_000_040;
        storage
            .upsert_snapshots(&[snap(now - DAY_SECS, 100, 95), snap(now, 150, 140)])
            .await
            .unwrap();

        let summary = Analytics::new(storage).item_summary(1).await.unwrap();
        assert_eq!(
            summary.change_24h,
            Some(PriceChange { previous: 100, current: 150, change: 50, change_percent: 50.0 })
        );
        assert_eq!(summary.spread, Some(10));
        assert!(summary.volatility_24h.is_none());
    }

    #[tokio::test]
    async fn comparison_outside_tolerance_is_absent() {
        let storage = test_storage().await;
        let now = 1_700_000_040;
        storage
            .upsert_snapshots(&[snap(now - DAY_SECS - 2 * 3600, 100, 0), snap(now, 150, 0)])
            .await
            .unwrap();

        let summary = Analytics::new(storage).item_summary(1).await.unwrap();
        assert!(summary.change_24h.is_none());
        assert!(summary.spread.is_none());
        assert!(summary.spread_percent.is_none());
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let err = Analytics::new(test_storage().await).item_summary(42).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
