use chrono::{NaiveDate, NaiveTime};
use tracing::debug;

use crate::db::bucket;
use crate::db::models::{DailyAggregateRow, OverviewRow};
use crate::db::Storage;
use crate::error::Result;
use crate::types::{DailyAggregate, MarketOverview, PricePoint, PriceSnapshot};

impl Storage {
    /// Recompute every item's aggregate for `date` (UTC) from that day's
    /// snapshots and replace the stored rows. Running it twice yields the same
    /// rows. Returns the number of items aggregated.
    pub async fn refresh_daily_aggregates(&self, date: NaiveDate) -> Result<u64> {
        let start = date.and_time(NaiveTime::MIN).and_utc().timestamp();
        let end = start + 86_400;
        let key = date.format("%Y-%m-%d").to_string();

        let snapshots = self.all_snapshots_in(start, end).await?;
        let aggregates: Vec<DailyAggregate> = snapshots
            .chunk_by(|a, b| a.item_id == b.item_id)
            .filter_map(|group| daily_aggregate(&key, start, group))
            .collect();

        let mut tx = self.pool().begin().await?;
        for a in &aggregates {
            sqlx::query(
                r#"
                INSERT INTO daily_aggregates (
                    date, item_id, open, high, low, close,
                    average_price, sell_volume, buy_volume, sample_count
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(date, item_id) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    average_price = excluded.average_price,
                    sell_volume = excluded.sell_volume,
                    buy_volume = excluded.buy_volume,
                    sample_count = excluded.sample_count
                "#,
            )
            .bind(&a.date)
            .bind(a.item_id)
            .bind(a.open)
            .bind(a.high)
            .bind(a.low)
            .bind(a.close)
            .bind(a.average_price)
            .bind(a.sell_volume)
            .bind(a.buy_volume)
            .bind(a.sample_count)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(date = %key, items = aggregates.len(), "daily aggregates refreshed");
        Ok(aggregates.len() as u64)
    }

    /// Aggregates for one item on or after `since` (inclusive), oldest first.
    pub async fn daily_aggregates(&self, item_id: i64, since: NaiveDate) -> Result<Vec<DailyAggregate>> {
        let rows: Vec<DailyAggregateRow> = sqlx::query_as(
            r#"
            SELECT date, item_id, open, high, low, close,
                   average_price, sell_volume, buy_volume, sample_count
            FROM daily_aggregates
            WHERE item_id = ? AND date >= ?
            ORDER BY date ASC
            "#,
        )
        .bind(item_id)
        .bind(since.format("%Y-%m-%d").to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(DailyAggregate::from).collect())
    }

    /// Replace the singleton overview row.
    pub async fn save_overview(&self, overview: &MarketOverview) -> Result<()> {
        let gainers = serde_json::to_string(&overview.top_gainers)?;
        let losers = serde_json::to_string(&overview.top_losers)?;
        let traded = serde_json::to_string(&overview.most_traded)?;

        sqlx::query(
            r#"
            INSERT INTO market_overview_cache (
                id, total_items, active_items, total_volume,
                top_gainers, top_losers, most_traded, updated_at
            ) VALUES (1, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                total_items = excluded.total_items,
                active_items = excluded.active_items,
                total_volume = excluded.total_volume,
                top_gainers = excluded.top_gainers,
                top_losers = excluded.top_losers,
                most_traded = excluded.most_traded,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(overview.total_items)
        .bind(overview.active_items)
        .bind(overview.total_volume)
        .bind(gainers)
        .bind(losers)
        .bind(traded)
        .bind(overview.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn load_overview(&self) -> Result<Option<MarketOverview>> {
        let row: Option<OverviewRow> = sqlx::query_as(
            r#"
            SELECT total_items, active_items, total_volume,
                   top_gainers, top_losers, most_traded, updated_at
            FROM market_overview_cache WHERE id = 1
            "#,
        )
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(MarketOverview {
            total_items: row.total_items,
            active_items: row.active_items,
            total_volume: row.total_volume,
            top_gainers: serde_json::from_str(&row.top_gainers)?,
            top_losers: serde_json::from_str(&row.top_losers)?,
            most_traded: serde_json::from_str(&row.most_traded)?,
            updated_at: row.updated_at,
        }))
    }
}

/// Aggregate one item's snapshots for a day. `None` when the item never had a
/// nonzero sell price that day.
fn daily_aggregate(date: &str, day_start: i64, group: &[PriceSnapshot]) -> Option<DailyAggregate> {
    let first = group.first()?;
    let points: Vec<PricePoint> = group
        .iter()
        .filter(|s| s.sell_price > 0)
        .map(|s| PricePoint {
            time: s.time,
            price: s.sell_price,
            volume: s.sell_volume,
        })
        .collect();
    let candle = bucket::aggregate_bucket(day_start, &points)?;

    let priced: Vec<i64> = group.iter().map(|s| s.sell_price).filter(|p| *p > 0).collect();
    let average_price = priced.iter().sum::<i64>() as f64 / priced.len() as f64;

    Some(DailyAggregate {
        date: date.to_string(),
        item_id: first.item_id,
        open: candle.open,
        high: candle.high,
        low: candle.low,
        close: candle.close,
        average_price,
        sell_volume: group.iter().map(|s| s.sell_volume).sum(),
        buy_volume: group.iter().map(|s| s.buy_volume).sum(),
        sample_count: group.len() as i64,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::db::test_storage;
    use crate::types::{MarketOverview, Mover, PriceSnapshot};

    fn snap(time: i64, item_id: i64, sell: i64) -> PriceSnapshot {
        PriceSnapshot {
            time,
            item_id,
            sell_price: sell,
            sell_volume: 2,
            buy_price: sell / 2,
            buy_volume: 1,
        }
    }

    #[tokio::test]
    async fn daily_aggregates_are_recomputed_idempotently() {
        let storage = test_storage().await;
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let day = date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();

        storage
            .upsert_snapshots(&[
                snap(day + 60, 1, 100),
                snap(day + 120, 1, 0),
                snap(day + 180, 1, 140),
                snap(day + 240, 1, 90),
                // Next day, must not leak in.
                snap(day + 86_400, 1, 5),
            ])
            .await
            .unwrap();

        assert_eq!(storage.refresh_daily_aggregates(date).await.unwrap(), 1);
        assert_eq!(storage.refresh_daily_aggregates(date).await.unwrap(), 1);

        let rows = storage.daily_aggregates(1, date).await.unwrap();
        assert_eq!(rows.len(), 1);
        let a = &rows[0];
        assert_eq!(a.date, "2024-03-01");
        assert_eq!((a.open, a.high, a.low, a.close), (100, 140, 90, 90));
        assert_eq!(a.sample_count, 4);
        assert_eq!(a.sell_volume, 8);
        assert!((a.average_price - 110.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn overview_round_trips_through_cache_row() {
        let storage = test_storage().await;
        assert!(storage.load_overview().await.unwrap().is_none());

        let overview = MarketOverview {
            total_items: 3,
            active_items: 2,
            total_volume: 40,
            top_gainers: vec![Mover {
                item_id: 1,
                name: Some("Iron Ore".to_string()),
                previous_price: 10,
                current_price: 15,
                change: 5,
                change_percent: 50.0,
                volume: 12,
            }],
            top_losers: vec![],
            most_traded: vec![],
            updated_at: 1_000,
        };
        storage.save_overview(&overview).await.unwrap();
        storage
            .save_overview(&MarketOverview { updated_at: 2_000, ..overview.clone() })
            .await
            .unwrap();

        let loaded = storage.load_overview().await.unwrap().unwrap();
        assert_eq!(loaded.updated_at, 2_000);
        assert_eq!(loaded.top_gainers, overview.top_gainers);
    }
}
