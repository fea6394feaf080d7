use crate::db::bucket;
use crate::db::models::{HistoryRow, NamedSnapshotRow, SnapshotRow};
use crate::db::Storage;
use crate::error::Result;
use crate::types::{Candle, Interval, PricePoint, PriceSnapshot, TradeHistoryRecord};

const SNAPSHOT_COLUMNS: &str = "time, item_id, sell_price, sell_volume, buy_price, buy_volume";

impl Storage {
    /// Write snapshots with last-write-wins semantics on (time, item_id).
    pub async fn upsert_snapshots(&self, snapshots: &[PriceSnapshot]) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        let mut written = 0u64;

        for s in snapshots {
            let res = sqlx::query(
                r#"
                INSERT INTO price_snapshots (time, item_id, sell_price, sell_volume, buy_price, buy_volume)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(time, item_id) DO UPDATE SET
                    sell_price = excluded.sell_price,
                    sell_volume = excluded.sell_volume,
                    buy_price = excluded.buy_price,
                    buy_volume = excluded.buy_volume
                "#,
            )
            .bind(s.time)
            .bind(s.item_id)
            .bind(s.sell_price)
            .bind(s.sell_volume)
            .bind(s.buy_price)
            .bind(s.buy_volume)
            .execute(&mut *tx)
            .await?;
            written += res.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Write backfilled history. Existing (time, item_id) rows are never
    /// overwritten. Returns the number of rows actually inserted.
    pub async fn insert_history(&self, records: &[TradeHistoryRecord]) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        let mut inserted = 0u64;

        for r in records {
            let res = sqlx::query(
                r#"
                INSERT OR IGNORE INTO trade_history
                    (time, item_id, lowest_sell, highest_sell, average_price, volume)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(r.time)
            .bind(r.item_id)
            .bind(r.lowest_sell)
            .bind(r.highest_sell)
            .bind(r.average_price)
            .bind(r.volume)
            .execute(&mut *tx)
            .await?;
            inserted += res.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn latest_snapshot(&self, item_id: i64) -> Result<Option<PriceSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM price_snapshots WHERE item_id = ? ORDER BY time DESC LIMIT 1"
        ))
        .bind(item_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(PriceSnapshot::from))
    }

    /// Snapshot with a nonzero sell price closest to `target`, at most
    /// `tolerance` seconds away. Ties go to the later snapshot.
    pub async fn snapshot_near(
        &self,
        item_id: i64,
        target: i64,
        tolerance: i64,
    ) -> Result<Option<PriceSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SNAPSHOT_COLUMNS} FROM price_snapshots
            WHERE item_id = ?1 AND time BETWEEN ?2 AND ?3 AND sell_price > 0
            ORDER BY ABS(time - ?4) ASC, time DESC
            LIMIT 1
            "#
        ))
        .bind(item_id)
        .bind(target - tolerance)
        .bind(target + tolerance)
        .bind(target)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(PriceSnapshot::from))
    }

    /// Snapshots for one item with `from <= time <= to`, oldest first.
    pub async fn snapshots_between(
        &self,
        item_id: i64,
        from: i64,
        to: i64,
    ) -> Result<Vec<PriceSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SNAPSHOT_COLUMNS} FROM price_snapshots
            WHERE item_id = ? AND time >= ? AND time <= ?
            ORDER BY time ASC
            "#
        ))
        .bind(item_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(PriceSnapshot::from).collect())
    }

    /// Every snapshot with `from <= time < to`, grouped by item then time.
    pub async fn all_snapshots_in(&self, from: i64, to: i64) -> Result<Vec<PriceSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SNAPSHOT_COLUMNS} FROM price_snapshots
            WHERE time >= ? AND time < ?
            ORDER BY item_id ASC, time ASC
            "#
        ))
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(PriceSnapshot::from).collect())
    }

    pub async fn history_between(
        &self,
        item_id: i64,
        from: i64,
        to: i64,
    ) -> Result<Vec<TradeHistoryRecord>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r#"
            SELECT time, item_id, lowest_sell, highest_sell, average_price, volume
            FROM trade_history
            WHERE item_id = ? AND time >= ? AND time <= ?
            ORDER BY time ASC
            "#,
        )
        .bind(item_id)
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(TradeHistoryRecord::from).collect())
    }

    /// Live snapshots and backfilled history merged into one time-ordered
    /// series. A snapshot wins over a history row with the same timestamp
    /// unless the snapshot has no sell price.
    pub async fn price_points(&self, item_id: i64, from: i64, to: i64) -> Result<Vec<PricePoint>> {
        let live: Vec<PricePoint> = self
            .snapshots_between(item_id, from, to)
            .await?
            .into_iter()
            .map(|s| PricePoint {
                time: s.time,
                price: s.sell_price,
                volume: s.sell_volume,
            })
            .collect();

        let backfilled: Vec<PricePoint> = self
            .history_between(item_id, from, to)
            .await?
            .into_iter()
            .map(|h| PricePoint {
                time: h.time,
                price: if h.lowest_sell > 0 {
                    h.lowest_sell
                } else {
                    h.average_price.round() as i64
                },
                volume: h.volume,
            })
            .collect();

        Ok(bucket::merge_by_time(live, backfilled))
    }

    /// Range query with the bucket width picked from the span: raw rows up to
    /// 2h, 5m buckets up to 24h, 1h buckets up to 7d, 4h beyond.
    pub async fn price_history(&self, item_id: i64, from: i64, to: i64) -> Result<Vec<Candle>> {
        let points = self.price_points(item_id, from, to).await?;
        Ok(match Interval::for_span(to.saturating_sub(from)) {
            None => bucket::raw_candles(&points),
            Some(width) => bucket::aggregate(&points, width.secs()),
        })
    }

    /// Newest priced snapshot per item at or after `since`, with item names.
    pub async fn latest_snapshots_since(
        &self,
        since: i64,
    ) -> Result<Vec<(PriceSnapshot, Option<String>)>> {
        let rows: Vec<NamedSnapshotRow> = sqlx::query_as(
            r#"
            SELECT s.time, s.item_id, s.sell_price, s.sell_volume, s.buy_price, s.buy_volume,
                   i.display_name AS name
            FROM (
                SELECT *, ROW_NUMBER() OVER (PARTITION BY item_id ORDER BY time DESC) AS rn
                FROM price_snapshots
                WHERE time >= ? AND sell_price > 0
            ) s
            LEFT JOIN items i ON i.id = s.item_id
            WHERE s.rn = 1
            ORDER BY s.item_id
            "#,
        )
        .bind(since)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(NamedSnapshotRow::into_parts).collect())
    }

    /// For every item, the priced snapshot closest to `target` within
    /// `tolerance` seconds.
    pub async fn snapshots_near_all(&self, target: i64, tolerance: i64) -> Result<Vec<PriceSnapshot>> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SNAPSHOT_COLUMNS} FROM (
                SELECT *, ROW_NUMBER() OVER (
                    PARTITION BY item_id ORDER BY ABS(time - ?1) ASC, time DESC
                ) AS rn
                FROM price_snapshots
                WHERE time BETWEEN ?2 AND ?3 AND sell_price > 0
            )
            WHERE rn = 1
            "#
        ))
        .bind(target)
        .bind(target - tolerance)
        .bind(target + tolerance)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(PriceSnapshot::from).collect())
    }

    pub async fn count_snapshots(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_snapshots")
            .fetch_one(self.pool())
            .await?;
        Ok(n)
    }

    pub async fn count_history(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trade_history")
            .fetch_one(self.pool())
            .await?;
        Ok(n)
    }

    pub async fn count_history_for(&self, item_id: i64) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trade_history WHERE item_id = ?")
            .bind(item_id)
            .fetch_one(self.pool())
            .await?;
        Ok(n)
    }
}
