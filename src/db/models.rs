/// Database row types matching `migrations/0001_init.sql`.
/// Converted into the domain types in `crate::types` at the storage boundary.
use crate::types::{Category, DailyAggregate, Item, PriceSnapshot, TradeHistoryRecord};

#[derive(Debug, sqlx::FromRow)]
pub struct ItemRow {
    pub id: i64,
    pub slug: String,
    pub display_name: String,
    pub category: String,
    pub last_collected_at: Option<i64>,
    pub backfill_complete: bool,
    pub last_backfilled_at: Option<i64>,
    pub updated_at: i64,
}

impl From<ItemRow> for Item {
    fn from(r: ItemRow) -> Self {
        Item {
            id: r.id,
            slug: r.slug,
            display_name: r.display_name,
            category: Category::parse(&r.category),
            last_collected_at: r.last_collected_at,
            backfill_complete: r.backfill_complete,
            last_backfilled_at: r.last_backfilled_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SnapshotRow {
    pub time: i64,
    pub item_id: i64,
    pub sell_price: i64,
    pub sell_volume: i64,
    pub buy_price: i64,
    pub buy_volume: i64,
}

impl From<SnapshotRow> for PriceSnapshot {
    fn from(r: SnapshotRow) -> Self {
        PriceSnapshot {
            time: r.time,
            item_id: r.item_id,
            sell_price: r.sell_price,
            sell_volume: r.sell_volume,
            buy_price: r.buy_price,
            buy_volume: r.buy_volume,
        }
    }
}

/// Snapshot joined with the item's display name (absent for uncatalogued ids).
#[derive(Debug, sqlx::FromRow)]
pub struct NamedSnapshotRow {
    pub time: i64,
    pub item_id: i64,
    pub sell_price: i64,
    pub sell_volume: i64,
    pub buy_price: i64,
    pub buy_volume: i64,
    pub name: Option<String>,
}

impl NamedSnapshotRow {
    pub fn into_parts(self) -> (PriceSnapshot, Option<String>) {
        let snapshot = PriceSnapshot {
            time: self.time,
            item_id: self.item_id,
            sell_price: self.sell_price,
            sell_volume: self.sell_volume,
            buy_price: self.buy_price,
            buy_volume: self.buy_volume,
        };
        (snapshot, self.name)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct HistoryRow {
    pub time: i64,
    pub item_id: i64,
    pub lowest_sell: i64,
    pub highest_sell: i64,
    pub average_price: f64,
    pub volume: i64,
}

impl From<HistoryRow> for TradeHistoryRecord {
    fn from(r: HistoryRow) -> Self {
        TradeHistoryRecord {
            time: r.time,
            item_id: r.item_id,
            lowest_sell: r.lowest_sell,
            highest_sell: r.highest_sell,
            average_price: r.average_price,
            volume: r.volume,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct DailyAggregateRow {
    pub date: String,
    pub item_id: i64,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
    pub average_price: f64,
    pub sell_volume: i64,
    pub buy_volume: i64,
    pub sample_count: i64,
}

impl From<DailyAggregateRow> for DailyAggregate {
    fn from(r: DailyAggregateRow) -> Self {
        DailyAggregate {
            date: r.date,
            item_id: r.item_id,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            average_price: r.average_price,
            sell_volume: r.sell_volume,
            buy_volume: r.buy_volume,
            sample_count: r.sample_count,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct OverviewRow {
    pub total_items: i64,
    pub active_items: i64,
    pub total_volume: i64,
    pub top_gainers: String,
    pub top_losers: String,
    pub most_traded: String,
    pub updated_at: i64,
}
