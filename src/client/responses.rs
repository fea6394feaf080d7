//! Upstream wire shapes. Missing numeric fields read as zero ("no activity").

use serde::Deserialize;

use crate::types::{PriceSnapshot, TradeHistoryRecord};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LatestPrice {
    pub item_id: i64,
    #[serde(default)]
    pub sell_price: i64,
    #[serde(default)]
    pub sell_volume: i64,
    #[serde(default)]
    pub buy_price: i64,
    #[serde(default)]
    pub buy_volume: i64,
}

impl LatestPrice {
    pub fn into_snapshot(self, time: i64) -> PriceSnapshot {
        PriceSnapshot {
            time,
            item_id: self.item_id,
            sell_price: self.sell_price,
            sell_volume: self.sell_volume,
            buy_price: self.buy_price,
            buy_volume: self.buy_volume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryPoint {
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub lowest_sell: i64,
    #[serde(default)]
    pub highest_sell: i64,
    #[serde(default)]
    pub average_price: f64,
    #[serde(default)]
    pub volume: i64,
}

impl HistoryPoint {
    pub fn into_record(self, item_id: i64) -> TradeHistoryRecord {
        TradeHistoryRecord {
            time: self.timestamp,
            item_id,
            lowest_sell: self.lowest_sell,
            highest_sell: self.highest_sell,
            average_price: self.average_price,
            volume: self.volume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogEntry {
    pub slug: String,
    pub internal_id: i64,
}
