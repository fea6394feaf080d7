use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Item catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Weapon,
    Armor,
    Accessory,
    Material,
    Consumable,
    Other,
}

impl Category {
    /// Parse a stored category. Unknown values map to `Other`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "weapon" => Category::Weapon,
            "armor" => Category::Armor,
            "accessory" => Category::Accessory,
            "material" => Category::Material,
            "consumable" => Category::Consumable,
            _ => Category::Other,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Weapon => "weapon",
            Category::Armor => "armor",
            Category::Accessory => "accessory",
            Category::Material => "material",
            Category::Consumable => "consumable",
            Category::Other => "other",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: i64,
    pub slug: String,
    pub display_name: String,
    pub category: Category,
    /// Unix seconds of the last snapshot written for this item.
    pub last_collected_at: Option<i64>,
    pub backfill_complete: bool,
    pub last_backfilled_at: Option<i64>,
    pub updated_at: i64,
}

/// One catalog entry ready for upsert. `category: None` keeps whatever is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemUpsert {
    pub id: i64,
    pub slug: String,
    pub display_name: String,
    pub category: Option<Category>,
}

// ---------------------------------------------------------------------------
// Price observations
// ---------------------------------------------------------------------------

/// One point-in-time observation. A zero price means "no activity" on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceSnapshot {
    pub time: i64,
    pub item_id: i64,
    /// Lowest sell listing.
    pub sell_price: i64,
    pub sell_volume: i64,
    /// Highest buy order.
    pub buy_price: i64,
    pub buy_volume: i64,
}

impl PriceSnapshot {
    pub fn has_activity(&self) -> bool {
        self.sell_price > 0 || self.buy_price > 0
    }

    /// sell - buy, only when both sides are active.
    pub fn spread(&self) -> Option<i64> {
        (self.sell_price > 0 && self.buy_price > 0).then(|| self.sell_price - self.buy_price)
    }

    pub fn spread_percent(&self) -> Option<f64> {
        self.spread()
            .map(|spread| spread as f64 / self.sell_price as f64 * 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeHistoryRecord {
    pub time: i64,
    pub item_id: i64,
    pub lowest_sell: i64,
    pub highest_sell: i64,
    pub average_price: f64,
    pub volume: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAggregate {
    /// `YYYY-MM-DD` (UTC).
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

/// Upstream history granularities, queried finest first during a backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPeriod {
    Day,
    Week,
    Month,
    Year,
}

impl HistoryPeriod {
    pub const ALL: [HistoryPeriod; 4] = [
        HistoryPeriod::Day,
        HistoryPeriod::Week,
        HistoryPeriod::Month,
        HistoryPeriod::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryPeriod::Day => "1d",
            HistoryPeriod::Week => "7d",
            HistoryPeriod::Month => "30d",
            HistoryPeriod::Year => "1y",
        }
    }
}

impl std::fmt::Display for HistoryPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Bucketing
// ---------------------------------------------------------------------------

/// Closed set of bucket widths accepted by range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    pub fn secs(&self) -> i64 {
        match self {
            Interval::OneMinute => 60,
            Interval::FiveMinutes => 300,
            Interval::FifteenMinutes => 900,
            Interval::OneHour => 3_600,
            Interval::FourHours => 14_400,
            Interval::OneDay => 86_400,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Interval::OneMinute),
            "5m" => Some(Interval::FiveMinutes),
            "15m" => Some(Interval::FifteenMinutes),
            "1h" => Some(Interval::OneHour),
            "4h" => Some(Interval::FourHours),
            "1d" => Some(Interval::OneDay),
            _ => None,
        }
    }

    /// Bucket width for an automatic range query. `None` means raw rows.
    pub fn for_span(span_secs: i64) -> Option<Self> {
        const HOUR: i64 = 3_600;
        if span_secs <= 2 * HOUR {
            None
        } else if span_secs <= 24 * HOUR {
            Some(Interval::FiveMinutes)
        } else if span_secs <= 7 * 24 * HOUR {
            Some(Interval::OneHour)
        } else {
            Some(Interval::FourHours)
        }
    }
}

/// One element of the merged snapshot/history stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PricePoint {
    pub time: i64,
    pub price: i64,
    pub volume: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candle {
    /// Bucket start (unix seconds).
    pub time: i64,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
    pub volume: i64,
    pub samples: u32,
}

// ---------------------------------------------------------------------------
// Market overview
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mover {
    pub item_id: i64,
    pub name: Option<String>,
    pub previous_price: i64,
    pub current_price: i64,
    pub change: i64,
    pub change_percent: f64,
    /// Combined sell + buy volume of the recent snapshot.
    pub volume: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOverview {
    pub total_items: i64,
    /// Items with a snapshot in the recent window.
    pub active_items: i64,
    pub total_volume: i64,
    pub top_gainers: Vec<Mover>,
    pub top_losers: Vec<Mover>,
    pub most_traded: Vec<Mover>,
    pub updated_at: i64,
}
