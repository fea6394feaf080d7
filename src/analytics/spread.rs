use serde::Serialize;

use super::{mean, now_secs, Analytics};
use crate::db::bucket::bucket_start;
use crate::error::{AppError, Result};
use crate::types::PriceSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpreadAnalysis {
    pub item_id: i64,
    pub hours: i64,
    /// Snapshots in the window with both sides active.
    pub samples: usize,
    pub current_spread: Option<i64>,
    pub current_spread_percent: Option<f64>,
    pub average_spread: Option<f64>,
    pub average_spread_percent: Option<f64>,
    pub min_spread: Option<i64>,
    pub max_spread: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyVolume {
    /// Hour start, unix seconds.
    pub hour: i64,
    pub sell_volume: i64,
    pub buy_volume: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeAnalysis {
    pub item_id: i64,
    pub hours: i64,
    pub total_sell_volume: i64,
    pub total_buy_volume: i64,
    pub average_sell_volume: Option<f64>,
    pub average_buy_volume: Option<f64>,
    pub hourly: Vec<HourlyVolume>,
}

impl Analytics {
    pub async fn spread_analysis(&self, item_id: i64, hours: i64) -> Result<SpreadAnalysis> {
        let snapshots = self.recent_snapshots(item_id, hours).await?;
        Ok(summarize_spreads(item_id, hours, &snapshots))
    }

    pub async fn volume_analysis(&self, item_id: i64, hours: i64) -> Result<VolumeAnalysis> {
        let snapshots = self.recent_snapshots(item_id, hours).await?;
        Ok(summarize_volume(item_id, hours, &snapshots))
    }

    async fn recent_snapshots(&self, item_id: i64, hours: i64) -> Result<Vec<PriceSnapshot>> {
        if hours <= 0 {
            return Err(AppError::InvalidRequest("hours must be positive".into()));
        }
        let now = now_secs();
        self.storage()
            .snapshots_between(item_id, now - hours * 3_600, now)
            .await
    }
}

pub fn summarize_spreads(item_id: i64, hours: i64, snapshots: &[PriceSnapshot]) -> SpreadAnalysis {
    let two_sided: Vec<&PriceSnapshot> = snapshots.iter().filter(|s| s.spread().is_some()).collect();
    let spreads: Vec<i64> = two_sided.iter().filter_map(|s| s.spread()).collect();
    let spreads_f: Vec<f64> = spreads.iter().map(|&s| s as f64).collect();
    let percents: Vec<f64> = two_sided.iter().filter_map(|s| s.spread_percent()).collect();
    let current = snapshots.last();

    SpreadAnalysis {
        item_id,
        hours,
        samples: spreads.len(),
        current_spread: current.and_then(PriceSnapshot::spread),
        current_spread_percent: current.and_then(PriceSnapshot::spread_percent),
        average_spread: mean(&spreads_f),
        average_spread_percent: mean(&percents),
        min_spread: spreads.iter().copied().min(),
        max_spread: spreads.iter().copied().max(),
    }
}

pub fn summarize_volume(item_id: i64, hours: i64, snapshots: &[PriceSnapshot]) -> VolumeAnalysis {
    let sells: Vec<f64> = snapshots.iter().map(|s| s.sell_volume as f64).collect();
    let buys: Vec<f64> = snapshots.iter().map(|s| s.buy_volume as f64).collect();

    let mut hourly: Vec<HourlyVolume> = Vec::new();
    for s in snapshots {
        let hour = bucket_start(s.time, 3_600);
        match hourly.last_mut() {
            Some(h) if h.hour == hour => {
                h.sell_volume += s.sell_volume;
                h.buy_volume += s.buy_volume;
            }
            _ => hourly.push(HourlyVolume {
                hour,
                sell_volume: s.sell_volume,
                buy_volume: s.buy_volume,
            }),
        }
    }

    VolumeAnalysis {
        item_id,
        hours,
        total_sell_volume: snapshots.iter().map(|s| s.sell_volume).sum(),
        total_buy_volume: snapshots.iter().map(|s| s.buy_volume).sum(),
        average_sell_volume: mean(&sells),
        average_buy_volume: mean(&buys),
        hourly,
    }
}
