use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::{now_secs, Analytics};
use crate::config::tolerance::{COMPARISON_SECS, RECENT_SECS};
use crate::config::OVERVIEW_FRESHNESS_SECS;
use crate::error::{AppError, Result};
use crate::types::{MarketOverview, Mover, PriceSnapshot};

const OVERVIEW_LIMIT: usize = 10;
const OVERVIEW_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Movers {
    pub gainers: Vec<Mover>,
    pub losers: Vec<Mover>,
}

impl Analytics {
    /// Largest percentage gainers and losers over the last `hours`.
    pub async fn top_movers(&self, hours: i64, limit: usize) -> Result<Movers> {
        let candidates = self.mover_candidates(now_secs(), hours).await?;
        Ok(rank_movers(candidates, limit))
    }

    /// Items with the highest combined sell + buy volume in their latest
    /// snapshot, among those with a comparable price `hours` ago.
    pub async fn most_traded(&self, hours: i64, limit: usize) -> Result<Vec<Mover>> {
        let candidates = self.mover_candidates(now_secs(), hours).await?;
        Ok(rank_by_volume(candidates, limit))
    }

    /// Cached overview when younger than the freshness window, otherwise a
    /// live computation.
    pub async fn market_overview(&self) -> Result<MarketOverview> {
        match self.storage().load_overview().await {
            Ok(Some(cached)) if now_secs() - cached.updated_at < OVERVIEW_FRESHNESS_SECS => {
                return Ok(cached)
            }
            Ok(_) => debug!("overview cache stale or missing, computing live"),
            Err(e) => warn!("Failed to read overview cache: {e}"),
        }
        self.compute_overview().await
    }

    pub async fn compute_overview(&self) -> Result<MarketOverview> {
        let now = now_secs();
        let storage = self.storage();
        let total_items = storage.count_items().await?;

        let recent = storage.latest_snapshots_since(now - RECENT_SECS).await?;
        let active_items = recent.len() as i64;
        let total_volume = recent
            .iter()
            .map(|(s, _)| s.sell_volume + s.buy_volume)
            .sum();

        let candidates = self.pair_with_past(recent, now, OVERVIEW_HOURS).await?;
        let movers = rank_movers(candidates.clone(), OVERVIEW_LIMIT);
        let most_traded = rank_by_volume(candidates, OVERVIEW_LIMIT);

        Ok(MarketOverview {
            total_items,
            active_items,
            total_volume,
            top_gainers: movers.gainers,
            top_losers: movers.losers,
            most_traded,
            updated_at: now,
        })
    }

    async fn mover_candidates(&self, now: i64, hours: i64) -> Result<Vec<Mover>> {
        if hours <= 0 {
            return Err(AppError::InvalidRequest("hours must be positive".into()));
        }
        let recent = self.storage().latest_snapshots_since(now - RECENT_SECS).await?;
        self.pair_with_past(recent, now, hours).await
    }

    /// Pair each recent snapshot with the item's snapshot nearest the
    /// lookback horizon. Items without a comparable past price drop out.
    async fn pair_with_past(
        &self,
        recent: Vec<(PriceSnapshot, Option<String>)>,
        now: i64,
        hours: i64,
    ) -> Result<Vec<Mover>> {
        let past: HashMap<i64, i64> = self
            .storage()
            .snapshots_near_all(now - hours * 3_600, COMPARISON_SECS)
            .await?
            .into_iter()
            .map(|s| (s.item_id, s.sell_price))
            .collect();

        Ok(recent
            .into_iter()
            .filter_map(|(current, name)| {
                let previous = *past.get(&current.item_id)?;
                to_mover(&current, name, previous)
            })
            .collect())
    }
}

fn to_mover(current: &PriceSnapshot, name: Option<String>, previous: i64) -> Option<Mover> {
    if previous <= 0 || current.sell_price <= 0 {
        return None;
    }
    let change = current.sell_price - previous;
    Some(Mover {
        item_id: current.item_id,
        name,
        previous_price: previous,
        current_price: current.sell_price,
        change,
        change_percent: change as f64 / previous as f64 * 100.0,
        volume: current.sell_volume + current.buy_volume,
    })
}

fn by_percent(a: &Mover, b: &Mover) -> Ordering {
    a.change_percent
        .partial_cmp(&b.change_percent)
        .unwrap_or(Ordering::Equal)
        .then(a.item_id.cmp(&b.item_id))
}

pub fn rank_movers(candidates: Vec<Mover>, limit: usize) -> Movers {
    let mut gainers: Vec<Mover> = candidates.iter().filter(|m| m.change > 0).cloned().collect();
    gainers.sort_by(|a, b| by_percent(b, a));
    gainers.truncate(limit);

    let mut losers: Vec<Mover> = candidates.into_iter().filter(|m| m.change < 0).collect();
    losers.sort_by(by_percent);
    losers.truncate(limit);

    Movers { gainers, losers }
}

pub fn rank_by_volume(mut candidates: Vec<Mover>, limit: usize) -> Vec<Mover> {
    candidates.retain(|m| m.volume > 0);
    candidates.sort_by(|a, b| b.volume.cmp(&a.volume).then(a.item_id.cmp(&b.item_id)));
    candidates.truncate(limit);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_storage;
    use crate::types::ItemUpsert;

    fn snap(time: i64, item_id: i64, sell: i64, volume: i64) -> PriceSnapshot {
        PriceSnapshot {
            time,
            item_id,
            sell_price: sell,
            sell_volume: volume,
            buy_price: 0,
            buy_volume: 0,
        }
    }

    fn mover(item_id: i64, change_percent: f64, volume: i64) -> Mover {
        Mover {
            item_id,
            name: None,
            previous_price: 100,
            current_price: 100 + change_percent as i64,
            change: change_percent as i64,
            change_percent,
            volume,
        }
    }

    #[test]
    fn ranking_splits_gainers_and_losers() {
        let candidates = vec![
            mover(1, 5.0, 1),
            mover(2, -20.0, 9),
            mover(3, 50.0, 3),
            mover(4, 0.0, 0),
            mover(5, -1.0, 4),
        ];
        let m = rank_movers(candidates.clone(), 10);
        let gainers: Vec<i64> = m.gainers.iter().map(|m| m.item_id).collect();
        let losers: Vec<i64> = m.losers.iter().map(|m| m.item_id).collect();
        assert_eq!(gainers, vec![3, 1]);
        assert_eq!(losers, vec![2, 5]);

        let traded: Vec<i64> = rank_by_volume(candidates, 2).iter().map(|m| m.item_id).collect();
        assert_eq!(traded, vec![2, 5]);
    }

    #[tokio::test]
    async fn movers_compare_recent_against_horizon() {
        let storage = test_storage().await;
        storage
            .upsert_items(
                &[ItemUpsert { id: 1, slug: "iron-ore".into(), display_name: "Iron Ore".into(), category: None }],
                0,
            )
            .await
            .unwrap();
        let now = now_secs();
        storage
            .upsert_snapshots(&[
                snap(now - 24 * 3_600 + 600, 1, 100, 1),
                snap(now - 60, 1, 120, 7),
                // no past price within tolerance
                snap(now - 60, 2, 50, 100),
                // stale "recent" snapshot
                snap(now - 24 * 3_600, 3, 10, 1),
                snap(now - 5 * 3_600, 3, 30, 1),
            ])
            .await
            .unwrap();

        let analytics = Analytics::new(storage);
        let movers = analytics.top_movers(24, 5).await.unwrap();
        assert_eq!(movers.gainers.len(), 1);
        let g = &movers.gainers[0];
        assert_eq!((g.item_id, g.previous_price, g.current_price), (1, 100, 120));
        assert!((g.change_percent - 20.0).abs() < 1e-9);
        assert_eq!(g.name.as_deref(), Some("Iron Ore"));
        assert!(movers.losers.is_empty());

        let overview = analytics.compute_overview().await.unwrap();
        assert_eq!(overview.total_items, 1);
        assert_eq!(overview.active_items, 2);
        assert_eq!(overview.total_volume, 107);
        assert_eq!(overview.most_traded.len(), 1);
    }

    #[tokio::test]
    async fn overview_served_from_cache_only_while_fresh() {
        let storage = test_storage().await;
        let analytics = Analytics::new(storage.clone());

        let mut cached = analytics.compute_overview().await.unwrap();
        cached.total_items = 999;
        storage.save_overview(&cached).await.unwrap();
        assert_eq!(analytics.market_overview().await.unwrap().total_items, 999);

        cached.updated_at -= OVERVIEW_FRESHNESS_SECS + 1;
        storage.save_overview(&cached).await.unwrap();
        assert_eq!(analytics.market_overview().await.unwrap().total_items, 0);
    }
}
