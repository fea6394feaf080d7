use chrono::Utc;
use tracing::{debug, info, warn};

use super::Collector;
use crate::client::FetchError;
use crate::db::state::keys;
use crate::error::Result;
use crate::shutdown::Shutdown;
use crate::types::PriceSnapshot;

/// Poll time truncated to the minute, so every snapshot from one poll shares
/// a key and a repeated poll within the minute overwrites rather than adds.
pub fn poll_time(now_secs: i64) -> i64 {
    now_secs - now_secs.rem_euclid(60)
}

impl Collector {
    /// One bulk latest-price poll. Returns the number of snapshots written.
    pub async fn poll_latest(&self, shutdown: &mut Shutdown) -> Result<usize> {
        let inner = &self.inner;
        inner.client.backoff().wait(shutdown).await?;

        let time = poll_time(Utc::now().timestamp());
        let written = match inner.client.fetch_latest_prices().await {
            Ok(prices) => {
                let snapshots: Vec<PriceSnapshot> =
                    prices.into_iter().map(|p| p.into_snapshot(time)).collect();
                self.record_prices(&snapshots, time).await?
            }
            Err(FetchError::Decode(e)) => {
                warn!("Bulk price payload malformed ({e}), polling stale items individually");
                self.poll_stale_items(shutdown, time).await?
            }
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now().timestamp();
        self.record_state(keys::LAST_POLL_AT, &now.to_string()).await;
        self.record_state(keys::LAST_POLL_COUNT, &written.to_string()).await;
        info!(count = written, time, "Bulk poll complete: {written} snapshots");

        self.spawn_overview_refresh();
        Ok(written)
    }

    /// Fallback when the bulk call is unusable: one call per stalest item,
    /// paced like any other per-item work.
    async fn poll_stale_items(&self, shutdown: &mut Shutdown, time: i64) -> Result<usize> {
        let inner = &self.inner;
        let stale = inner.storage.needs_price_update(inner.cfg.batch_size as i64).await?;
        let mut written = 0;

        for (i, item) in stale.iter().enumerate() {
            if i > 0 {
                shutdown.sleep(inner.cfg.per_call_delay()).await?;
            }
            inner.client.backoff().wait(shutdown).await?;

            // Every answered item advances its marker, active or not, so
            // inactive or malformed items cannot pin the head of the queue.
            let stored = match inner.client.fetch_item_price(item.id).await {
                Ok(price) => self.record_stale_item(item.id, price.into_snapshot(time), time).await,
                Err(FetchError::RateLimited { .. }) => {
                    warn!(item_id = item.id, "Rate limited during stale poll, stopping");
                    break;
                }
                Err(FetchError::Decode(e)) => {
                    warn!(item_id = item.id, "Malformed price payload: {e}");
                    inner.storage.mark_collected(&[item.id], time).await.map(|_| 0)
                }
                Err(e) => {
                    warn!(item_id = item.id, "Price fetch failed: {e}");
                    continue;
                }
            };
            match stored {
                Ok(n) => written += n,
                Err(e) => warn!(item_id = item.id, "Failed to store stale poll result: {e}"),
            }
        }
        Ok(written)
    }

    /// Write one polled snapshot if it shows activity, and mark the item
    /// collected either way.
    async fn record_stale_item(&self, item_id: i64, snapshot: PriceSnapshot, time: i64) -> Result<usize> {
        let written = self.record_prices(std::slice::from_ref(&snapshot), time).await?;
        if written == 0 {
            self.inner.storage.mark_collected(&[item_id], time).await?;
        }
        Ok(written)
    }

    /// On-demand poll of a single item. `None` when it shows no activity.
    pub async fn refresh_item(&self, item_id: i64) -> Result<Option<PriceSnapshot>> {
        let mut shutdown = self.shutdown_signal();
        self.inner.client.backoff().wait(&mut shutdown).await?;
        debug!(item_id, slug = ?self.inner.catalog.slug_of(item_id), "on-demand price refresh");

        let time = poll_time(Utc::now().timestamp());
        let snapshot = self.inner.client.fetch_item_price(item_id).await?.into_snapshot(time);
        if self.record_prices(std::slice::from_ref(&snapshot), time).await? == 0 {
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    /// Write snapshots that show activity and advance `last_collected_at`.
    async fn record_prices(&self, snapshots: &[PriceSnapshot], time: i64) -> Result<usize> {
        let active: Vec<PriceSnapshot> =
            snapshots.iter().filter(|s| s.has_activity()).cloned().collect();
        if active.is_empty() {
            debug!("no active prices in poll");
            return Ok(0);
        }
        self.inner.storage.upsert_snapshots(&active).await?;
        let ids: Vec<i64> = active.iter().map(|s| s.item_id).collect();
        self.inner.storage.mark_collected(&ids, time).await?;
        Ok(active.len())
    }
}
