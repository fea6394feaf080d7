use std::collections::{HashSet, VecDeque};

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, error, info, warn};

use super::schedule::items_per_cycle;
use super::Collector;
use crate::client::FetchError;
use crate::db::state::keys;
use crate::error::Result;
use crate::shutdown::Shutdown;
use crate::types::{HistoryPeriod, Item, TradeHistoryRecord};

/// Outcome of one backfill pass over a set of items.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackfillReport {
    /// Items whose backfill flag was set.
    pub items: usize,
    /// History rows actually inserted.
    pub records: u64,
    /// Non-throttle call failures (network, status, decode).
    pub failed_calls: usize,
    /// The pass stopped early on a throttled response.
    pub rate_limited: bool,
    /// Items attempted, including any left unmarked.
    pub processed: usize,
}

impl BackfillReport {
    fn absorb(&mut self, other: BackfillReport) {
        self.items += other.items;
        self.records += other.records;
        self.failed_calls += other.failed_calls;
        self.processed += other.processed;
        self.rate_limited |= other.rate_limited;
    }
}

enum ItemOutcome {
    Marked { records: u64, failed_calls: usize },
    RateLimited,
    StorageFailed,
}

impl Collector {
    /// One incremental cycle: the next `items_per_cycle` items still waiting
    /// for history.
    pub async fn backfill_batch(&self, shutdown: &mut Shutdown) -> Result<BackfillReport> {
        let limit = items_per_cycle(self.inner.cfg.batch_size);
        let items = self.inner.storage.needs_backfill(limit as i64).await?;
        if items.is_empty() {
            debug!("nothing to backfill");
            return Ok(BackfillReport::default());
        }

        let report = self.backfill_items(&items, shutdown).await?;
        let now = Utc::now().timestamp();
        self.record_state(keys::LAST_BACKFILL_AT, &now.to_string()).await;
        self.record_state(keys::LAST_BACKFILL_ITEMS, &report.items.to_string()).await;
        info!(
            items = report.items,
            records = report.records,
            failed_calls = report.failed_calls,
            rate_limited = report.rate_limited,
            "Backfill cycle complete"
        );
        Ok(report)
    }

    /// Backfill `items` in order. A throttled response abandons the rest.
    pub async fn backfill_items(&self, items: &[Item], shutdown: &mut Shutdown) -> Result<BackfillReport> {
        let mut report = BackfillReport::default();

        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                shutdown.sleep(self.inner.cfg.per_call_delay()).await?;
            }
            report.processed += 1;
            match self.backfill_item(item.id, shutdown).await? {
                ItemOutcome::Marked { records, failed_calls } => {
                    report.items += 1;
                    report.records += records;
                    report.failed_calls += failed_calls;
                }
                ItemOutcome::RateLimited => {
                    warn!(item_id = item.id, "Rate limited, abandoning rest of backfill batch");
                    report.rate_limited = true;
                    break;
                }
                ItemOutcome::StorageFailed => {}
            }
        }
        Ok(report)
    }

    /// Fetch every history period for one item, merge, and write.
    async fn backfill_item(&self, item_id: i64, shutdown: &mut Shutdown) -> Result<ItemOutcome> {
        let inner = &self.inner;
        let mut seen = HashSet::new();
        let mut records: Vec<TradeHistoryRecord> = Vec::new();
        let mut failed_calls = 0;

        for (i, period) in HistoryPeriod::ALL.iter().enumerate() {
            if i > 0 {
                shutdown.sleep(inner.cfg.per_call_delay()).await?;
            }
            inner.client.backoff().wait(shutdown).await?;

            match inner.client.fetch_history(item_id, *period).await {
                Ok(points) => {
                    // Shorter periods are finer grained; they win shared timestamps.
                    records.extend(
                        points
                            .into_iter()
                            .filter(|p| seen.insert(p.timestamp))
                            .map(|p| p.into_record(item_id)),
                    );
                }
                Err(FetchError::RateLimited { .. }) => return Ok(ItemOutcome::RateLimited),
                Err(e) => {
                    warn!(item_id, period = %period, "History fetch failed: {e}");
                    failed_calls += 1;
                }
            }
        }
        records.sort_by_key(|r| r.time);

        let inserted = match inner.storage.insert_history(&records).await {
            Ok(n) => n,
            Err(e) => {
                error!(item_id, "Failed to store history: {e}");
                return Ok(ItemOutcome::StorageFailed);
            }
        };
        let now = Utc::now().timestamp();
        if let Err(e) = inner.storage.mark_backfilled(item_id, now).await {
            error!(item_id, "Failed to mark item backfilled: {e}");
            return Ok(ItemOutcome::StorageFailed);
        }

        debug!(item_id, fetched = records.len(), inserted, failed_calls, "item backfilled");
        Ok(ItemOutcome::Marked { records: inserted, failed_calls })
    }

    /// Re-backfill the whole catalog, then refresh derived tables.
    pub async fn run_full_backfill(&self, shutdown: &mut Shutdown) -> Result<BackfillReport> {
        let inner = &self.inner;
        let reset = inner.storage.reset_backfill_flags().await?;
        info!(items = reset, "Full backfill starting");

        let mut queue: VecDeque<Item> = inner
            .storage
            .needs_backfill(i64::MAX)
            .await?
            .into();
        let per_cycle = items_per_cycle(inner.cfg.batch_size);
        let mut report = BackfillReport::default();

        while !queue.is_empty() {
            let take = per_cycle.min(queue.len());
            let batch: Vec<Item> = queue.drain(..take).collect();
            let pass = self.backfill_items(&batch, shutdown).await?;

            if pass.rate_limited {
                // The throttled item and everything after it go back to the
                // front; the next attempt waits out the backoff first.
                for item in batch.into_iter().skip(pass.processed - 1).rev() {
                    queue.push_front(item);
                }
            }
            report.absorb(pass);
            debug!(remaining = queue.len(), "full backfill progress");
        }

        let today = Utc::now().date_naive();
        for date in [today - ChronoDuration::days(1), today] {
            match inner.storage.refresh_daily_aggregates(date).await {
                Ok(rows) => debug!(date = %date, rows, "daily aggregates refreshed"),
                Err(e) => error!(date = %date, "Daily aggregate refresh failed: {e}"),
            }
        }
        if let Err(e) = self.refresh_overview().await {
            warn!("Overview refresh after full backfill failed: {e}");
        }
        self.record_state(keys::LAST_FULL_BACKFILL_DATE, &today.to_string()).await;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::test_support::collector_for;
    use crate::shutdown;
    use crate::types::ItemUpsert;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn seed(collector: &Collector, ids: &[i64]) {
        let items: Vec<ItemUpsert> = ids
            .iter()
            .map(|&id| ItemUpsert {
                id,
                slug: format!("item-{id}"),
                display_name: format!("Item {id}"),
                category: None,
            })
            .collect();
        collector.storage().upsert_items(&items, 0).await.unwrap();
    }

    async fn mount_history(server: &MockServer, id: i64, period: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/prices/history/{id}")))
            .and(query_param("period", period))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn periods_are_merged_and_deduped_first_period_wins() {
        let server = MockServer::start().await;
        mount_history(&server, 1, "1d", r#"[{"timestamp": 200, "lowest_sell": 11, "volume": 1}]"#).await;
        mount_history(
            &server,
            1,
            "7d",
            r#"[{"timestamp": 200, "lowest_sell": 99}, {"timestamp": 100, "lowest_sell": 10}]"#,
        )
        .await;
        mount_history(&server, 1, "30d", "[]").await;
        mount_history(&server, 1, "1y", r#"[{"timestamp": 100, "lowest_sell": 98}]"#).await;

        let collector = collector_for(&server, 4).await;
        seed(&collector, &[1]).await;

        let (_trigger, mut sd) = shutdown::channel();
        let report = collector.backfill_batch(&mut sd).await.unwrap();
        assert_eq!(report.items, 1);
        assert_eq!(report.records, 2);
        assert_eq!(report.failed_calls, 0);

        let history = collector.storage().history_between(1, 0, 1_000).await.unwrap();
        let prices: Vec<(i64, i64)> = history.iter().map(|r| (r.time, r.lowest_sell)).collect();
        assert_eq!(prices, vec![(100, 10), (200, 11)]);
        assert!(collector.storage().get_item(1).await.unwrap().unwrap().backfill_complete);
    }

    #[tokio::test]
    async fn partial_failures_still_mark_the_item() {
        let server = MockServer::start().await;
        mount_history(&server, 2, "1d", r#"[{"timestamp": 50, "lowest_sell": 5}]"#).await;
        mount_history(&server, 2, "7d", "garbage").await;
        Mock::given(method("GET"))
            .and(path("/prices/history/2"))
            .and(query_param("period", "30d"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_history(&server, 2, "1y", "[]").await;

        let collector = collector_for(&server, 4).await;
        seed(&collector, &[2]).await;

        let (_trigger, mut sd) = shutdown::channel();
        let report = collector.backfill_batch(&mut sd).await.unwrap();
        assert_eq!(report.items, 1);
        assert_eq!(report.failed_calls, 2);
        assert_eq!(collector.storage().count_backfilled().await.unwrap(), 1);
        assert_eq!(collector.storage().count_history_for(2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn throttle_abandons_batch_and_leaves_item_unmarked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices/history/3"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/prices/history/4"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(0)
            .mount(&server)
            .await;

        let collector = collector_for(&server, 8).await;
        seed(&collector, &[3, 4]).await;

        let (_trigger, mut sd) = shutdown::channel();
        let report = collector.backfill_batch(&mut sd).await.unwrap();
        assert!(report.rate_limited);
        assert_eq!(report.items, 0);
        assert_eq!(collector.storage().count_backfilled().await.unwrap(), 0);
        assert!(collector.inner.client.backoff().remaining().is_some());
    }

    #[tokio::test]
    async fn full_backfill_requeues_everything_and_records_date() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prices/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;
        for id in [5, 6, 7] {
            for period in ["1d", "7d", "30d", "1y"] {
                mount_history(&server, id, period, "[]").await;
            }
        }

        let collector = collector_for(&server, 4).await;
        seed(&collector, &[5, 6, 7]).await;
        collector.storage().mark_backfilled(5, 10).await.unwrap();

        let (_trigger, mut sd) = shutdown::channel();
        let report = collector.run_full_backfill(&mut sd).await.unwrap();
        assert_eq!(report.items, 3);
        assert_eq!(collector.storage().count_backfilled().await.unwrap(), 3);

        let date = collector.storage().get_state(keys::LAST_FULL_BACKFILL_DATE).await.unwrap();
        assert_eq!(date, Some(Utc::now().date_naive().to_string()));
        assert!(collector.storage().load_overview().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancelled_backfill_stops_between_calls() {
        let server = MockServer::start().await;
        let collector = collector_for(&server, 4).await;
        seed(&collector, &[9]).await;

        let (trigger, mut sd) = shutdown::channel();
        trigger.trigger();
        assert!(collector.backfill_batch(&mut sd).await.is_err());
        assert_eq!(collector.storage().count_backfilled().await.unwrap(), 0);
    }
}
