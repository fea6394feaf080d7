//! Collector supervisor. Owns the shared rate budget (one [`MarketClient`]
//! and its backoff) and runs the periodic activities against it:
//!
//! - catalog refresh, hourly
//! - bulk latest-price poll, every minute
//! - incremental history backfill, every two minutes
//! - full backfill, daily at 03:00 UTC
//!
//! There is no ordering between cadences. Concurrent writes to the same item
//! are settled by each table's conflict rule.

pub mod backfill;
pub mod poll;
pub mod schedule;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::analytics::Analytics;
use crate::catalog::Catalog;
use crate::client::{Backoff, MarketClient};
use crate::config::{Config, BACKFILL_INTERVAL_SECS, CATALOG_REFRESH_SECS, POLL_INTERVAL_SECS};
use crate::db::state::keys;
use crate::db::Storage;
use crate::error::Result;
use crate::shutdown::{self, Shutdown, ShutdownTrigger};

use schedule::next_daily_run;

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub total_items: i64,
    pub catalog_size: usize,
    pub snapshot_count: i64,
    pub history_count: i64,
    pub last_poll_at: Option<i64>,
    pub last_poll_count: Option<i64>,
    pub last_backfill_at: Option<i64>,
    pub last_catalog_refresh_at: Option<i64>,
    pub backoff_active: bool,
    pub backoff_secs: u64,
    pub full_backfill_running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillStatus {
    pub total_items: i64,
    pub backfilled_items: i64,
    pub pending_items: i64,
    pub needs_backfill: bool,
    pub running: bool,
    pub last_full_backfill_date: Option<String>,
}

struct Inner {
    cfg: Config,
    client: MarketClient,
    storage: Storage,
    catalog: Catalog,
    analytics: Analytics,
    shutdown: ShutdownTrigger,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    full_backfill_running: AtomicBool,
}

/// Constructed once and shared by clone.
#[derive(Clone)]
pub struct Collector {
    inner: Arc<Inner>,
}

impl Collector {
    pub fn new(cfg: Config, client: MarketClient, storage: Storage, analytics: Analytics) -> Self {
        let (trigger, _) = shutdown::channel();
        let catalog = Catalog::new(client.clone(), storage.clone());
        Self {
            inner: Arc::new(Inner {
                cfg,
                client,
                storage,
                catalog,
                analytics,
                shutdown: trigger,
                tasks: Mutex::new(Vec::new()),
                full_backfill_running: AtomicBool::new(false),
            }),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    pub fn backoff(&self) -> &Backoff {
        self.inner.client.backoff()
    }

    fn shutdown_signal(&self) -> Shutdown {
        self.inner.shutdown.subscribe()
    }

    /// Spawn the periodic loops.
    pub fn start(&self) {
        info!(
            batch_size = self.inner.cfg.batch_size,
            per_call_ms = self.inner.cfg.per_call_delay().as_millis() as u64,
            "Collector starting"
        );
        let c = self.clone();
        self.spawn_tracked(async move { c.catalog_loop().await });
        let c = self.clone();
        self.spawn_tracked(async move { c.poll_loop().await });
        let c = self.clone();
        self.spawn_tracked(async move { c.backfill_loop().await });
        let c = self.clone();
        self.spawn_tracked(async move { c.daily_loop().await });
    }

    /// Signal shutdown and wait for every tracked task, including detached
    /// overview refreshes and a running full backfill.
    pub async fn stop(&self) {
        self.inner.shutdown.trigger();
        loop {
            let handles = std::mem::take(&mut *self.inner.tasks.lock());
            if handles.is_empty() {
                break;
            }
            for res in join_all(handles).await {
                if let Err(e) = res {
                    warn!("Collector task ended abnormally: {e}");
                }
            }
        }
        info!("Collector stopped");
    }

    /// Spawn a task whose completion `stop()` waits for. Refused once
    /// shutdown has started.
    fn spawn_tracked<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown_signal().is_triggered() {
            return false;
        }
        let handle = tokio::spawn(fut);
        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
        true
    }

    async fn catalog_loop(self) {
        let mut shutdown = self.shutdown_signal();
        let mut ticker = interval(Duration::from_secs(CATALOG_REFRESH_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.triggered() => break,
            }
            match self.inner.catalog.refresh(false).await {
                Ok(_) => {
                    let now = Utc::now().timestamp();
                    self.record_state(keys::LAST_CATALOG_REFRESH_AT, &now.to_string()).await;
                }
                Err(e) => error!("Catalog refresh failed: {e}"),
            }
        }
        debug!("catalog loop exited");
    }

    async fn poll_loop(self) {
        let mut shutdown = self.shutdown_signal();
        let mut ticker = interval(Duration::from_secs(POLL_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.triggered() => break,
            }
            if let Err(e) = self.poll_latest(&mut shutdown).await {
                if shutdown.is_triggered() {
                    break;
                }
                error!("Bulk poll failed: {e}");
            }
        }
        debug!("poll loop exited");
    }

    async fn backfill_loop(self) {
        let mut shutdown = self.shutdown_signal();
        let mut ticker = interval(Duration::from_secs(BACKFILL_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.triggered() => break,
            }
            if self.is_full_backfill_running() {
                debug!("Full backfill in progress, skipping incremental cycle");
                continue;
            }
            if let Err(e) = self.backfill_batch(&mut shutdown).await {
                if shutdown.is_triggered() {
                    break;
                }
                error!("Incremental backfill failed: {e}");
            }
        }
        debug!("backfill loop exited");
    }

    async fn daily_loop(self) {
        let mut shutdown = self.shutdown_signal();

        loop {
            let now = Utc::now();
            let next = next_daily_run(now);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "Next full backfill scheduled");

            if shutdown.sleep(wait).await.is_err() {
                break;
            }

            let date = next.date_naive().to_string();
            match self.should_run_full_backfill(&date).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(date = %date, "Full backfill already ran for this date, skipping");
                    continue;
                }
                Err(e) => warn!("Could not check last full backfill date: {e}"),
            }

            if !self.trigger_full_backfill() {
                warn!("Scheduled full backfill skipped: one is already running");
            }
        }
        debug!("daily loop exited");
    }

    /// Claim the scheduled full backfill for `date`. False when that date was
    /// already claimed, e.g. before a restart.
    async fn should_run_full_backfill(&self, date: &str) -> Result<bool> {
        let storage = &self.inner.storage;
        if storage.get_state(keys::LAST_FULL_BACKFILL_DATE).await?.as_deref() == Some(date) {
            return Ok(false);
        }
        let now = Utc::now().timestamp();
        storage.set_state(keys::LAST_FULL_BACKFILL_DATE, date, now).await?;
        Ok(true)
    }

    /// Start a full backfill in the background. Returns false if one is
    /// already running or the collector is shutting down.
    pub fn trigger_full_backfill(&self) -> bool {
        if self.inner.full_backfill_running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let c = self.clone();
        let spawned = self.spawn_tracked(async move {
            let mut shutdown = c.shutdown_signal();
            match c.run_full_backfill(&mut shutdown).await {
                Ok(report) => info!(
                    items = report.items,
                    records = report.records,
                    failed_calls = report.failed_calls,
                    "Full backfill complete"
                ),
                Err(e) if shutdown.is_triggered() => info!("Full backfill interrupted: {e}"),
                Err(e) => error!("Full backfill failed: {e}"),
            }
            c.inner.full_backfill_running.store(false, Ordering::SeqCst);
        });
        if !spawned {
            self.inner.full_backfill_running.store(false, Ordering::SeqCst);
        }
        spawned
    }

    pub fn is_full_backfill_running(&self) -> bool {
        self.inner.full_backfill_running.load(Ordering::SeqCst)
    }

    /// Recompute the overview cache as a detached, tracked task.
    fn spawn_overview_refresh(&self) {
        let c = self.clone();
        self.spawn_tracked(async move {
            if let Err(e) = c.refresh_overview().await {
                warn!("Overview refresh failed: {e}");
            }
        });
    }

    async fn refresh_overview(&self) -> Result<()> {
        let overview = self.inner.analytics.compute_overview().await?;
        self.inner.storage.save_overview(&overview).await?;
        self.inner
            .storage
            .set_state(
                keys::LAST_OVERVIEW_REFRESH_AT,
                &overview.updated_at.to_string(),
                overview.updated_at,
            )
            .await?;
        debug!(active_items = overview.active_items, "overview cache refreshed");
        Ok(())
    }

    /// Bookkeeping writes are best-effort.
    async fn record_state(&self, key: &str, value: &str) {
        let now = Utc::now().timestamp();
        if let Err(e) = self.inner.storage.set_state(key, value, now).await {
            warn!(key, "Failed to record collector state: {e}");
        }
    }

    pub async fn collection_stats(&self) -> Result<CollectionStats> {
        let storage = &self.inner.storage;
        let backoff = self.inner.client.backoff();
        Ok(CollectionStats {
            total_items: storage.count_items().await?,
            catalog_size: self.inner.catalog.len(),
            snapshot_count: storage.count_snapshots().await?,
            history_count: storage.count_history().await?,
            last_poll_at: storage.get_state_i64(keys::LAST_POLL_AT).await?,
            last_poll_count: storage.get_state_i64(keys::LAST_POLL_COUNT).await?,
            last_backfill_at: storage.get_state_i64(keys::LAST_BACKFILL_AT).await?,
            last_catalog_refresh_at: storage.get_state_i64(keys::LAST_CATALOG_REFRESH_AT).await?,
            backoff_active: backoff.remaining().is_some(),
            backoff_secs: backoff.current_duration().as_secs(),
            full_backfill_running: self.is_full_backfill_running(),
        })
    }

    pub async fn backfill_status(&self) -> Result<BackfillStatus> {
        let storage = &self.inner.storage;
        let total_items = storage.count_items().await?;
        let backfilled_items = storage.count_backfilled().await?;
        let pending_items = total_items - backfilled_items;
        Ok(BackfillStatus {
            total_items,
            backfilled_items,
            pending_items,
            needs_backfill: pending_items > 0,
            running: self.is_full_backfill_running(),
            last_full_backfill_date: storage.get_state(keys::LAST_FULL_BACKFILL_DATE).await?,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::test_storage;
    use wiremock::MockServer;

    /// Collector wired to a mock upstream and an in-memory database, with
    /// pacing disabled.
    pub async fn collector_for(server: &MockServer, batch_size: usize) -> Collector {
        let mut cfg = Config::for_tests(&server.uri());
        cfg.batch_size = batch_size;
        let storage = test_storage().await;
        let client = MarketClient::new(&cfg).expect("client");
        let analytics = Analytics::new(storage.clone());
        Collector::new(cfg, client, storage, analytics)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::collector_for;
    use wiremock::MockServer;

    #[tokio::test]
    async fn stop_returns_promptly_with_loops_running() {
        let server = MockServer::start().await;
        let collector = collector_for(&server, 35).await;
        collector.start();

        tokio::time::timeout(std::time::Duration::from_secs(10), collector.stop())
            .await
            .expect("stop completes");
        assert!(!collector.trigger_full_backfill(), "no new work after shutdown");
    }

    #[tokio::test]
    async fn scheduled_full_backfill_runs_once_per_date() {
        let server = MockServer::start().await;
        let collector = collector_for(&server, 35).await;

        assert!(collector.should_run_full_backfill("2024-03-01").await.unwrap());
        assert!(!collector.should_run_full_backfill("2024-03-01").await.unwrap());
        assert!(collector.should_run_full_backfill("2024-03-02").await.unwrap());

        let status = collector.backfill_status().await.unwrap();
        assert_eq!(status.last_full_backfill_date.as_deref(), Some("2024-03-02"));
    }

    #[tokio::test]
    async fn backfill_status_exposes_counters() {
        let server = MockServer::start().await;
        let collector = collector_for(&server, 35).await;
        let status = collector.backfill_status().await.unwrap();
        assert_eq!(status.total_items, 0);
        assert!(!status.needs_backfill);
        assert!(!status.running);

        let stats = collector.collection_stats().await.unwrap();
        assert_eq!(stats.snapshot_count, 0);
        assert!(!stats.backoff_active);
    }
}
