use chrono::{DateTime, Duration, NaiveTime, Utc};

use crate::config::DAILY_BACKFILL_HOUR_UTC;
use crate::types::HistoryPeriod;

/// Items a backfill cycle can cover when each item costs one call per history
/// period and the cycle has `batch_size` calls to spend. Never below one.
pub fn items_per_cycle(batch_size: usize) -> usize {
    (batch_size / HistoryPeriod::ALL.len()).max(1)
}

/// Next daily-backfill start strictly after `now`.
pub fn next_daily_run(now: DateTime<Utc>) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(DAILY_BACKFILL_HOUR_UTC, 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}
