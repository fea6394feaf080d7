use crate::db::Storage;
use crate::error::Result;

/// Keys used in the `collector_state` table.
pub mod keys {
    pub const LAST_POLL_AT: &str = "last_poll_at";
    pub const LAST_POLL_COUNT: &str = "last_poll_count";
    pub const LAST_BACKFILL_AT: &str = "last_backfill_at";
    pub const LAST_BACKFILL_ITEMS: &str = "last_backfill_items";
    pub const LAST_CATALOG_REFRESH_AT: &str = "last_catalog_refresh_at";
    pub const LAST_FULL_BACKFILL_DATE: &str = "last_full_backfill_date";
    pub const LAST_OVERVIEW_REFRESH_AT: &str = "last_overview_refresh_at";
}

impl Storage {
    pub async fn set_state(&self, key: &str, value: &str, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO collector_state (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM collector_state WHERE key = ?")
                .bind(key)
                .fetch_optional(self.pool())
                .await?;
        Ok(value)
    }

    /// Integer-valued state; unparsable values read as absent.
    pub async fn get_state_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get_state(key).await?.and_then(|v| v.parse().ok()))
    }
}
