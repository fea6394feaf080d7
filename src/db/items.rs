use crate::db::models::ItemRow;
use crate::db::Storage;
use crate::error::Result;
use crate::types::{Item, ItemUpsert};

const ITEM_COLUMNS: &str = "id, slug, display_name, category, last_collected_at, \
     backfill_complete, last_backfilled_at, updated_at";

impl Storage {
    /// Insert or update catalog entries keyed by id.
    ///
    /// A `None` category inserts `other` for new items and leaves the stored
    /// category untouched for existing ones. `updated_at` only moves when the
    /// slug, name or category actually changed.
    pub async fn upsert_items(&self, items: &[ItemUpsert], now: i64) -> Result<u64> {
        let mut tx = self.pool().begin().await?;
        let mut written = 0u64;

        for item in items {
            let category = item.category.map(|c| c.to_string());
            let res = sqlx::query(
                r#"
                INSERT INTO items (id, slug, display_name, category, updated_at)
                VALUES (?1, ?2, ?3, COALESCE(?4, 'other'), ?5)
                ON CONFLICT(id) DO UPDATE SET
                    updated_at = CASE
                        WHEN items.slug != excluded.slug
                          OR items.display_name != excluded.display_name
                          OR items.category != COALESCE(?4, items.category)
                        THEN excluded.updated_at
                        ELSE items.updated_at
                    END,
                    slug = excluded.slug,
                    display_name = excluded.display_name,
                    category = COALESCE(?4, items.category)
                "#,
            )
            .bind(item.id)
            .bind(&item.slug)
            .bind(&item.display_name)
            .bind(category)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            written += res.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    pub async fn get_item(&self, id: i64) -> Result<Option<Item>> {
        let row: Option<ItemRow> =
            sqlx::query_as(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(Item::from))
    }

    pub async fn list_items(&self) -> Result<Vec<Item>> {
        let rows: Vec<ItemRow> =
            sqlx::query_as(&format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY id"))
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(Item::from).collect())
    }

    /// Priority queue for price collection: never-collected items first, then
    /// the stalest.
    pub async fn needs_price_update(&self, limit: i64) -> Result<Vec<Item>> {
        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM items
            ORDER BY last_collected_at IS NOT NULL, last_collected_at ASC, id ASC
            LIMIT ?
            "#
        ))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Item::from).collect())
    }

    /// Items still waiting for a history backfill: never-backfilled first,
    /// then oldest-updated.
    pub async fn needs_backfill(&self, limit: i64) -> Result<Vec<Item>> {
        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM items
            WHERE backfill_complete = 0
            ORDER BY last_backfilled_at IS NOT NULL, updated_at ASC, id ASC
            LIMIT ?
            "#
        ))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(Item::from).collect())
    }

    /// Record that a snapshot at `time` was written for each id. Never moves
    /// `last_collected_at` backwards.
    pub async fn mark_collected(&self, item_ids: &[i64], time: i64) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for id in item_ids {
            sqlx::query(
                "UPDATE items SET last_collected_at = MAX(COALESCE(last_collected_at, 0), ?1) WHERE id = ?2",
            )
            .bind(time)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn mark_backfilled(&self, item_id: i64, now: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE items
            SET backfill_complete = 1, last_backfilled_at = ?1, updated_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(now)
        .bind(item_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Clear every backfill flag so the whole catalog is queued again.
    pub async fn reset_backfill_flags(&self) -> Result<u64> {
        let res = sqlx::query("UPDATE items SET backfill_complete = 0")
            .execute(self.pool())
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn count_items(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(self.pool())
            .await?;
        Ok(n)
    }

    pub async fn count_backfilled(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE backfill_complete = 1")
            .fetch_one(self.pool())
            .await?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_storage;
    use crate::types::{Category, ItemUpsert};

    fn entry(id: i64, slug: &str, category: Option<Category>) -> ItemUpsert {
        ItemUpsert {
            id,
            slug: slug.to_string(),
            display_name: slug.to_string(),
            category,
        }
    }

    #[tokio::test]
    async fn needs_price_update_orders_never_collected_first() {
        let storage = test_storage().await;
        storage
            .upsert_items(
                &[entry(1, "a", None), entry(2, "b", None), entry(3, "c", None)],
                0,
            )
            .await
            .unwrap();
        // item 1 collected at t2, item 3 at t1 < t2, item 2 never.
        storage.mark_collected(&[1], 2_000).await.unwrap();
        storage.mark_collected(&[3], 1_000).await.unwrap();

        let order: Vec<i64> = storage
            .needs_price_update(10)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn mark_collected_never_moves_backwards() {
        let storage = test_storage().await;
        storage.upsert_items(&[entry(1, "a", None)], 0).await.unwrap();
        storage.mark_collected(&[1], 2_000).await.unwrap();
        storage.mark_collected(&[1], 1_000).await.unwrap();

        let item = storage.get_item(1).await.unwrap().unwrap();
        assert_eq!(item.last_collected_at, Some(2_000));
    }

    #[tokio::test]
    async fn empty_category_guess_keeps_stored_category() {
        let storage = test_storage().await;
        storage
            .upsert_items(&[entry(7, "iron-sword", Some(Category::Weapon))], 10)
            .await
            .unwrap();
        storage
            .upsert_items(&[entry(7, "iron-sword", None)], 20)
            .await
            .unwrap();

        let item = storage.get_item(7).await.unwrap().unwrap();
        assert_eq!(item.category, Category::Weapon);
        // Nothing changed, so the row keeps its original update time.
        assert_eq!(item.updated_at, 10);

        storage.upsert_items(&[entry(8, "mystery", None)], 20).await.unwrap();
        let fresh = storage.get_item(8).await.unwrap().unwrap();
        assert_eq!(fresh.category, Category::Other);
    }

    #[tokio::test]
    async fn backfill_queue_prefers_never_backfilled_then_oldest() {
        let storage = test_storage().await;
        storage.upsert_items(&[entry(1, "a", None)], 100).await.unwrap();
        storage.upsert_items(&[entry(2, "b", None)], 50).await.unwrap();
        storage.upsert_items(&[entry(3, "c", None)], 10).await.unwrap();

        storage.mark_backfilled(3, 500).await.unwrap();
        storage.mark_backfilled(1, 400).await.unwrap();
        assert_eq!(storage.count_backfilled().await.unwrap(), 2);

        let pending: Vec<i64> = storage
            .needs_backfill(10)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(pending, vec![2]);

        assert_eq!(storage.reset_backfill_flags().await.unwrap(), 3);
        let pending: Vec<i64> = storage
            .needs_backfill(10)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        // 2 was never backfilled; then 1 (updated 400) before 3 (updated 500).
        assert_eq!(pending, vec![2, 1, 3]);
    }
}
