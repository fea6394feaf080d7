use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::client::{CatalogEntry, MarketClient};
use crate::config::CATALOG_REFRESH_SECS;
use crate::db::Storage;
use crate::error::Result;
use crate::types::{Category, ItemUpsert};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A recent refresh is still fresh; no network call was made.
    Skipped,
    Refreshed(usize),
}

#[derive(Debug, Default)]
struct CatalogMaps {
    by_id: HashMap<i64, String>,
    by_slug: HashMap<String, i64>,
}

/// In-memory id ↔ slug map of the tradeable catalog, kept in sync with the
/// `items` table. Readers always see one complete map: a refresh builds a new
/// one and swaps it in.
pub struct Catalog {
    client: MarketClient,
    storage: Storage,
    maps: RwLock<Arc<CatalogMaps>>,
    last_success: Mutex<Option<Instant>>,
}

impl Catalog {
    pub fn new(client: MarketClient, storage: Storage) -> Self {
        Self {
            client,
            storage,
            maps: RwLock::new(Arc::new(CatalogMaps::default())),
            last_success: Mutex::new(None),
        }
    }

    /// Fetch the catalog and upsert it, unless the last successful refresh is
    /// under an hour old and something is cached. `force` bypasses the check.
    pub async fn refresh(&self, force: bool) -> Result<RefreshOutcome> {
        if !force && self.is_fresh() {
            return Ok(RefreshOutcome::Skipped);
        }

        let entries = self.client.fetch_catalog().await?;
        if entries.is_empty() {
            warn!("Catalog endpoint returned no items, keeping the current map");
            return Ok(RefreshOutcome::Refreshed(0));
        }

        let upserts: Vec<ItemUpsert> = entries.iter().map(to_upsert).collect();
        let maps = CatalogMaps {
            by_id: entries.iter().map(|e| (e.internal_id, e.slug.clone())).collect(),
            by_slug: entries.iter().map(|e| (e.slug.clone(), e.internal_id)).collect(),
        };
        *self.maps.write() = Arc::new(maps);

        let now = chrono::Utc::now().timestamp();
        self.storage.upsert_items(&upserts, now).await?;
        *self.last_success.lock() = Some(Instant::now());

        info!(items = upserts.len(), "Catalog refresh complete: {} items", upserts.len());
        Ok(RefreshOutcome::Refreshed(upserts.len()))
    }

    fn is_fresh(&self) -> bool {
        let Some(at) = *self.last_success.lock() else {
            return false;
        };
        at.elapsed() < Duration::from_secs(CATALOG_REFRESH_SECS) && !self.is_empty()
    }

    pub fn slug_of(&self, id: i64) -> Option<String> {
        self.maps.read().by_id.get(&id).cloned()
    }

    pub fn id_of(&self, slug: &str) -> Option<i64> {
        self.maps.read().by_slug.get(slug).copied()
    }

    pub fn len(&self) -> usize {
        self.maps.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn to_upsert(entry: &CatalogEntry) -> ItemUpsert {
    ItemUpsert {
        id: entry.internal_id,
        slug: entry.slug.clone(),
        display_name: display_name(&entry.slug),
        category: guess_category(&entry.slug),
    }
}

/// `iron-ore` → `Iron Ore`.
pub fn display_name(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

const CONSUMABLE_PREFIXES: &[&str] = &["potion", "elixir", "scroll", "food", "cooked", "brew", "tonic"];
const WEAPON_SLOTS: &[&str] = &["sword", "bow", "staff", "dagger", "axe", "spear", "wand", "mace"];
const ARMOR_SLOTS: &[&str] = &[
    "helmet", "helm", "chest", "plate", "gloves", "boots", "legs", "shield", "cape", "hood",
];
const ACCESSORY_SLOTS: &[&str] = &["ring", "amulet", "necklace", "earring", "bracelet", "belt"];
const MATERIALS: &[&str] = &[
    "ore", "bar", "ingot", "log", "plank", "hide", "leather", "cloth", "gem", "shard", "essence",
    "herb", "dust",
];

/// Best-effort category from the slug. `None` when nothing matches, which
/// leaves any stored category in place.
pub fn guess_category(slug: &str) -> Option<Category> {
    let slug = slug.to_lowercase();
    let first_word = slug.split(['-', '_']).next().unwrap_or("");

    if CONSUMABLE_PREFIXES.contains(&first_word) {
        return Some(Category::Consumable);
    }
    let contains_any = |needles: &[&str]| needles.iter().any(|n| slug.contains(n));
    if contains_any(ACCESSORY_SLOTS) {
        Some(Category::Accessory)
    } else if contains_any(WEAPON_SLOTS) {
        Some(Category::Weapon)
    } else if contains_any(ARMOR_SLOTS) {
        Some(Category::Armor)
    } else if contains_any(MATERIALS) {
        Some(Category::Material)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::test_storage;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn display_name_title_cases_slug() {
        assert_eq!(display_name("iron-ore"), "Iron Ore");
        assert_eq!(display_name("potion_of--HEALING"), "Potion Of Healing");
        assert_eq!(display_name(""), "");
    }

    #[test]
    fn category_heuristics() {
        assert_eq!(guess_category("potion-of-healing"), Some(Category::Consumable));
        assert_eq!(guess_category("steel-longsword"), Some(Category::Weapon));
        assert_eq!(guess_category("dragon-helmet"), Some(Category::Armor));
        assert_eq!(guess_category("gold-ring"), Some(Category::Accessory));
        assert_eq!(guess_category("mithril-ore"), Some(Category::Material));
        assert_eq!(guess_category("party-hat"), None);
    }

    #[tokio::test]
    async fn refresh_upserts_and_skips_within_the_hour() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"slug": "iron-ore", "internal_id": 1001}, {"slug": "gold-ring", "internal_id": 1002}]"#,
            ))
            .expect(2)
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let client = MarketClient::new(&Config::for_tests(&server.uri())).unwrap();
        let catalog = Catalog::new(client, storage.clone());

        assert_eq!(catalog.refresh(false).await.unwrap(), RefreshOutcome::Refreshed(2));
        assert_eq!(catalog.refresh(false).await.unwrap(), RefreshOutcome::Skipped);
        assert_eq!(catalog.refresh(true).await.unwrap(), RefreshOutcome::Refreshed(2));

        assert_eq!(catalog.slug_of(1001).as_deref(), Some("iron-ore"));
        assert_eq!(catalog.id_of("gold-ring"), Some(1002));

        let item = storage.get_item(1001).await.unwrap().unwrap();
        assert_eq!(item.display_name, "Iron Ore");
        assert_eq!(item.category, Category::Material);
        assert_eq!(storage.count_items().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_map() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = MarketClient::new(&Config::for_tests(&server.uri())).unwrap();
        let catalog = Catalog::new(client, test_storage().await);
        assert!(catalog.refresh(false).await.is_err());
        assert!(catalog.is_empty());
    }
}
