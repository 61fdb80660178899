use moka::future::Cache;
use std::time::Duration;

use super::model::MetadataOption;

const MAX_ENTRIES: u64 = 10_000;

/// Per-user read-through cache for account metadata listings.
#[derive(Clone)]
pub struct MetadataCache {
    inner: Cache<String, Vec<MetadataOption>>,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(MAX_ENTRIES)
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<MetadataOption>> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: String, value: Vec<MetadataOption>) {
        self.inner.insert(key, value).await;
    }

    pub async fn forget(&self, key: &str) {
        self.inner.invalidate(key).await;
    }
}

pub fn key(user_id: i64, suffix: &str) -> String {
    format!("meta:{}:{}", user_id, suffix)
}

pub fn ad_accounts_key(user_id: i64) -> String {
    key(user_id, "ad_accounts")
}

pub fn pages_key(user_id: i64) -> String {
    key(user_id, "pages")
}

/// `account` is the bare account id, or `None` for the page-derived listing.
pub fn instagram_accounts_key(user_id: i64, account: Option<&str>) -> String {
    key(
        user_id,
        &format!("instagram_accounts:{}", account.unwrap_or("all")),
    )
}

pub fn pixels_key(user_id: i64, account: &str) -> String {
    key(user_id, &format!("pixels:{}", account))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_user() {
        assert_eq!(ad_accounts_key(7), "meta:7:ad_accounts");
        assert_eq!(instagram_accounts_key(7, None), "meta:7:instagram_accounts:all");
        assert_eq!(instagram_accounts_key(7, Some("123")), "meta:7:instagram_accounts:123");
        assert_eq!(pixels_key(8, "123"), "meta:8:pixels:123");
    }

    #[tokio::test]
    async fn forget_drops_entry() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        let entry = vec![MetadataOption {
            id: "1".into(),
            label: "Page".into(),
        }];
        cache.insert(pages_key(1), entry.clone()).await;
        assert_eq!(cache.get(&pages_key(1)).await, Some(entry));
        cache.forget(&pages_key(1)).await;
        assert!(cache.get(&pages_key(1)).await.is_none());
    }
}
