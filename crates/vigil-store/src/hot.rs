use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::time::Duration;

#[derive(Debug, Clone)]
struct HotEntry {
    json: String,
    expires_at: Option<DateTime<Utc>>,
}

/// In-memory read-through layer in front of SQLite, backed by moka.
///
/// Entries leave after the layer TTL or when the stored value's own
/// expiry passes, whichever is first.
pub struct HotCache {
    inner: Cache<String, HotEntry>,
}

impl HotCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let entry = self.inner.get(key).await?;
        match entry.expires_at {
            Some(expires_at) if expires_at <= Utc::now() => {
                self.inner.invalidate(key).await;
                None
            }
            _ => Some(entry.json),
        }
    }

    pub async fn insert(&self, key: String, json: String, expires_at: Option<DateTime<Utc>>) {
        self.inner.insert(key, HotEntry { json, expires_at }).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn insert_and_get() {
        let cache = HotCache::new(100, Duration::from_secs(60));
        cache
            .insert("key1".to_string(), "value1".to_string(), None)
            .await;
        assert_eq!(cache.get("key1").await, Some("value1".to_string()));
    }

    #[tokio::test]
    async fn invalidate() {
        let cache = HotCache::new(100, Duration::from_secs(60));
        cache
            .insert("key1".to_string(), "value1".to_string(), None)
            .await;
        cache.invalidate("key1").await;
        assert_eq!(cache.get("key1").await, None);
    }

    #[tokio::test]
    async fn honours_value_expiry() {
        let cache = HotCache::new(100, Duration::from_secs(60));
        let expired = Utc::now() - ChronoDuration::seconds(1);
        cache
            .insert("key1".to_string(), "value1".to_string(), Some(expired))
            .await;
        assert_eq!(cache.get("key1").await, None);
    }

    #[tokio::test]
    async fn layer_ttl_expiration() {
        let cache = HotCache::new(100, Duration::from_millis(50));
        cache
            .insert("key1".to_string(), "value1".to_string(), None)
            .await;
        assert!(cache.get("key1").await.is_some());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.get("key1").await.is_none());
    }
}
