//! In-memory cache backend.
//!
//! Lazy expiry: a `get` past the deadline removes the entry and reports a
//! miss. Used by tests and by deployments without a database.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::models::CacheEntry;

use super::CacheStore;

#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Utc::now();
        let expired = {
            let entries = self.entries.read().unwrap();
            match entries.get(key) {
                Some(entry) if entry.is_expired(now) => true,
                Some(entry) => return Ok(Some(entry.value.clone())),
                None => return Ok(None),
            }
        };
        if expired {
            self.entries.write().unwrap().remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let now = Utc::now();
        let expires_at = ttl.map(|ttl| {
            now + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(0))
        });
        self.entries.write().unwrap().insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value: value.to_vec(),
                expires_at,
                created_at: now,
            },
        );
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().unwrap().remove(key).is_some())
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        match prefix {
            Some(prefix) => entries.retain(|k, _| !k.starts_with(prefix)),
            None => entries.clear(),
        }
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let cache = MemoryCache::new();
        cache.set("k", b"value", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"value".to_vec()));
        assert!(cache.has("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss() {
        let cache = MemoryCache::new();
        cache
            .set("k", b"v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.has("k").await.unwrap());
        // Lazy reap removed the row.
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value_and_ttl() {
        let cache = MemoryCache::new();
        cache
            .set("k", b"old", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        cache.set("k", b"new", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_clear_prefix() {
        let cache = MemoryCache::new();
        cache.set("fp:a", b"1", None).await.unwrap();
        cache.set("fp:b", b"1", None).await.unwrap();
        cache.set("tick:x", b"1", None).await.unwrap();
        cache.clear(Some("fp:")).await.unwrap();
        assert!(!cache.has("fp:a").await.unwrap());
        assert!(cache.has("tick:x").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_expired_counts() {
        let cache = MemoryCache::new();
        cache
            .set("a", b"1", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        cache.set("b", b"1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.cleanup_expired().await.unwrap(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let cache = MemoryCache::new();
        cache.set("k", b"v", None).await.unwrap();
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
    }
}
