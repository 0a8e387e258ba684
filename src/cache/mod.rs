//! TTL-bounded entry store shared by the scheduler and the enrichment
//! pipeline.
//!
//! The [`CacheStore`] trait defines the persistent string-key → byte-value
//! mapping with optional expiry used for per-feed polling state
//! (`tick:<source>`), per-post deduplication (`fp:<fingerprint>`), and the
//! article body cache (`article:<url>`). Backends are pluggable:
//!
//! | Backend | Module | Notes |
//! |---------|--------|-------|
//! | `postgres` | [`postgres`] | shares the vector store's pool |
//! | `memory` | [`memory`] | lazy-expiring map, test and dev default |
//! | `filesystem` | [`filesystem`] | file-per-key under a root directory |
//!
//! Reads see all prior writes from the same process; entries past
//! `expires_at` behave as misses and are reaped lazily or by
//! [`CacheStore::cleanup_expired`].

pub mod filesystem;
pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;

/// Persistent mapping from string keys to opaque byte values with optional
/// expiry. All operations are atomic at the row level; there are no
/// cross-operation transactions.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Most recent unexpired value for `key`, or a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write or overwrite; `ttl = None` means the entry never expires.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Existence without payload transfer.
    async fn has(&self, key: &str) -> Result<bool>;

    /// Remove `key`. Returns whether an entry existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove all keys, or all keys matching a prefix.
    async fn clear(&self, prefix: Option<&str>) -> Result<()>;

    /// Reap entries past their expiry. Returns the number removed.
    async fn cleanup_expired(&self) -> Result<u64>;
}

/// A value read back from the store after [`decode_value`].
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    /// The payload was valid UTF-8 JSON.
    Json(serde_json::Value),
    /// Opaque binary fallback.
    Raw(Vec<u8>),
}

/// Serialize a structured value as JSON bytes for storage.
pub fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode stored bytes: UTF-8 text first, then JSON; anything that fails
/// either step comes back as the raw bytes. Bytes must be decoded to text
/// before the JSON parse; parsing bytes directly mistakes binary payloads
/// for malformed documents.
pub fn decode_value(bytes: &[u8]) -> CachedValue {
    match std::str::from_utf8(bytes) {
        Ok(text) => match serde_json::from_str(text) {
            Ok(json) => CachedValue::Json(json),
            Err(_) => CachedValue::Raw(bytes.to_vec()),
        },
        Err(_) => CachedValue::Raw(bytes.to_vec()),
    }
}

/// Typed read over any [`CacheStore`]: miss on absent, expired, or
/// non-JSON payloads.
pub async fn get_json<T: DeserializeOwned>(store: &dyn CacheStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => match decode_value(&bytes) {
            CachedValue::Json(json) => Ok(Some(serde_json::from_value(json)?)),
            CachedValue::Raw(_) => Ok(None),
        },
        None => Ok(None),
    }
}

/// Typed write over any [`CacheStore`].
pub async fn set_json<T: Serialize>(
    store: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    store.set(key, &encode_value(value)?, ttl).await
}

/// Build the configured cache backend. The postgres backend reuses the
/// shared pool; callers without one (memory/filesystem deployments) pass
/// `None`.
pub async fn create_cache(
    config: &Config,
    pool: Option<sqlx::PgPool>,
) -> Result<Arc<dyn CacheStore>> {
    match config.cache.backend.as_str() {
        "memory" => Ok(Arc::new(memory::MemoryCache::new())),
        "filesystem" => Ok(Arc::new(filesystem::FilesystemCache::new(
            config.cache.path.clone(),
        )?)),
        "postgres" => {
            let pool = match pool {
                Some(p) => p,
                None => crate::db::connect(config.cache.dsn(&config.vector_db)).await?,
            };
            Ok(Arc::new(postgres::PostgresCache::new(pool)))
        }
        other => anyhow::bail!("Unknown cache backend: '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_json_round_trip() {
        let value = serde_json::json!({"count": 3, "tags": ["db", "rust"]});
        let bytes = encode_value(&value).unwrap();
        assert_eq!(decode_value(&bytes), CachedValue::Json(value));
    }

    #[test]
    fn test_decode_non_json_utf8_is_raw() {
        let bytes = b"plain text, not json".to_vec();
        assert_eq!(decode_value(&bytes), CachedValue::Raw(bytes.clone()));
    }

    #[test]
    fn test_decode_binary_is_raw() {
        let bytes = vec![0xff, 0xfe, 0x00, 0x01];
        assert_eq!(decode_value(&bytes), CachedValue::Raw(bytes.clone()));
    }

    #[test]
    fn test_json_string_survives() {
        // A bare JSON string is still JSON.
        let bytes = b"\"1\"".to_vec();
        assert_eq!(
            decode_value(&bytes),
            CachedValue::Json(serde_json::Value::String("1".into()))
        );
    }
}
