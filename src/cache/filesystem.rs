//! Filesystem cache backend.
//!
//! One file per key under the configured root, named by the sha256 of the
//! key. Each file starts with a one-line JSON header (original key, expiry)
//! followed by the raw value bytes, so `clear(prefix)` can match keys
//! without an external index.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::CacheStore;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    key: String,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

pub struct FilesystemCache {
    root: PathBuf,
}

impl FilesystemCache {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache directory {}", root.display()))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.root.join(format!("{:x}.entry", hasher.finalize()))
    }

    fn read_entry(path: &Path) -> Result<Option<(Header, Vec<u8>)>> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let split = bytes
            .iter()
            .position(|&b| b == b'\n')
            .context("Corrupt cache file: missing header line")?;
        let header: Header = serde_json::from_slice(&bytes[..split])
            .context("Corrupt cache file: unreadable header")?;
        Ok(Some((header, bytes[split + 1..].to_vec())))
    }

    fn write_entry(path: &Path, header: &Header, value: &[u8]) -> Result<()> {
        let mut bytes = serde_json::to_vec(header)?;
        bytes.push(b'\n');
        bytes.extend_from_slice(value);
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "entry") {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl CacheStore for FilesystemCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match Self::read_entry(&path)? {
            Some((header, value)) => {
                if matches!(header.expires_at, Some(at) if at <= Utc::now()) {
                    let _ = std::fs::remove_file(&path);
                    Ok(None)
                } else {
                    Ok(Some(value))
                }
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let now = Utc::now();
        let header = Header {
            key: key.to_string(),
            expires_at: ttl.map(|ttl| {
                now + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(0))
            }),
            created_at: now,
        };
        Self::write_entry(&self.path_for(key), &header, value)
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<()> {
        for path in self.entry_paths()? {
            let remove = match prefix {
                None => true,
                Some(prefix) => match Self::read_entry(&path)? {
                    Some((header, _)) => header.key.starts_with(prefix),
                    None => false,
                },
            };
            if remove {
                let _ = std::fs::remove_file(&path);
            }
        }
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut removed = 0u64;
        for path in self.entry_paths()? {
            if let Some((header, _)) = Self::read_entry(&path)? {
                if matches!(header.expires_at, Some(at) if at <= now) {
                    let _ = std::fs::remove_file(&path);
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache() -> (TempDir, FilesystemCache) {
        let tmp = TempDir::new().unwrap();
        let cache = FilesystemCache::new(tmp.path().to_path_buf()).unwrap();
        (tmp, cache)
    }

    #[tokio::test]
    async fn test_round_trip_binary_value() {
        let (_tmp, cache) = cache();
        let payload = vec![0u8, 159, 146, 150, b'\n', 7];
        cache.set("bin", &payload, None).await.unwrap();
        assert_eq!(cache.get("bin").await.unwrap(), Some(payload));
    }

    #[tokio::test]
    async fn test_expiry_removes_file() {
        let (_tmp, cache) = cache();
        cache
            .set("short", b"v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.entry_paths().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_clear_by_prefix_reads_original_keys() {
        let (_tmp, cache) = cache();
        cache.set("fp:a", b"1", None).await.unwrap();
        cache.set("article:u", b"1", None).await.unwrap();
        cache.clear(Some("fp:")).await.unwrap();
        assert!(!cache.has("fp:a").await.unwrap());
        assert!(cache.has("article:u").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let (_tmp, cache) = cache();
        cache
            .set("a", b"1", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        cache.set("b", b"1", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.cleanup_expired().await.unwrap(), 1);
        assert!(cache.has("b").await.unwrap());
    }
}
