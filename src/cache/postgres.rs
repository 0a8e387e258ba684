//! PostgreSQL cache backend.
//!
//! Stores entries in the `cache_entries` table created by
//! [`crate::migrate`], sharing the connection pool with the vector store.
//! Expiry is enforced in the read predicate; expired rows are reclaimed by
//! [`cleanup_expired`](super::CacheStore::cleanup_expired).

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::time::Duration;

use super::CacheStore;

pub struct PostgresCache {
    pool: PgPool,
}

impl PostgresCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for PostgresCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            r#"
            SELECT value
            FROM cache_entries
            WHERE key = $1
              AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let expires_at: Option<DateTime<Utc>> = ttl.map(|ttl| {
            Utc::now()
                + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(0))
        });

        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT 1
            FROM cache_entries
            WHERE key = $1
              AND (expires_at IS NULL OR expires_at > now())
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self, prefix: Option<&str>) -> Result<()> {
        match prefix {
            Some(prefix) => {
                // LIKE pattern built from a literal prefix; escape its wildcards.
                let pattern = format!(
                    "{}%",
                    prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
                );
                sqlx::query("DELETE FROM cache_entries WHERE key LIKE $1")
                    .bind(pattern)
                    .execute(&self.pool)
                    .await?;
            }
            None => {
                sqlx::query("DELETE FROM cache_entries")
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM cache_entries
            WHERE expires_at IS NOT NULL
              AND expires_at <= now()
            "#,
        )
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::info!(count = deleted, "reaped expired cache entries");
        }
        Ok(deleted)
    }
}
