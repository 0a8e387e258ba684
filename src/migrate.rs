//! Database schema setup.
//!
//! Creates the shared-database schema and ensures idempotent execution.
//! Designed to be run via `blogwatch init`.
//!
//! # Schema
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `cache_entries` | TTL-bounded key/value rows for the entry store |
//! | `posts_<collection>` | Embedding records with a `vector(D')` column |
//! | `source_errors` | Per-source failure log written by the orchestrator |
//!
//! # Indexes
//!
//! - partial index on `cache_entries(expires_at)` for the expiry sweep
//! - HNSW cosine index on `posts_<collection>(vector)`
//! - `posts_<collection>(published_at DESC)` for recency queries
//!
//! All statements use `IF NOT EXISTS`; running `init` repeatedly is safe.
//! The vector extension must be installable by the connecting role.

use anyhow::Result;
use sqlx::PgPool;

use crate::config::Config;

/// Run all schema migrations against the shared pool.
pub async fn run_migrations(pool: &PgPool, config: &Config) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            key         TEXT PRIMARY KEY,
            value       BYTEA NOT NULL,
            expires_at  TIMESTAMPTZ NULL,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS cache_entries_expires_at_idx
        ON cache_entries (expires_at)
        WHERE expires_at IS NOT NULL
        "#,
    )
    .execute(pool)
    .await?;

    let table = posts_table(config);
    let dim = config.vector_db.text_vector_dimension;

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id           TEXT PRIMARY KEY,
            url          TEXT NOT NULL,
            title        TEXT NOT NULL,
            source       TEXT NOT NULL,
            author       TEXT NULL,
            published_at TIMESTAMPTZ NULL,
            summary      TEXT NULL,
            vector       vector({dim}) NOT NULL,
            metadata     JSONB NOT NULL DEFAULT '{{}}',
            created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        r#"
        CREATE INDEX IF NOT EXISTS {table}_vector_idx
        ON {table} USING hnsw (vector vector_cosine_ops)
        WITH (m = 16, ef_construction = 64)
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {table}_published_at_idx ON {table} (published_at DESC)"
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_errors (
            id          BIGSERIAL PRIMARY KEY,
            source      TEXT NOT NULL,
            url         TEXT NOT NULL,
            kind        TEXT NOT NULL,
            message     TEXT NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS source_errors_source_idx ON source_errors (source)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Fully-qualified posts table name for the configured collection.
///
/// The collection name is validated at config load to be an identifier-safe
/// string, so interpolation here cannot inject SQL.
pub fn posts_table(config: &Config) -> String {
    format!("posts_{}", config.vector_db.collection_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posts_table_uses_collection_name() {
        let mut config = Config::default();
        config.vector_db.collection_name = "acme_blogs".into();
        assert_eq!(posts_table(&config), "posts_acme_blogs");
    }
}
