//! pgvector-backed vector store.
//!
//! Records live in the `posts_<collection>` table created by
//! [`crate::migrate`], with a `vector(D')` column and an HNSW cosine index.
//! `<=>` is pgvector's cosine-distance operator, so `ORDER BY vector <=> $1`
//! matches the trait's ascending-distance contract directly. Upserts rely on
//! primary-key conflict resolution (`ON CONFLICT (id) DO UPDATE`), never
//! read-then-write.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::{PgPool, Row};

use crate::models::EmbeddingRecord;

use super::{check_record, SearchFilter, VectorStore};

pub struct PgVectorStore {
    pool: PgPool,
    table: String,
    dimension: usize,
}

impl PgVectorStore {
    /// Wrap the shared pool. `table` comes from [`crate::migrate::posts_table`]
    /// and is identifier-validated at config load.
    pub fn new(pool: PgPool, table: String, dimension: usize) -> Self {
        Self {
            pool,
            table,
            dimension,
        }
    }

    fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<EmbeddingRecord> {
        let vector: Vector = row.try_get("vector")?;
        Ok(EmbeddingRecord {
            id: row.try_get("id")?,
            url: row.try_get("url")?,
            title: row.try_get("title")?,
            source_name: row.try_get("source")?,
            author: row.try_get("author")?,
            published_at: row.try_get::<Option<DateTime<Utc>>, _>("published_at")?,
            summary: row.try_get("summary")?,
            vector: vector.to_vec(),
            metadata: row.try_get("metadata")?,
        })
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, record: &EmbeddingRecord) -> Result<()> {
        check_record(record, self.dimension)?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, url, title, source, author, published_at, summary, vector, metadata, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            ON CONFLICT (id) DO UPDATE SET
                url = EXCLUDED.url,
                title = EXCLUDED.title,
                source = EXCLUDED.source,
                author = EXCLUDED.author,
                published_at = EXCLUDED.published_at,
                summary = EXCLUDED.summary,
                vector = EXCLUDED.vector,
                metadata = EXCLUDED.metadata,
                updated_at = now()
            "#,
            self.table
        ))
        .bind(&record.id)
        .bind(&record.url)
        .bind(&record.title)
        .bind(&record.source_name)
        .bind(&record.author)
        .bind(record.published_at)
        .bind(&record.summary)
        .bind(Vector::from(record.vector.clone()))
        .bind(&record.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_batch(&self, records: &[EmbeddingRecord]) -> Result<()> {
        for record in records {
            self.upsert(record).await?;
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT id, url, title, source, author, published_at, summary, vector, metadata
            FROM {}
            WHERE id = $1
            "#,
            self.table
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", self.table))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<(EmbeddingRecord, f32)>> {
        if query.len() != self.dimension {
            anyhow::bail!(
                "query length {} does not match collection dimension {}",
                query.len(),
                self.dimension
            );
        }

        let query_vec = Vector::from(query.to_vec());
        let rows = match filter.and_then(|f| f.source_name.as_deref()) {
            Some(source) => {
                sqlx::query(&format!(
                    r#"
                    SELECT id, url, title, source, author, published_at, summary, vector, metadata,
                           (vector <=> $1) AS distance
                    FROM {}
                    WHERE source = $2
                    ORDER BY vector <=> $1, id
                    LIMIT $3
                    "#,
                    self.table
                ))
                .bind(query_vec.clone())
                .bind(source)
                .bind(k as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    r#"
                    SELECT id, url, title, source, author, published_at, summary, vector, metadata,
                           (vector <=> $1) AS distance
                    FROM {}
                    ORDER BY vector <=> $1, id
                    LIMIT $2
                    "#,
                    self.table
                ))
                .bind(query_vec.clone())
                .bind(k as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let distance: f64 = row.try_get("distance")?;
            results.push((Self::record_from_row(row)?, distance as f32));
        }
        Ok(results)
    }

    async fn count(&self, filter: Option<&SearchFilter>) -> Result<u64> {
        let count: i64 = match filter.and_then(|f| f.source_name.as_deref()) {
            Some(source) => {
                sqlx::query_scalar(&format!(
                    "SELECT COUNT(*) FROM {} WHERE source = $1",
                    self.table
                ))
                .bind(source)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count as u64)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query(&format!("TRUNCATE TABLE {}", self.table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
