//! Vector store: embedding records under a fixed dimension.
//!
//! The [`VectorStore`] trait covers upsert, point lookup, deletion,
//! approximate nearest-neighbor search, and counting over
//! [`EmbeddingRecord`]s. The distance metric for this deployment is
//! **cosine distance** (`1 - cosine similarity`): results are ordered by
//! ascending distance, ties broken by `id` ascending.
//!
//! Backends:
//!
//! | Backend | Module | Notes |
//! |---------|--------|-------|
//! | `postgres` | [`postgres`] | pgvector `<=>` with an HNSW index |
//! | `memory` | [`memory`] | exact scan, used by tests and offline runs |
//!
//! The collection dimension D' is fixed at store construction. Stores
//! reject vectors whose length differs from D' or that carry non-finite
//! components; prefix truncation of wider model outputs happens upstream in
//! the enrichment pipeline.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::EmbeddingRecord;

/// Optional predicate applied to search and count.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict to records from one source.
    pub source_name: Option<String>,
}

/// A collection of embedding records with a fixed vector dimension.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The collection dimension D'.
    fn dimension(&self) -> usize;

    /// Insert or replace by `id`.
    async fn upsert(&self, record: &EmbeddingRecord) -> Result<()>;

    /// Insert or replace a batch sharing the collection dimension.
    async fn upsert_batch(&self, records: &[EmbeddingRecord]) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>>;

    /// Returns whether a record existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Nearest neighbors by ascending cosine distance, ties by `id`.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<(EmbeddingRecord, f32)>>;

    async fn count(&self, filter: Option<&SearchFilter>) -> Result<u64>;

    /// Remove every record in the collection.
    async fn clear(&self) -> Result<()>;
}

/// Validate a record against the collection dimension before storage.
pub fn check_record(record: &EmbeddingRecord, dimension: usize) -> Result<()> {
    if record.vector.len() != dimension {
        anyhow::bail!(
            "vector length {} does not match collection dimension {} (id {})",
            record.vector.len(),
            dimension,
            record.id
        );
    }
    if record.vector.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("vector for {} contains non-finite components", record.id);
    }
    Ok(())
}

/// Cosine distance between two equal-length vectors: `1 - cos(a, b)`.
/// Zero-magnitude inputs are treated as maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 1.0;
    }
    1.0 - dot / denom
}
