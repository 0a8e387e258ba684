//! In-memory vector store.
//!
//! Exact cosine scan over a map of records. Slow past a few thousand rows
//! but faithful to the pgvector backend's ordering contract, which makes it
//! the backend of choice for pipeline tests and offline development.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::EmbeddingRecord;

use super::{check_record, cosine_distance, SearchFilter, VectorStore};

pub struct MemoryVectorStore {
    dimension: usize,
    records: RwLock<HashMap<String, EmbeddingRecord>>,
}

impl MemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(HashMap::new()),
        }
    }
}

fn matches(record: &EmbeddingRecord, filter: Option<&SearchFilter>) -> bool {
    match filter.and_then(|f| f.source_name.as_deref()) {
        Some(source) => record.source_name == source,
        None => true,
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, record: &EmbeddingRecord) -> Result<()> {
        check_record(record, self.dimension)?;
        self.records
            .write()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn upsert_batch(&self, records: &[EmbeddingRecord]) -> Result<()> {
        for record in records {
            check_record(record, self.dimension)?;
        }
        let mut map = self.records.write().unwrap();
        for record in records {
            map.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<EmbeddingRecord>> {
        Ok(self.records.read().unwrap().get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.write().unwrap().remove(id).is_some())
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
        let records = self.records.read().unwrap();
        let mut scored: Vec<(EmbeddingRecord, f32)> = records
            .values()
            .filter(|r| matches(r, filter))
            .map(|r| (r.clone(), cosine_distance(query, &r.vector)))
            .collect();
        scored.sort_by(|(ra, da), (rb, db)| {
            da.partial_cmp(db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ra.id.cmp(&rb.id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self, filter: Option<&SearchFilter>) -> Result<u64> {
        let records = self.records.read().unwrap();
        Ok(records.values().filter(|r| matches(r, filter)).count() as u64)
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, source: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            id: id.into(),
            url: format!("https://x.test/{id}"),
            title: id.into(),
            source_name: source.into(),
            author: None,
            published_at: None,
            summary: None,
            vector,
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_upsert_get_round_trip() {
        let store = MemoryVectorStore::new(3);
        let r = record("a", "example", vec![0.1, 0.2, 0.3]);
        store.upsert(&r).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(r));
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_id() {
        let store = MemoryVectorStore::new(2);
        let r = record("a", "example", vec![1.0, 0.0]);
        store.upsert(&r).await.unwrap();
        store.upsert(&r).await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected() {
        let store = MemoryVectorStore::new(3);
        let r = record("a", "example", vec![1.0, 0.0]);
        assert!(store.upsert(&r).await.is_err());
    }

    #[tokio::test]
    async fn test_search_orders_by_distance_then_id() {
        let store = MemoryVectorStore::new(2);
        store
            .upsert(&record("far", "example", vec![0.0, 1.0]))
            .await
            .unwrap();
        // Two records equidistant from the query: id breaks the tie.
        store
            .upsert(&record("b-near", "example", vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert(&record("a-near", "example", vec![2.0, 0.0]))
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 10, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|(r, _)| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a-near", "b-near", "far"]);
        assert!(hits[0].1 <= hits[2].1);
    }

    #[tokio::test]
    async fn test_search_respects_filter_and_k() {
        let store = MemoryVectorStore::new(2);
        store
            .upsert(&record("a", "alpha", vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert(&record("b", "beta", vec![1.0, 0.0]))
            .await
            .unwrap();

        let filter = SearchFilter {
            source_name: Some("alpha".into()),
        };
        let hits = store.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "a");

        let capped = store.search(&[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let store = MemoryVectorStore::new(2);
        store
            .upsert(&record("a", "example", vec![1.0, 0.0]))
            .await
            .unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());

        store
            .upsert(&record("b", "example", vec![1.0, 0.0]))
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 0);
    }
}
