//! Core data models for the ingestion pipeline.
//!
//! The data lifecycle is:
//!
//! ```text
//! Adapter → CandidatePost → dedupe → fetch → extract() → ArticleContent
//!                                                 ↓
//!                                            embed() → EmbeddingRecord
//! ```
//!
//! # Type Relationships
//!
//! - A **[`CandidatePost`]** is produced by a source adapter before any
//!   network or extraction work; it carries only feed-level metadata.
//! - An **[`ArticleContent`]** is the transient output of the content
//!   extractor, consumed within a single enrichment invocation.
//! - An **[`EmbeddingRecord`]** is the final persisted unit, keyed by the
//!   post fingerprint, with a fixed-dimension vector.
//! - A **[`CacheEntry`]** is internal to the entry store.

use chrono::{DateTime, Utc};

use crate::fingerprint;

/// A minimally-populated article reference produced by a source adapter.
///
/// | Field | Description |
/// |-------|-------------|
/// | `source_name` | Name of the source that produced it |
/// | `url` | Canonical absolute article URL |
/// | `title` | Non-empty after trim |
/// | `published_at` | Best-effort publication timestamp |
/// | `author` / `summary` | Optional feed-level metadata |
/// | `tags` | Ordered, possibly empty |
#[derive(Debug, Clone)]
pub struct CandidatePost {
    pub source_name: String,
    pub url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
}

impl CandidatePost {
    /// Stable content-addressed identifier: sha256 over source and
    /// canonical URL. Title edits upstream do not change it.
    pub fn fingerprint(&self) -> String {
        fingerprint::fingerprint(&self.source_name, &self.url)
    }

    /// Canonical form of the post URL (tracking params stripped).
    pub fn canonical_url(&self) -> String {
        fingerprint::canonicalize_url(&self.url)
    }
}

/// Cleaned article content produced by the extractor.
///
/// `word_count` always equals the number of whitespace-separated tokens in
/// `text`. Transient: consumed within one enrichment invocation.
#[derive(Debug, Clone)]
pub struct ArticleContent {
    /// Plain-text body with normalized whitespace.
    pub text: String,
    /// Cleaned body HTML.
    pub html: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub word_count: usize,
    pub hero_image_url: Option<String>,
}

/// The persisted unit of the vector store.
///
/// Exactly one record exists per fingerprint; `vector.len()` equals the
/// collection dimension established at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    /// Post fingerprint.
    pub id: String,
    pub url: String,
    pub title: String,
    pub source_name: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    /// Fixed-length embedding; every component finite.
    pub vector: Vec<f32>,
    /// Open metadata map (tags, word count, extraction details).
    pub metadata: serde_json::Value,
}

/// A single row of the entry store.
///
/// A `get` past `expires_at` behaves as a miss; `expires_at = None` means
/// the entry never expires.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn post(url: &str, title: &str) -> CandidatePost {
        CandidatePost {
            source_name: "example".into(),
            url: url.into(),
            title: title.into(),
            published_at: None,
            author: None,
            summary: None,
            tags: vec![],
        }
    }

    #[test]
    fn test_fingerprint_independent_of_title() {
        let a = post("https://x.test/a", "Original headline");
        let b = post("https://x.test/a", "Edited headline");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_cache_entry_expiry() {
        let now = Utc::now();
        let live = CacheEntry {
            key: "k".into(),
            value: vec![1],
            expires_at: Some(now + Duration::seconds(60)),
            created_at: now,
        };
        let dead = CacheEntry {
            expires_at: Some(now - Duration::seconds(1)),
            ..live.clone()
        };
        let forever = CacheEntry {
            expires_at: None,
            ..live.clone()
        };
        assert!(!live.is_expired(now));
        assert!(dead.is_expired(now));
        assert!(!forever.is_expired(now));
    }
}
