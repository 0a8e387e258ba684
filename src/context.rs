//! Application context: every shared handle in one value.
//!
//! Built once at startup and passed through call sites; there is no
//! process-wide mutable state. Capabilities that may be absent (the page
//! renderer, the summarizer) are optional fields, and their absence
//! degrades the features that need them instead of failing startup.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::fetch::Fetcher;
use crate::llm::Summarizer;
use crate::render::RendererPool;
use crate::vectordb::VectorStore;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    /// Shared relational pool, present when the postgres backends are in
    /// use. The orchestrator also appends `source_errors` rows through it.
    pub pool: Option<sqlx::PgPool>,
    pub cache: Arc<dyn CacheStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub fetcher: Arc<Fetcher>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub renderer: Option<Arc<RendererPool>>,
    pub cancel: CancellationToken,
}

impl AppContext {
    /// Cache key marking a fingerprint as persisted.
    pub fn fingerprint_key(fingerprint: &str) -> String {
        format!("fp:{fingerprint}")
    }

    /// Cache key for a fetched article body.
    pub fn article_key(canonical_url: &str) -> String {
        format!("article:{canonical_url}")
    }

    /// Cache key holding a source's last tick timestamp.
    pub fn tick_key(source_name: &str) -> String {
        format!("tick:{source_name}")
    }
}
