//! Typed failure kinds for the ingestion engine.
//!
//! Errors are values, not control flow: the fetch layer classifies every
//! failure into a [`FetchError`] kind with an explicit retryability, and the
//! orchestrator folds per-source and per-post failures into structured log
//! events without aborting sibling work.
//!
//! | Kind | Disposition |
//! |------|-------------|
//! | [`FetchError::Network`] | transient; retry per policy |
//! | [`FetchError::RateLimited`] | backoff honoring `Retry-After` |
//! | [`FetchError::BotChallenged`] | fall through to the browser path |
//! | [`FetchError::Permanent`] | no retry this tick |
//! | [`AdapterError::ParseFormat`] | attempt HTML-as-feed fallback |
//! | [`AdapterError::BrowserRequired`] | skip source with a warning |
//! | [`PipelineError::ExtractionEmpty`] | degrade to summary-only text |
//! | [`PipelineError::EmbeddingFailed`] | retry once, then skip the post |
//! | [`PipelineError::StoreUnavailable`] | halt the tick |

use thiserror::Error;

/// Failure raised by the resilient fetch layer.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, DNS, or I/O failure. Transient.
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP 429 after the backoff budget was exhausted.
    #[error("rate limited by {url} after {attempts} attempts")]
    RateLimited { url: String, attempts: u32 },

    /// HTTP 403/503 from a bot-gated host. The caller should fall through
    /// to a challenge-aware client or the render capability.
    #[error("bot challenge from {url} (status {status})")]
    BotChallenged { url: String, status: u16 },

    /// Any other 4xx, or a 5xx that survived its retry budget.
    #[error("permanent failure fetching {url} (status {status})")]
    Permanent { url: String, status: u16 },

    /// The response body could not be read or decompressed.
    #[error("unreadable body from {url}: {reason}")]
    Body { url: String, reason: String },
}

impl FetchError {
    /// Whether a later tick may reasonably succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Network { .. } | FetchError::RateLimited { .. }
        )
    }
}

/// Failure raised while turning a source's bytes into candidate posts.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Neither strict feed parsing nor HTML-as-feed produced entries.
    #[error("unparseable feed from {url}: {reason}")]
    ParseFormat { url: String, reason: String },

    /// The adapter needs the render capability and none is configured.
    #[error("browser rendering required for {url}")]
    BrowserRequired { url: String },
}

/// Failure raised inside the enrichment pipeline for a single post.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The full-text fetch for this post failed after retries.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Extraction produced no text; the post proceeds in degraded mode.
    #[error("extraction yielded empty text for {url}")]
    ExtractionEmpty { url: String },

    /// The embedding capability failed twice for this post.
    #[error("embedding failed for {url}: {reason}")]
    EmbeddingFailed { url: String, reason: String },

    /// The backing store is unreachable; fatal for the current tick.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}
