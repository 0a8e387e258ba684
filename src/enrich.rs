//! Per-post enrichment: dedupe, fetch, extract, embed, persist.
//!
//! The steps for one candidate run strictly in order:
//!
//! 1. compute the fingerprint,
//! 2. dedupe against the `fp:` cache mark (cheap, before any network),
//! 3. fetch the full article through the resilient fetch layer, cached
//!    under `article:<canonical-url>` for the configured content TTL,
//! 4. extract cleaned text (empty text degrades to the feed summary),
//! 5. optionally summarize with the generative capability,
//! 6. embed the canonical text and prefix-truncate to the collection D',
//! 7. upsert the record, **then** set the fingerprint mark.
//!
//! The mark coming last is what makes persistence at-most-once per
//! fingerprint: a crash between upsert and mark costs at most one
//! redundant re-enrichment next tick, which the upsert tolerates
//! idempotently. Embedding is retried once; a second failure skips the
//! post without marking it.

use std::time::Duration;

use crate::cache::CacheStore as _;
use crate::context::AppContext;
use crate::embedding::EmbeddingClient as _;
use crate::errors::PipelineError;
use crate::extract;
use crate::llm::Summarizer as _;
use crate::models::{CandidatePost, EmbeddingRecord};
use crate::vectordb::VectorStore as _;

/// Result of enriching one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichOutcome {
    /// Upserted and marked.
    Persisted,
    /// Fingerprint already marked; nothing done.
    Duplicate,
}

/// Run steps 1–7 for a single candidate post.
pub async fn enrich_post(
    ctx: &AppContext,
    post: &CandidatePost,
) -> Result<EnrichOutcome, PipelineError> {
    let fingerprint = post.fingerprint();
    let fp_key = AppContext::fingerprint_key(&fingerprint);

    let already = ctx
        .cache
        .has(&fp_key)
        .await
        .map_err(|e| PipelineError::StoreUnavailable(e.to_string()))?;
    if already {
        tracing::debug!(url = %post.url, "fingerprint already persisted, skipping");
        return Ok(EnrichOutcome::Duplicate);
    }

    // Full-text capture, degraded to the feed summary when disabled or
    // when extraction comes back empty.
    let mut article = None;
    if ctx.config.article.full_content_capture {
        let html = fetch_article_html(ctx, post).await?;
        match extract::extract_article(html).await {
            Ok(extracted) if !extracted.text.is_empty() => article = Some(extracted),
            Ok(_) => {
                let event = PipelineError::ExtractionEmpty {
                    url: post.url.clone(),
                };
                tracing::warn!(error = %event, "degrading to feed summary");
            }
            Err(e) => {
                tracing::warn!(
                    url = %post.url,
                    error = %e,
                    "extraction failed, degrading to feed summary"
                );
            }
        }
    }

    let body_text = article
        .as_ref()
        .map(|a| a.text.clone())
        .or_else(|| post.summary.clone())
        .unwrap_or_default();

    // Optional abstractive summary; failure falls back to the feed summary.
    let mut summary = post.summary.clone();
    if ctx.config.article.generate_summary && !body_text.is_empty() {
        if let Some(summarizer) = &ctx.summarizer {
            let budget = ctx.config.article.summary_max_tokens;
            let input: String = body_text
                .chars()
                .take(ctx.config.embedding.max_input_chars)
                .collect();
            match summarizer.summarize(&input, budget).await {
                Ok(generated) if !generated.is_empty() => summary = Some(generated),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(url = %post.url, error = %e, "summary generation failed");
                }
            }
        }
    }

    let vector = embed_with_retry(ctx, post, summary.as_deref(), &body_text).await?;

    let record = EmbeddingRecord {
        id: fingerprint.clone(),
        url: post.canonical_url(),
        title: post.title.clone(),
        source_name: post.source_name.clone(),
        author: article
            .as_ref()
            .and_then(|a| a.author.clone())
            .or_else(|| post.author.clone()),
        published_at: post
            .published_at
            .or_else(|| article.as_ref().and_then(|a| a.published_at)),
        summary,
        vector,
        metadata: serde_json::json!({
            "tags": post.tags,
            "word_count": article.as_ref().map(|a| a.word_count).unwrap_or(0),
            "hero_image_url": article.as_ref().and_then(|a| a.hero_image_url.clone()),
            "degraded": article.is_none(),
        }),
    };

    ctx.vectors
        .upsert(&record)
        .await
        .map_err(|e| PipelineError::StoreUnavailable(e.to_string()))?;

    // The mark must follow the upsert; see the module docs.
    ctx.cache
        .set(&fp_key, b"1", None)
        .await
        .map_err(|e| PipelineError::StoreUnavailable(e.to_string()))?;

    tracing::info!(url = %post.url, title = %post.title, "post persisted");
    Ok(EnrichOutcome::Persisted)
}

/// Fetch the article body, serving repeat enrichments from the cache.
async fn fetch_article_html(
    ctx: &AppContext,
    post: &CandidatePost,
) -> Result<String, PipelineError> {
    let key = AppContext::article_key(&post.canonical_url());

    if let Some(cached) = ctx
        .cache
        .get(&key)
        .await
        .map_err(|e| PipelineError::StoreUnavailable(e.to_string()))?
    {
        return Ok(String::from_utf8_lossy(&cached).into_owned());
    }

    let bytes = ctx.fetcher.fetch_bytes(&post.url).await?;
    let ttl = Duration::from_secs(ctx.config.cache.ttl_hours * 3600);
    ctx.cache
        .set(&key, &bytes, Some(ttl))
        .await
        .map_err(|e| PipelineError::StoreUnavailable(e.to_string()))?;

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Canonical embed text: title, summary, body, truncated to the model's
/// input budget.
pub fn build_embed_input(
    title: &str,
    summary: Option<&str>,
    text: &str,
    max_chars: usize,
) -> String {
    let mut input = String::with_capacity(title.len() + text.len() + 64);
    input.push_str(title);
    if let Some(summary) = summary {
        if !summary.is_empty() {
            input.push_str("\n\n");
            input.push_str(summary);
        }
    }
    if !text.is_empty() {
        input.push_str("\n\n");
        input.push_str(text);
    }
    if input.chars().count() > max_chars {
        input = input.chars().take(max_chars).collect();
    }
    input
}

/// Embed with one retry, then prefix-truncate to the collection dimension.
async fn embed_with_retry(
    ctx: &AppContext,
    post: &CandidatePost,
    summary: Option<&str>,
    text: &str,
) -> Result<Vec<f32>, PipelineError> {
    let input = build_embed_input(
        &post.title,
        summary,
        text,
        ctx.config.embedding.max_input_chars,
    );

    let mut last_err = String::new();
    for attempt in 0..2 {
        match ctx.embedder.embed(&input).await {
            Ok(native) => {
                return crate::embedding::truncate_to_dimension(native, ctx.vectors.dimension())
                    .map_err(|e| PipelineError::EmbeddingFailed {
                        url: post.url.clone(),
                        reason: e.to_string(),
                    });
            }
            Err(e) => {
                last_err = e.to_string();
                if attempt == 0 {
                    tracing::warn!(url = %post.url, error = %last_err, "embed failed, retrying once");
                }
            }
        }
    }

    Err(PipelineError::EmbeddingFailed {
        url: post.url.clone(),
        reason: last_err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_input_composition() {
        let input = build_embed_input("Title", Some("Summary"), "Body text", 1000);
        assert_eq!(input, "Title\n\nSummary\n\nBody text");
    }

    #[test]
    fn test_embed_input_skips_empty_parts() {
        assert_eq!(build_embed_input("Title", None, "", 1000), "Title");
        assert_eq!(
            build_embed_input("Title", Some(""), "Body", 1000),
            "Title\n\nBody"
        );
    }

    #[test]
    fn test_embed_input_truncated_to_budget() {
        let body = "x".repeat(50_000);
        let input = build_embed_input("T", None, &body, 100);
        assert_eq!(input.chars().count(), 100);
    }
}
