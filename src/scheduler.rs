//! Orchestrator: per-source scheduling, concurrency control, shutdown.
//!
//! One engine tick walks every enabled source, runs those whose poll
//! interval has elapsed since their `tick:<source>` timestamp, and fans the
//! surviving candidates into the enrichment pipeline. Concurrency is
//! bounded at three levels: source tasks by the scheduler semaphore,
//! enrichment by the article semaphore, and browser renders inside the
//! renderer pool.
//!
//! `tick:<source>` advances on completion or failure so a broken source
//! cannot monopolize the pipeline. The one exception is a tick that could
//! not reach the backing store at all: that tick never ran, so the
//! timestamp is left untouched and the source retries on the next pass.
//!
//! Shutdown: the daemon stops scheduling on cancellation, gives in-flight
//! work a grace period, then aborts what remains.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::adapters::{Adapter, AdapterContext};
use crate::cache::{self, CacheStore as _};
use crate::config::FeedConfig;
use crate::context::AppContext;
use crate::enrich::{self, EnrichOutcome};
use crate::errors::{AdapterError, PipelineError};
use crate::models::CandidatePost;

/// Aggregate counters for one engine tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickSummary {
    pub sources_run: usize,
    pub sources_failed: usize,
    pub posts_persisted: usize,
    pub posts_duplicate: usize,
    pub posts_failed: usize,
    /// The backing store was unreachable during this tick.
    pub store_unavailable: bool,
}

/// Outcome of a single source's tick.
#[derive(Debug, Default)]
struct SourceOutcome {
    persisted: usize,
    duplicates: usize,
    failed: usize,
    error: Option<String>,
    store_unavailable: bool,
    cancelled: bool,
}

/// Run one pass over all enabled, due sources.
pub async fn run_tick(ctx: &AppContext) -> Result<TickSummary> {
    let article_permits = Arc::new(Semaphore::new(ctx.config.article.concurrent_article_tasks));
    let source_permits = Arc::new(Semaphore::new(
        ctx.config.scheduler.max_concurrent_source_tasks,
    ));
    let tick_timeout = Duration::from_secs(ctx.config.scheduler.tick_timeout_secs);

    let mut tasks: JoinSet<(String, SourceOutcome)> = JoinSet::new();

    for feed in ctx.config.feeds.iter().filter(|f| f.enabled) {
        match source_is_due(ctx, feed).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                tracing::error!(source = %feed.name, error = %e, "cannot read tick state");
                return Ok(TickSummary {
                    store_unavailable: true,
                    ..TickSummary::default()
                });
            }
        }

        let ctx = ctx.clone();
        let feed = feed.clone();
        let article_permits = article_permits.clone();
        let source_permits = source_permits.clone();

        tasks.spawn(async move {
            let _permit = match source_permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return (feed.name.clone(), SourceOutcome::default()),
            };
            let name = feed.name.clone();
            let outcome = tokio::select! {
                result = tokio::time::timeout(
                    tick_timeout,
                    run_source(&ctx, &feed, article_permits),
                ) => match result {
                    Ok(outcome) => outcome,
                    Err(_) => SourceOutcome {
                        error: Some(format!("tick exceeded {}s hard cap", tick_timeout.as_secs())),
                        ..SourceOutcome::default()
                    },
                },
                _ = ctx.cancel.cancelled() => SourceOutcome {
                    error: Some("cancelled".into()),
                    cancelled: true,
                    ..SourceOutcome::default()
                },
            };
            (name, outcome)
        });
    }

    let mut summary = TickSummary::default();
    while let Some(joined) = tasks.join_next().await {
        let Ok((name, outcome)) = joined else {
            summary.sources_failed += 1;
            continue;
        };

        summary.sources_run += 1;
        summary.posts_persisted += outcome.persisted;
        summary.posts_duplicate += outcome.duplicates;
        summary.posts_failed += outcome.failed;
        if outcome.error.is_some() {
            summary.sources_failed += 1;
        }
        if outcome.store_unavailable {
            summary.store_unavailable = true;
        }

        // Advance the tick timestamp on completion or failure, but never
        // for a tick that could not reach the store or never ran at all.
        if !outcome.store_unavailable && !outcome.cancelled {
            let tick_key = AppContext::tick_key(&name);
            if let Err(e) =
                cache::set_json(ctx.cache.as_ref(), &tick_key, &Utc::now().to_rfc3339(), None).await
            {
                tracing::error!(source = %name, error = %e, "failed to update tick state");
                summary.store_unavailable = true;
            }
        }
    }

    tracing::info!(
        sources = summary.sources_run,
        persisted = summary.posts_persisted,
        duplicates = summary.posts_duplicate,
        failed = summary.posts_failed,
        "tick complete"
    );
    Ok(summary)
}

/// Whether `now - LastTickAt >= poll_interval` for this source.
async fn source_is_due(ctx: &AppContext, feed: &FeedConfig) -> Result<bool> {
    let key = AppContext::tick_key(&feed.name);
    let last: Option<String> = cache::get_json(ctx.cache.as_ref(), &key).await?;
    let Some(last) = last else {
        return Ok(true);
    };
    let Ok(last) = chrono::DateTime::parse_from_rfc3339(&last) else {
        return Ok(true);
    };
    let elapsed = Utc::now().signed_duration_since(last.with_timezone(&Utc));
    Ok(elapsed.num_seconds() >= (feed.poll_interval_minutes * 60) as i64)
}

/// Discover and enrich one source.
async fn run_source(
    ctx: &AppContext,
    feed: &FeedConfig,
    article_permits: Arc<Semaphore>,
) -> SourceOutcome {
    tracing::info!(source = %feed.name, url = %feed.url, "processing source");
    let mut outcome = SourceOutcome::default();

    let adapter = Adapter::select(feed, ctx.fetcher.config());
    let adapter_ctx = AdapterContext {
        fetcher: &ctx.fetcher,
        renderer: ctx.renderer.as_deref(),
        feed,
    };

    let candidates = match adapter.discover(&adapter_ctx).await {
        Ok(candidates) => candidates,
        Err(e) => {
            let kind = adapter_error_kind(&e);
            tracing::warn!(source = %feed.name, url = %feed.url, kind, error = %e, "source discovery failed");
            record_source_error(ctx, feed, kind, &e.to_string()).await;
            outcome.error = Some(e.to_string());
            return outcome;
        }
    };

    let candidates = bound_candidates(candidates, ctx.config.max_posts_for(feed));
    if candidates.is_empty() {
        tracing::info!(source = %feed.name, "no new candidates");
        return outcome;
    }

    // Candidates are processed in adapter order; the semaphore only bounds
    // how many run at once.
    let mut tasks: JoinSet<Result<EnrichOutcome, PipelineError>> = JoinSet::new();
    for post in candidates {
        let ctx = ctx.clone();
        let permits = article_permits.clone();
        tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::StoreUnavailable(e.to_string()))?;
            enrich::enrich_post(&ctx, &post).await
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(EnrichOutcome::Persisted)) => outcome.persisted += 1,
            Ok(Ok(EnrichOutcome::Duplicate)) => outcome.duplicates += 1,
            Ok(Err(PipelineError::StoreUnavailable(reason))) => {
                tracing::error!(source = %feed.name, %reason, "store unavailable, halting source");
                outcome.store_unavailable = true;
                outcome.error = Some(reason);
                tasks.abort_all();
                break;
            }
            Ok(Err(e)) => {
                outcome.failed += 1;
                record_source_error(ctx, feed, pipeline_error_kind(&e), &e.to_string()).await;
            }
            Err(_) => outcome.failed += 1,
        }
    }

    tracing::info!(
        source = %feed.name,
        persisted = outcome.persisted,
        duplicates = outcome.duplicates,
        failed = outcome.failed,
        "source tick finished"
    );
    outcome
}

/// Keep the `max_posts` most recent candidates. Dated posts sort newest
/// first; undated posts keep adapter order behind them.
pub fn bound_candidates(mut candidates: Vec<CandidatePost>, max_posts: usize) -> Vec<CandidatePost> {
    candidates.sort_by_key(|p| (p.published_at.is_none(), std::cmp::Reverse(p.published_at)));
    candidates.truncate(max_posts);
    candidates
}

fn adapter_error_kind(e: &AdapterError) -> &'static str {
    match e {
        AdapterError::Fetch(f) => match f {
            crate::errors::FetchError::Network { .. } => "network",
            crate::errors::FetchError::RateLimited { .. } => "rate_limited",
            crate::errors::FetchError::BotChallenged { .. } => "bot_challenged",
            crate::errors::FetchError::Permanent { .. } => "permanent",
            crate::errors::FetchError::Body { .. } => "body",
        },
        AdapterError::ParseFormat { .. } => "parse_format",
        AdapterError::BrowserRequired { .. } => "browser_required",
    }
}

fn pipeline_error_kind(e: &PipelineError) -> &'static str {
    match e {
        PipelineError::Fetch(_) => "article_fetch",
        PipelineError::ExtractionEmpty { .. } => "extraction_empty",
        PipelineError::EmbeddingFailed { .. } => "embedding_failed",
        PipelineError::StoreUnavailable(_) => "store_unavailable",
    }
}

/// Append a failure event to the `source_errors` table when the shared
/// pool exists; always emits the structured log event.
async fn record_source_error(ctx: &AppContext, feed: &FeedConfig, kind: &str, message: &str) {
    let Some(pool) = &ctx.pool else {
        return;
    };
    let result = sqlx::query(
        "INSERT INTO source_errors (source, url, kind, message) VALUES ($1, $2, $3, $4)",
    )
    .bind(&feed.name)
    .bind(&feed.url)
    .bind(kind)
    .bind(message)
    .execute(pool)
    .await;
    if let Err(e) = result {
        tracing::warn!(source = %feed.name, error = %e, "failed to record source error");
    }
}

/// Daemon loop: tick, sweep, sleep, until cancelled. Returns `true` when
/// shutdown completed within the grace period, `false` when in-flight work
/// had to be aborted.
pub async fn run_daemon(ctx: &AppContext) -> Result<bool> {
    let interval = Duration::from_secs(ctx.config.scheduler.tick_interval_secs);
    let grace = Duration::from_secs(ctx.config.scheduler.shutdown_grace_secs);

    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(true);
        }

        // The tick runs as its own task so shutdown can wait on it with a
        // deadline instead of dropping it mid-flight.
        let tick_ctx = ctx.clone();
        let mut tick = tokio::spawn(async move { run_tick(&tick_ctx).await });

        tokio::select! {
            result = &mut tick => {
                match result {
                    Ok(Err(e)) => tracing::error!(error = %e, "tick failed"),
                    Err(e) => tracing::error!(error = %e, "tick task panicked"),
                    Ok(Ok(_)) => {}
                }
            }
            _ = ctx.cancel.cancelled() => {
                tracing::info!(grace_secs = grace.as_secs(), "shutdown requested, draining in-flight work");
                match tokio::time::timeout(grace, &mut tick).await {
                    Ok(_) => return Ok(true),
                    Err(_) => {
                        tick.abort();
                        tracing::warn!("grace period elapsed, aborting in-flight work");
                        return Ok(false);
                    }
                }
            }
        }

        if let Err(e) = ctx.cache.cleanup_expired().await {
            tracing::warn!(error = %e, "cache sweep failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = ctx.cancel.cancelled() => return Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn post(url: &str, published: Option<chrono::DateTime<Utc>>) -> CandidatePost {
        CandidatePost {
            source_name: "example".into(),
            url: url.into(),
            title: format!("Post at {url}"),
            published_at: published,
            author: None,
            summary: None,
            tags: vec![],
        }
    }

    fn at(day: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_bound_candidates_most_recent_first() {
        let posts = vec![
            post("https://x.test/old", Some(at(1))),
            post("https://x.test/new", Some(at(20))),
            post("https://x.test/mid", Some(at(10))),
        ];
        let bounded = bound_candidates(posts, 2);
        assert_eq!(bounded.len(), 2);
        assert_eq!(bounded[0].url, "https://x.test/new");
        assert_eq!(bounded[1].url, "https://x.test/mid");
    }

    #[test]
    fn test_bound_candidates_undated_keep_adapter_order() {
        let posts = vec![
            post("https://x.test/first", None),
            post("https://x.test/second", None),
            post("https://x.test/third", None),
        ];
        let bounded = bound_candidates(posts, 2);
        assert_eq!(bounded[0].url, "https://x.test/first");
        assert_eq!(bounded[1].url, "https://x.test/second");
    }

    #[test]
    fn test_bound_candidates_dated_before_undated() {
        let posts = vec![
            post("https://x.test/undated", None),
            post("https://x.test/dated", Some(at(5))),
        ];
        let bounded = bound_candidates(posts, 10);
        assert_eq!(bounded[0].url, "https://x.test/dated");
        assert_eq!(bounded[1].url, "https://x.test/undated");
    }
}
