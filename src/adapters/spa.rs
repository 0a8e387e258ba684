//! Single-page-application adapter.
//!
//! Next.js-hosted engineering sites ship an initial HTML document with no
//! article content; the list only exists after client-side rendering. The
//! adapter renders the index through the browser capability and scans
//! anchors whose path matches the canonical `/YYYY/MM/slug` article
//! template, deduplicating by canonical URL.

use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

use crate::errors::AdapterError;
use crate::fingerprint::canonicalize_url;
use crate::models::CandidatePost;

use super::html_feed::collapse_ws;
use super::AdapterContext;

/// Canonical article path shape for SPA engineering blogs.
const ARTICLE_PATH_TEMPLATE: &str = r"^/\d{4}/\d{2}/[a-z0-9-]+/?$";

pub struct SpaAdapter;

impl SpaAdapter {
    pub async fn discover(ctx: &AdapterContext<'_>) -> Result<Vec<CandidatePost>, AdapterError> {
        let Some(renderer) = ctx.renderer else {
            return Err(AdapterError::BrowserRequired {
                url: ctx.feed.url.clone(),
            });
        };

        let page = renderer
            .render(&ctx.feed.url)
            .await
            .map_err(|e| AdapterError::ParseFormat {
                url: ctx.feed.url.clone(),
                reason: format!("render failed: {e}"),
            })?;

        Ok(Self::parse(&page.html, ctx))
    }

    pub fn parse(html: &str, ctx: &AdapterContext<'_>) -> Vec<CandidatePost> {
        let template = Regex::new(ARTICLE_PATH_TEMPLATE).expect("static regex");
        let document = Html::parse_document(html);
        let Ok(anchor_sel) = Selector::parse("a[href]") else {
            return vec![];
        };

        let mut seen = HashSet::new();
        let mut posts = Vec::new();

        for anchor in document.select(&anchor_sel) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Some(url) = resolve(href, &ctx.feed.url) else {
                continue;
            };
            let path = match Url::parse(&url) {
                Ok(u) => u.path().to_string(),
                Err(_) => continue,
            };
            if !template.is_match(&path) {
                continue;
            }
            let title = collapse_ws(&anchor.text().collect::<Vec<_>>().join(" "));
            if title.len() < 5 {
                continue;
            }
            if !seen.insert(canonicalize_url(&url)) {
                continue;
            }
            posts.push(CandidatePost {
                source_name: ctx.feed.name.clone(),
                url,
                title,
                published_at: None,
                author: None,
                summary: None,
                tags: vec![],
            });
        }

        posts
    }
}

fn resolve(href: &str, base_url: &str) -> Option<String> {
    if let Ok(url) = Url::parse(href) {
        return Some(url.to_string());
    }
    Url::parse(base_url).ok()?.join(href).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeedConfig, FetchConfig};
    use crate::fetch::Fetcher;
    use tokio_util::sync::CancellationToken;

    fn ctx_parts() -> (Fetcher, FeedConfig) {
        let fetcher = Fetcher::new(FetchConfig::default(), CancellationToken::new()).unwrap();
        let feed = FeedConfig {
            name: "spa-blog".into(),
            url: "https://engineering.atspotify.com/".into(),
            poll_interval_minutes: 60,
            max_posts_per_tick: 10,
            enabled: true,
            hints: None,
        };
        (fetcher, feed)
    }

    #[test]
    fn test_scans_dated_article_anchors() {
        let (fetcher, feed) = ctx_parts();
        let ctx = AdapterContext {
            fetcher: &fetcher,
            renderer: None,
            feed: &feed,
        };
        let html = r#"<html><body>
          <a href="/2025/06/feedback-loops-in-serving">Feedback loops in serving</a>
          <a href="/2025/06/feedback-loops-in-serving/">Feedback loops in serving</a>
          <a href="https://engineering.atspotify.com/2025/07/request-hedging">Request hedging</a>
          <a href="/about">About us</a>
          <a href="/2025/not-a-month/slug">Broken path</a>
        </body></html>"#;
        let posts = SpaAdapter::parse(html, &ctx);
        assert_eq!(posts.len(), 2);
        assert!(posts[0].url.contains("/2025/06/"));
        assert!(posts[1].url.contains("/2025/07/"));
    }

    #[tokio::test]
    async fn test_browser_required_without_renderer() {
        let (fetcher, feed) = ctx_parts();
        let ctx = AdapterContext {
            fetcher: &fetcher,
            renderer: None,
            feed: &feed,
        };
        let err = SpaAdapter::discover(&ctx).await.unwrap_err();
        assert!(matches!(err, AdapterError::BrowserRequired { .. }));
    }
}
