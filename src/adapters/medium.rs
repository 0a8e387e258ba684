//! Medium-family adapter.
//!
//! Medium serves logged-out article lists only to real browsers, so `fetch`
//! requires the render capability and fails with `ErrBrowserRequired` when
//! none is configured. Parsing reuses HTML-as-feed extraction, scoped to
//! links that stay on a Medium-family host.

use crate::errors::AdapterError;
use crate::fetch::{host_in_list, host_of};
use crate::models::CandidatePost;

use super::{html_feed, AdapterContext};

pub struct MediumAdapter;

impl MediumAdapter {
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
        let medium_hosts = &ctx.fetcher.config().medium_hosts;
        html_feed::extract_from_html(html, &ctx.feed.name, &ctx.feed.url)
            .into_iter()
            .filter(|post| {
                host_of(&post.url).is_some_and(|h| host_in_list(&h, medium_hosts))
            })
            .collect()
    }
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
            name: "acme-eng".into(),
            url: "https://medium.com/acme-eng".into(),
            poll_interval_minutes: 60,
            max_posts_per_tick: 10,
            enabled: true,
            hints: None,
        };
        (fetcher, feed)
    }

    #[tokio::test]
    async fn test_browser_required_without_renderer() {
        let (fetcher, feed) = ctx_parts();
        let ctx = AdapterContext {
            fetcher: &fetcher,
            renderer: None,
            feed: &feed,
        };
        let err = MediumAdapter::discover(&ctx).await.unwrap_err();
        assert!(matches!(err, AdapterError::BrowserRequired { .. }));
    }

    #[test]
    fn test_parse_keeps_only_medium_hosts() {
        let (fetcher, feed) = ctx_parts();
        let ctx = AdapterContext {
            fetcher: &fetcher,
            renderer: None,
            feed: &feed,
        };
        let html = r#"<html><body>
          <article><h2><a href="https://medium.com/acme-eng/blog/the-inside-story">The inside story of our rewrite</a></h2></article>
          <article><h2><a href="https://elsewhere.test/blog/offsite-post">An offsite link in the sidebar</a></h2></article>
        </body></html>"#;
        let posts = MediumAdapter::parse(html, &ctx);
        assert_eq!(posts.len(), 1);
        assert!(posts[0].url.starts_with("https://medium.com/"));
    }
}
