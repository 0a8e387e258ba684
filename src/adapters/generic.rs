//! Default adapter with feed/HTML auto-detection.
//!
//! Fetches over plain HTTP (render fallback only on a bot challenge) and
//! detects the payload at parse time: strict RSS/Atom/JSON-Feed first, then
//! HTML-as-feed extraction over the same bytes. An empty response body is
//! an empty candidate list, not an error.

use crate::errors::AdapterError;
use crate::models::CandidatePost;

use super::{feed, fetch_or_render, html_feed, AdapterContext};

pub struct GenericAdapter;

impl GenericAdapter {
    pub async fn discover(ctx: &AdapterContext<'_>) -> Result<Vec<CandidatePost>, AdapterError> {
        let bytes = fetch_or_render(ctx).await?;
        match Self::parse(&bytes, ctx) {
            Ok(posts) => Ok(posts),
            Err(parse_err) => {
                // An index page that advertises its own feed document gets
                // one follow-up fetch of that document.
                let html = String::from_utf8_lossy(&bytes);
                let Some(feed_url) = html_feed::find_alternate_feed_link(&html, &ctx.feed.url)
                else {
                    return Err(parse_err);
                };
                tracing::debug!(
                    source = %ctx.feed.name,
                    feed_url = %feed_url,
                    "following advertised alternate feed"
                );
                let feed_bytes = ctx.fetcher.fetch_bytes(&feed_url).await.map_err(AdapterError::from)?;
                feed::parse_feed_document(&feed_bytes, &ctx.feed.name, &feed_url)
            }
        }
    }

    pub fn parse(
        bytes: &[u8],
        ctx: &AdapterContext<'_>,
    ) -> Result<Vec<CandidatePost>, AdapterError> {
        if bytes.is_empty() {
            return Ok(vec![]);
        }

        match feed::parse_feed_document(bytes, &ctx.feed.name, &ctx.feed.url) {
            Ok(posts) => Ok(posts),
            Err(feed_err) => {
                let html = String::from_utf8_lossy(bytes);
                let posts = html_feed::extract_from_html(&html, &ctx.feed.name, &ctx.feed.url);
                if posts.is_empty() {
                    // Neither path produced entries; report the stricter
                    // failure.
                    Err(feed_err)
                } else {
                    tracing::debug!(
                        source = %ctx.feed.name,
                        count = posts.len(),
                        "feed parse failed, HTML fallback succeeded"
                    );
                    Ok(posts)
                }
            }
        }
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
            name: "example".into(),
            url: "https://x.test/blog".into(),
            poll_interval_minutes: 60,
            max_posts_per_tick: 10,
            enabled: true,
            hints: None,
        };
        (fetcher, feed)
    }

    #[test]
    fn test_empty_bytes_is_empty_list() {
        let (fetcher, feed) = ctx_parts();
        let ctx = AdapterContext {
            fetcher: &fetcher,
            renderer: None,
            feed: &feed,
        };
        assert!(GenericAdapter::parse(b"", &ctx).unwrap().is_empty());
    }

    #[test]
    fn test_rss_bytes_use_feed_path() {
        let (fetcher, feed) = ctx_parts();
        let ctx = AdapterContext {
            fetcher: &fetcher,
            renderer: None,
            feed: &feed,
        };
        let rss = r#"<rss version="2.0"><channel>
            <item><title>A real post</title><link>https://x.test/a</link></item>
        </channel></rss>"#;
        let posts = GenericAdapter::parse(rss.as_bytes(), &ctx).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].url, "https://x.test/a");
    }

    #[test]
    fn test_malformed_xml_falls_back_to_html() {
        let (fetcher, feed) = ctx_parts();
        let ctx = AdapterContext {
            fetcher: &fetcher,
            renderer: None,
            feed: &feed,
        };
        // Broken XML, but valid-enough HTML with article markup.
        let html = r#"<rss><html><body>
          <article><h2><a href="/blog/recovered-post">Recovered from the fallback</a></h2></article>
        </body></html>"#;
        let posts = GenericAdapter::parse(html.as_bytes(), &ctx).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].url, "https://x.test/blog/recovered-post");
    }

    #[test]
    fn test_unparseable_everything_is_parse_error() {
        let (fetcher, feed) = ctx_parts();
        let ctx = AdapterContext {
            fetcher: &fetcher,
            renderer: None,
            feed: &feed,
        };
        let err = GenericAdapter::parse(b"%%% nothing useful %%%", &ctx).unwrap_err();
        assert!(matches!(err, AdapterError::ParseFormat { .. }));
    }
}
