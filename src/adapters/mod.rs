//! Source adapters: polymorphic fetch + parse per publication family.
//!
//! An adapter turns one [`FeedConfig`] into a list of [`CandidatePost`]s.
//! The variants are a closed set selected by [`Adapter::select`] with the
//! first matching rule winning:
//!
//! 1. explicit `hints` on the source config,
//! 2. host on the single-page-application list → [`SpaAdapter`],
//! 3. host on the bot-gated list → [`BrowserFallbackAdapter`],
//! 4. host on the Medium family list → [`MediumAdapter`],
//! 5. otherwise → [`GenericAdapter`] (feed/HTML auto-detection).
//!
//! All variants share the resilient fetch layer in [`crate::fetch`]; the
//! browser-rendering capability is optional and its absence degrades the
//! adapters that need it.

pub mod browser_fallback;
pub mod feed;
pub mod generic;
pub mod html_feed;
pub mod medium;
pub mod spa;

pub use browser_fallback::BrowserFallbackAdapter;
pub use generic::GenericAdapter;
pub use medium::MediumAdapter;
pub use spa::SpaAdapter;

use crate::config::{AdapterHint, FeedConfig, FetchConfig};
use crate::errors::{AdapterError, FetchError};
use crate::fetch::{host_in_list, host_of, Fetcher};
use crate::models::CandidatePost;
use crate::render::RendererPool;

/// Everything an adapter needs for one discovery pass.
pub struct AdapterContext<'a> {
    pub fetcher: &'a Fetcher,
    pub renderer: Option<&'a RendererPool>,
    pub feed: &'a FeedConfig,
}

/// Tagged adapter variant. No runtime reflection: selection happens once
/// per tick from static configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    Generic,
    Medium,
    Spa,
    BrowserFallback,
}

impl Adapter {
    /// Pick the adapter for a source. Explicit hints win over host rules.
    pub fn select(feed: &FeedConfig, fetch_config: &FetchConfig) -> Adapter {
        match feed.hints {
            Some(AdapterHint::Spa) => return Adapter::Spa,
            Some(AdapterHint::PrefersBrowser) => return Adapter::BrowserFallback,
            Some(AdapterHint::PrefersHtml) => return Adapter::Generic,
            None => {}
        }

        let Some(host) = host_of(&feed.url) else {
            return Adapter::Generic;
        };
        if host_in_list(&host, &fetch_config.spa_hosts) {
            Adapter::Spa
        } else if host_in_list(&host, &fetch_config.bot_gated_hosts) {
            Adapter::BrowserFallback
        } else if host_in_list(&host, &fetch_config.medium_hosts) {
            Adapter::Medium
        } else {
            Adapter::Generic
        }
    }

    /// Fetch and parse: the default `parse(fetch(...))` composition with
    /// adapter-specific hooks.
    pub async fn discover(
        self,
        ctx: &AdapterContext<'_>,
    ) -> Result<Vec<CandidatePost>, AdapterError> {
        match self {
            Adapter::Generic => GenericAdapter::discover(ctx).await,
            Adapter::Medium => MediumAdapter::discover(ctx).await,
            Adapter::Spa => SpaAdapter::discover(ctx).await,
            Adapter::BrowserFallback => BrowserFallbackAdapter::discover(ctx).await,
        }
    }
}

/// Fetch a source over HTTP, falling through to the render capability on a
/// bot challenge. With no renderer configured the challenge surfaces to the
/// orchestrator, which records it and skips the source for this tick.
pub(crate) async fn fetch_or_render(ctx: &AdapterContext<'_>) -> Result<Vec<u8>, AdapterError> {
    match ctx.fetcher.fetch_bytes(&ctx.feed.url).await {
        Ok(bytes) => Ok(bytes),
        Err(FetchError::BotChallenged { url, status }) => match ctx.renderer {
            Some(renderer) => {
                tracing::info!(url, status, "bot challenge, falling through to browser render");
                let page = renderer
                    .render(&url)
                    .await
                    .map_err(|_| FetchError::BotChallenged {
                        url: url.clone(),
                        status,
                    })?;
                Ok(page.html.into_bytes())
            }
            None => Err(FetchError::BotChallenged { url, status }.into()),
        },
        Err(e) => Err(e.into()),
    }
}
