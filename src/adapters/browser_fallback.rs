//! Browser-first adapter for bot-gated hosts.
//!
//! Same interface as the generic adapter, but when the render capability is
//! available it is tried before plain HTTP: hosts behind anti-bot CDNs
//! answer browsers and challenge everything else, so leading with HTTP just
//! burns a request. Plain HTTP remains the last resort when no renderer is
//! configured.

use crate::errors::AdapterError;
use crate::models::CandidatePost;

use super::{fetch_or_render, generic::GenericAdapter, AdapterContext};

pub struct BrowserFallbackAdapter;

impl BrowserFallbackAdapter {
    pub async fn discover(ctx: &AdapterContext<'_>) -> Result<Vec<CandidatePost>, AdapterError> {
        let bytes = match ctx.renderer {
            Some(renderer) => match renderer.render(&ctx.feed.url).await {
                Ok(page) => page.html.into_bytes(),
                Err(e) => {
                    tracing::warn!(
                        url = %ctx.feed.url,
                        error = %e,
                        "render failed, falling back to plain HTTP"
                    );
                    fetch_or_render(ctx).await?
                }
            },
            None => fetch_or_render(ctx).await?,
        };

        GenericAdapter::parse(&bytes, ctx)
    }
}
