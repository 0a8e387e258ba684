//! Page-rendering capability interface.
//!
//! JavaScript-only and bot-gated sources need a real browser to produce
//! logged-out HTML. The engine treats that browser as an injected
//! capability: a [`PageRenderer`] renders one URL to HTML, and
//! [`RendererPool`] wraps it with the global concurrency cap and borrow
//! timeout so adapters cannot oversubscribe the browser fleet. Absence of a
//! renderer degrades the adapters that need one (`ErrBrowserRequired`).

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::BrowserConfig;

/// A fully rendered page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    pub status: u16,
}

/// Render a URL in a real browser context and return the settled DOM.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage>;
}

/// Concurrency-capped wrapper around a renderer implementation.
///
/// Holds `max_concurrent_browsers` permits; a borrow that cannot acquire a
/// permit within the render timeout fails rather than queueing unboundedly.
pub struct RendererPool {
    inner: Arc<dyn PageRenderer>,
    permits: Arc<Semaphore>,
    borrow_timeout: Duration,
}

impl RendererPool {
    pub fn new(inner: Arc<dyn PageRenderer>, config: &BrowserConfig) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(config.max_concurrent_browsers)),
            borrow_timeout: Duration::from_secs(config.render_timeout_secs),
        }
    }

    /// Number of renders that could start right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn render(&self, url: &str) -> Result<RenderedPage> {
        let permit = tokio::time::timeout(self.borrow_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for a browser context"))??;

        let result = tokio::time::timeout(self.borrow_timeout, self.inner.render(url))
            .await
            .map_err(|_| anyhow::anyhow!("render timed out for {url}"))?;
        drop(permit);
        result
    }
}
