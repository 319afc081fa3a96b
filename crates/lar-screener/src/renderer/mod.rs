//! Renderer abstraction for headless-browser page rendering.
//!
//! The audit only needs the final DOM as HTML, so the traits stay narrow:
//! open a context, navigate, wait for the network to settle, read the HTML,
//! close. [`NoopRenderer`] stands in when no browser is installed.

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::FetchConfig;

/// Script resolving to the number of resource entries the page has loaded.
const RESOURCE_COUNT_JS: &str = "performance.getEntriesByType('resource').length";

/// Poll interval while waiting for the network to go quiet.
const IDLE_POLL_MS: u64 = 250;

/// Consecutive unchanged polls that count as idle.
const IDLE_STABLE_POLLS: u32 = 2;

/// Where a navigation ended up and how long it took.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationResult {
    /// URL after redirects; the base for resolving relative `@id`s.
    pub final_url: String,
    /// Time until DOMContentLoaded in milliseconds.
    pub load_time_ms: u64,
}

/// Headless browser engine handing out one isolated context per page.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new, isolated browser context.
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Close the browser. Later context requests fail.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently open contexts.
    fn active_contexts(&self) -> usize;
}

/// A single browser context used to render one page.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate and wait for DOMContentLoaded, bounded by `timeout_ms`.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Execute JavaScript in the page and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// The full rendered HTML.
    async fn get_html(&self) -> Result<String>;
    async fn close(self: Box<Self>) -> Result<()>;

    /// Best-effort wait for network idle.
    ///
    /// Returns `true` once the loaded-resource count stops changing and
    /// `false` when `timeout_ms` elapses first. Never an error: a page that
    /// keeps polling is rendered as-is.
    async fn wait_for_idle(&self, timeout_ms: u64) -> bool {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
        let mut last: Option<u64> = None;
        let mut stable = 0u32;

        while tokio::time::Instant::now() < deadline {
            let count = self
                .execute_js(RESOURCE_COUNT_JS)
                .await
                .ok()
                .and_then(|v| v.as_u64());
            match (count, last) {
                (Some(c), Some(prev)) if c == prev => {
                    stable += 1;
                    if stable >= IDLE_STABLE_POLLS {
                        return true;
                    }
                }
                _ => stable = 0,
            }
            last = count;
            tokio::time::sleep(std::time::Duration::from_millis(IDLE_POLL_MS)).await;
        }
        false
    }
}

/// Stand-in used when no Chromium binary can be found.
///
/// Every context request fails, which the JS fallback reports as
/// "no additional signal".
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        Err(anyhow::anyhow!("browser not available, HTTP-only mode"))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
    fn active_contexts(&self) -> usize {
        0
    }
}

/// Launch Chromium if it can be found, else fall back to [`NoopRenderer`].
pub async fn launch_renderer(fetch: &FetchConfig) -> Arc<dyn Renderer> {
    match chromium::ChromiumRenderer::launch(fetch).await {
        Ok(renderer) => {
            tracing::info!("headless Chromium launched for JS fallback");
            Arc::new(renderer)
        }
        Err(e) => {
            tracing::warn!("JS fallback disabled: {e:#}");
            Arc::new(NoopRenderer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct GrowingPage {
        loaded: AtomicU64,
        stop_at: u64,
    }

    #[async_trait]
    impl RenderContext for GrowingPage {
        async fn navigate(&mut self, url: &str, _timeout_ms: u64) -> Result<NavigationResult> {
            Ok(NavigationResult {
                final_url: url.to_string(),
                load_time_ms: 0,
            })
        }
        async fn execute_js(&self, _script: &str) -> Result<serde_json::Value> {
            let n = self.loaded.load(Ordering::SeqCst);
            if n < self.stop_at {
                self.loaded.fetch_add(1, Ordering::SeqCst);
            }
            Ok(serde_json::json!(n))
        }
        async fn get_html(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_noop_renderer_refuses_contexts() {
        let renderer = NoopRenderer;
        assert!(renderer.new_context().await.is_err());
        assert_eq!(renderer.active_contexts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_idle_settles() {
        let page = GrowingPage {
            loaded: AtomicU64::new(0),
            stop_at: 3,
        };
        assert!(page.wait_for_idle(10_000).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_idle_gives_up() {
        let page = GrowingPage {
            loaded: AtomicU64::new(0),
            stop_at: u64::MAX,
        };
        assert!(!page.wait_for_idle(1_000).await);
    }
}
