//! Headless Chromium over the DevTools protocol (chromiumoxide).
//!
//! One browser process serves a whole run; every audited page gets its own
//! tab, opened on `about:blank` and closed after the HTML is read.

use super::{NavigationResult, RenderContext, Renderer};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::FetchConfig;

/// Env var pointing at a Chromium/Chrome executable.
pub const CHROMIUM_PATH_ENV: &str = "LAR_CHROMIUM_PATH";

/// Install locations under `~/.lar/chromium`, per platform.
#[cfg(target_os = "macos")]
const HOME_INSTALLS: [&str; 3] = [
    "chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
    "chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
    "chrome",
];
#[cfg(not(target_os = "macos"))]
const HOME_INSTALLS: [&str; 2] = ["chrome-linux64/chrome", "chrome"];

/// Executable names searched on `PATH`.
const PATH_BINARIES: [&str; 4] = ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"];

const MACOS_APP: &str = "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome";

/// Locate a Chromium binary: `LAR_CHROMIUM_PATH`, `~/.lar/chromium`, `PATH`,
/// then the macOS application bundle.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(CHROMIUM_PATH_ENV) {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
        tracing::warn!("{CHROMIUM_PATH_ENV}={p} does not exist, searching elsewhere");
    }

    let home_install = dirs::home_dir().and_then(|home| {
        let root = home.join(".lar/chromium");
        HOME_INSTALLS
            .iter()
            .map(|rel| root.join(rel))
            .find(|candidate| candidate.exists())
    });

    home_install
        .or_else(|| PATH_BINARIES.iter().find_map(|name| which::which(name).ok()))
        .or_else(|| {
            let app = PathBuf::from(MACOS_APP);
            (cfg!(target_os = "macos") && app.exists()).then_some(app)
        })
}

/// Shared headless browser plus a count of open tabs.
pub struct ChromiumRenderer {
    browser: Mutex<Option<Browser>>,
    events: JoinHandle<()>,
    open_tabs: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch headless Chromium, presenting the same user agent and
    /// language as the HTTP fetcher so rendered and fetched pages match.
    pub async fn launch(fetch: &FetchConfig) -> Result<Self> {
        let executable = find_chromium()
            .with_context(|| format!("Chromium not found; set {CHROMIUM_PATH_ENV}"))?;
        tracing::debug!("launching {}", executable.display());

        let lang = fetch
            .accept_language
            .split(',')
            .next()
            .unwrap_or("en-US")
            .trim();
        let config = BrowserConfig::builder()
            .chrome_executable(executable)
            .request_timeout(Duration::from_millis(fetch.render_timeout_ms))
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--mute-audio")
            .arg(format!("--user-agent={}", fetch.user_agent))
            .arg(format!("--lang={lang}"))
            .build()
            .map_err(|e| anyhow!("invalid browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // The DevTools connection only makes progress while its handler is polled.
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!("devtools event error: {e}");
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            events,
            open_tabs: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().context("browser already shut down")?;
        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to open tab")?;
        drop(guard);

        self.open_tabs.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(ChromiumTab {
            page,
            open_tabs: Arc::clone(&self.open_tabs),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        let closed = browser.close().await.map(|_| ()).context("failed to close Chromium");
        if let Err(e) = browser.wait().await {
            tracing::debug!("waiting for Chromium to exit: {e}");
        }
        self.events.abort();
        closed
    }

    fn active_contexts(&self) -> usize {
        self.open_tabs.load(Ordering::Relaxed)
    }
}

/// One browser tab.
pub struct ChromiumTab {
    page: Page,
    open_tabs: Arc<AtomicUsize>,
}

impl ChromiumTab {
    async fn current_url(&self) -> Result<Option<String>> {
        let url = self.page.url().await.context("failed to read tab URL")?;
        Ok(url.map(|u| u.to_string()))
    }
}

#[async_trait]
impl RenderContext for ChromiumTab {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let started = Instant::now();
        tokio::time::timeout(Duration::from_millis(timeout_ms), self.page.goto(url))
            .await
            .map_err(|_| anyhow!("navigation to {url} timed out after {timeout_ms}ms"))?
            .with_context(|| format!("navigation to {url} failed"))?;

        let final_url = self
            .current_url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());
        Ok(NavigationResult {
            final_url,
            load_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        self.page
            .evaluate(script)
            .await
            .context("script evaluation failed")?
            .into_value()
            .map_err(|e| anyhow!("script result is not JSON: {e:?}"))
    }

    async fn get_html(&self) -> Result<String> {
        self.page.content().await.context("failed to read rendered HTML")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let Self { page, open_tabs } = *self;
        open_tabs.fetch_sub(1, Ordering::Relaxed);
        page.close().await.context("failed to close tab")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bogus_env_path_is_ignored() {
        std::env::set_var(CHROMIUM_PATH_ENV, "/nonexistent/lar/chrome");
        let found = find_chromium();
        std::env::remove_var(CHROMIUM_PATH_ENV);
        assert_ne!(found, Some(PathBuf::from("/nonexistent/lar/chrome")));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_renders_jsonld_injected_by_script() {
        let renderer = ChromiumRenderer::launch(&FetchConfig::default())
            .await
            .expect("failed to launch Chromium");
        let mut tab = renderer.new_context().await.expect("failed to open tab");
        assert_eq!(renderer.active_contexts(), 1);

        let page = "data:text/html,<script>var s=document.createElement('script');\
                    s.type='application/ld+json';s.text='{\"@type\":\"Product\"}';\
                    document.head.appendChild(s);</script><h1>Item</h1>";
        tab.navigate(page, 10_000).await.expect("navigation failed");
        tab.wait_for_idle(2_000).await;

        let html = tab.get_html().await.expect("get_html failed");
        assert!(html.contains("application/ld+json"));
        assert!(html.contains("<h1>Item</h1>"));

        tab.close().await.expect("close failed");
        assert_eq!(renderer.active_contexts(), 0);
        renderer.shutdown().await.expect("shutdown failed");
        assert!(renderer.new_context().await.is_err());
    }
}
