//! JS-rendering fallback: render a page once in a headless browser and
//! re-run structured-data and rating extraction on the rendered DOM.
//!
//! A page is rendered at most once per call to [`JsFallback::render`], and
//! the same rendered HTML feeds both the structure signals and the rating.
//! Any browser failure yields `None`, which callers treat as "no additional
//! signal".

use std::sync::Arc;

use crate::config::FetchConfig;
use crate::renderer::{RenderContext, Renderer};

use super::fallback::extract_fallback_rating;
use super::microdata::{microdata_rating, rdfa_rating};
use super::rating::{jsonld_rating, RatingSignal, RatingSource};
use super::structured::{has_server_rendered_jsonld, PageGraph};

/// Everything extracted from one rendering pass.
#[derive(Debug, Clone)]
pub struct JsBundle {
    pub rendered_html: String,
    /// URL after redirects, used as the base for `@id` resolution.
    pub final_url: String,
    /// Whether the rendered DOM holds a JSON-LD script tag.
    pub has_jsonld: bool,
    pub graph: PageGraph,
    pub rating: Option<RatingSignal>,
}

impl JsBundle {
    /// Run every extractor over rendered HTML.
    pub fn from_rendered(rendered_html: String, final_url: &str) -> Self {
        let has_jsonld = has_server_rendered_jsonld(&rendered_html);
        let graph = PageGraph::from_html(&rendered_html, final_url);
        let rating = rendered_rating(&rendered_html, &graph);
        Self {
            rendered_html,
            final_url: final_url.to_string(),
            has_jsonld,
            graph,
            rating,
        }
    }
}

/// Rating from rendered HTML: JSON-LD, then the fallback cascade, then
/// microdata, then RDFa. Every source is tagged as JS-derived.
pub fn rendered_rating(html: &str, graph: &PageGraph) -> Option<RatingSignal> {
    jsonld_rating(graph, RatingSource::JsJsonLd)
        .or_else(|| {
            extract_fallback_rating(html).map(|signal| {
                let source = signal.source.rendered();
                signal.with_source(source)
            })
        })
        .or_else(|| microdata_rating(html))
        .or_else(|| rdfa_rating(html))
}

/// Drives a shared [`Renderer`], one fresh context per page.
#[derive(Clone)]
pub struct JsFallback {
    renderer: Arc<dyn Renderer>,
    render_timeout_ms: u64,
    idle_timeout_ms: u64,
}

impl JsFallback {
    pub fn new(renderer: Arc<dyn Renderer>, config: &FetchConfig) -> Self {
        Self {
            renderer,
            render_timeout_ms: config.render_timeout_ms,
            idle_timeout_ms: config.idle_timeout_ms,
        }
    }

    /// Render `url` once and extract from the result; `None` on any failure.
    pub async fn render(&self, url: &str) -> Option<JsBundle> {
        match self.render_html(url).await {
            Ok((html, final_url)) => Some(JsBundle::from_rendered(html, &final_url)),
            Err(e) => {
                tracing::warn!("JS fallback failed for {url}: {e:#}");
                None
            }
        }
    }

    async fn render_html(&self, url: &str) -> anyhow::Result<(String, String)> {
        let mut ctx = self.renderer.new_context().await?;
        let result = self.drive(ctx.as_mut(), url).await;
        if let Err(e) = ctx.close().await {
            tracing::debug!("closing render context failed: {e:#}");
        }
        result
    }

    async fn drive(&self, ctx: &mut dyn RenderContext, url: &str) -> anyhow::Result<(String, String)> {
        let nav = ctx.navigate(url, self.render_timeout_ms).await?;
        if !ctx.wait_for_idle(self.idle_timeout_ms).await {
            tracing::debug!("{url} never reached network idle, using current DOM");
        }
        let html = ctx.get_html().await?;
        let final_url = if nav.final_url.is_empty() {
            url.to_string()
        } else {
            nav.final_url
        };
        Ok((html, final_url))
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.renderer.shutdown().await {
            tracing::debug!("renderer shutdown failed: {e:#}");
        }
    }
}
