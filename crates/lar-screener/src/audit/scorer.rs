//! The per-URL audit: fetch, extract, optionally render, score.

use std::sync::Arc;

use crate::acquisition::fallback::extract_fallback_rating;
use crate::acquisition::http_client::{FetchError, Fetcher};
use crate::acquisition::js_fallback::{JsBundle, JsFallback};
use crate::acquisition::policy::{find_policy_links, has_policy_page_markup};
use crate::acquisition::rating::{jsonld_rating, RatingSignal, RatingSource};
use crate::acquisition::structured::{has_server_rendered_jsonld, IdentifierTier, PageGraph};
use crate::config::{FamilyWeights, ProductWeights, ScreenerConfig};

use super::record::ProductRecord;
use super::signals::StructureSignals;

/// Why a URL produced an error row instead of scores.
#[derive(thiserror::Error, Debug)]
pub enum AuditError {
    #[error("invalid URL {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// An audit target: a URL plus the intent it was discovered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTarget {
    pub url: String,
    pub intent_id: Option<String>,
}

impl UrlTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            intent_id: None,
        }
    }
}

/// Scores product pages one at a time.
pub struct PageScorer {
    fetcher: Arc<dyn Fetcher>,
    js: Option<JsFallback>,
    config: ScreenerConfig,
}

impl PageScorer {
    /// `js = None` disables the browser fallback entirely.
    pub fn new(fetcher: Arc<dyn Fetcher>, js: Option<JsFallback>, config: ScreenerConfig) -> Self {
        Self { fetcher, js, config }
    }

    pub fn config(&self) -> &ScreenerConfig {
        &self.config
    }

    /// Audit one URL. Never fails: problems become the row's `error`.
    pub async fn score(&self, url: &str) -> ProductRecord {
        match self.try_score(url).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("audit failed for {url}: {e}");
                ProductRecord::failed(url, e)
            }
        }
    }

    /// Audit every target in order, calling `on_record` after each one.
    pub async fn score_all(
        &self,
        targets: &[UrlTarget],
        mut on_record: impl FnMut(&ProductRecord),
    ) -> Vec<ProductRecord> {
        let mut records = Vec::with_capacity(targets.len());
        for target in targets {
            let mut record = self.score(&target.url).await;
            record.intent_id = target.intent_id.clone().unwrap_or_default();
            on_record(&record);
            records.push(record);
        }
        records
    }

    async fn try_score(&self, url: &str) -> Result<ProductRecord, AuditError> {
        let parsed = url::Url::parse(url.trim()).map_err(|_| AuditError::InvalidUrl(url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AuditError::InvalidUrl(url.to_string()));
        }
        let url = parsed.as_str();

        let html = self.fetcher.fetch(url, self.config.fetch.timeout_ms).await?;

        let server_jsonld = has_server_rendered_jsonld(&html);
        let graph = PageGraph::from_html(&html, url);
        let mut signals = StructureSignals::from_graph(&graph);
        let mut links = find_policy_links(&html, url);

        let primary = jsonld_rating(&graph, RatingSource::JsonLd);
        let mut fallback = match primary {
            Some(_) => None,
            None => extract_fallback_rating(&html),
        };
        drop(html);

        let mut js_jsonld = false;
        let needs_js = !server_jsonld || !signals.has_product || (primary.is_none() && fallback.is_none());
        if needs_js {
            if let Some(bundle) = self.render(url).await {
                js_jsonld = !server_jsonld && bundle.has_jsonld;
                signals.fill_gaps(&StructureSignals::from_graph(&bundle.graph));
                if !links.found {
                    links = find_policy_links(&bundle.rendered_html, &bundle.final_url);
                }
                if primary.is_none() && fallback.is_none() {
                    fallback = bundle.rating;
                }
            }
        }

        let mut on_policy_page = false;
        if !signals.policy_structured {
            if let Some(policy_url) = links.first_url() {
                on_policy_page = self.policy_page_has_markup(policy_url).await;
            }
        }

        let mut record = ProductRecord {
            url: url.to_string(),
            server_jsonld,
            js_jsonld,
            has_product: signals.has_product,
            has_offer: signals.has_offer,
            has_service: signals.has_service,
            identifiers: signals.identifier_tier != IdentifierTier::None,
            ident_gtin: signals.identifier_tier == IdentifierTier::Gtin,
            ident_brand_mpn: signals.identifier_tier == IdentifierTier::BrandMpn,
            policies: signals.policy_structured || links.found || on_policy_page,
            policy_structured: signals.policy_structured,
            policy_link: links.found,
            policy_structured_on_policy_page: on_policy_page,
            specs_units: signals.specs_units,
            productgroup: signals.has_productgroup,
            ..ProductRecord::default()
        };
        record.product_score = product_score(&record, signals.identifier_tier, &self.config.scoring.product);
        record.family_score = family_score(&record, &signals, &self.config.scoring.family);
        apply_ratings(&mut record, primary.as_ref(), fallback.as_ref());

        tracing::debug!(
            "{url}: product_score={} family_score={} rating={}",
            record.product_score,
            record.family_score,
            if record.has_rating { "yes" } else { "no" }
        );
        Ok(record)
    }

    async fn render(&self, url: &str) -> Option<JsBundle> {
        let js = self.js.as_ref()?;
        tracing::debug!("rendering {url} for missing signals");
        js.render(url).await
    }

    /// Fetch a linked policy page with the short timeout and look for policy markup.
    async fn policy_page_has_markup(&self, policy_url: &str) -> bool {
        match self
            .fetcher
            .fetch(policy_url, self.config.fetch.policy_page_timeout_ms)
            .await
        {
            Ok(html) => has_policy_page_markup(&PageGraph::from_html(&html, policy_url)),
            Err(e) => {
                tracing::debug!("policy page {policy_url} unavailable: {e}");
                false
            }
        }
    }
}

/// Weighted sum of the page-level flags.
pub fn product_score(record: &ProductRecord, tier: IdentifierTier, w: &ProductWeights) -> u32 {
    let jsonld = if record.server_jsonld {
        w.jsonld
    } else if record.js_jsonld {
        w.jsonld_js
    } else {
        0
    };
    let identifiers = match tier {
        IdentifierTier::Gtin => w.identifiers_gtin,
        IdentifierTier::BrandMpn => w.identifiers_brand_mpn,
        IdentifierTier::None => 0,
    };
    let points = |flag: bool, weight: u32| if flag { weight } else { 0 };

    jsonld
        + points(record.has_product || record.has_service, w.product)
        + points(record.has_offer, w.offer)
        + identifiers
        + points(record.policies, w.policies)
        + points(record.specs_units, w.specs_with_units)
}

/// Weighted sum of the ProductGroup flags; 0 without a group.
pub fn family_score(record: &ProductRecord, signals: &StructureSignals, w: &FamilyWeights) -> u32 {
    if !signals.has_productgroup {
        return 0;
    }
    let points = |flag: bool, weight: u32| if flag { weight } else { 0 };
    // A group links to its children exactly when it declares variants.
    let links_to_children = signals.has_variant;

    w.productgroup
        + points(signals.has_variant, w.has_variant)
        + points(links_to_children, w.links_to_children)
        + points(record.policies, w.policies)
        + points(signals.spec_ranges, w.spec_ranges)
}

fn apply_ratings(record: &mut ProductRecord, primary: Option<&RatingSignal>, fallback: Option<&RatingSignal>) {
    if let Some(r) = primary {
        record.rating_value = r.value.clone();
        record.rating_count = r.count.clone();
        record.rating_source = r.source.to_string();
    } else if let Some(r) = fallback {
        record.rating_value_fallback = r.value.clone();
        record.rating_count_fallback = r.count.clone();
        record.rating_source_fallback = r.source.to_string();
        record.rating_source = r.source.to_string();
    }
    record.has_rating = primary.is_some() || fallback.is_some();
}
