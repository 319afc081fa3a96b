//! LAR: the composite per-domain score.
//!
//! Audit records are grouped by domain, averaged into E (eligibility) and
//! X (extensibility), blended with the externally supplied A (Share of
//! Answer) and S (sentiment, audit-derived unless overridden) and capped
//! when E falls below the eligibility gate.
//!
//! ```text
//! LAR = wE*E + wX*X + wA*A + wS*S      (0.40 / 0.25 / 0.25 / 0.10)
//! if E < gate: LAR = min(LAR, cap)     (60 / 40)
//! ```

pub mod aggregate;
pub mod tables;
mod weighted;

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::audit::{PolicyTier, ProductRecord};
use crate::config::LarConfig;
use crate::report::round2;

pub use aggregate::{DomainAggregate, RatingStats, SentimentItem};
pub use weighted::CategoryResult;
pub use tables::{domain_key, CategoryMap, Intent, Peer, PeerTable, ScoreTable, DEFAULT_CATEGORY};

/// The four LAR dimensions of one domain (or domain/category pair).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Dimensions {
    pub e: f64,
    pub x: f64,
    pub a: f64,
    pub s: f64,
}

/// Weighted blend of [`Dimensions`], before and after the cap.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Composite {
    pub raw: f64,
    pub lar: f64,
}

impl Composite {
    /// Whether the cap lowered the score by more than `epsilon`.
    pub fn capped(&self, epsilon: f64) -> bool {
        self.raw - self.lar > epsilon
    }
}

/// Where a domain's S came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentimentSource {
    Manual,
    Audit,
    None,
}

impl SentimentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Audit => "audit",
            Self::None => "none",
        }
    }
}

/// Per-dimension contributions to the uncapped LAR.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Contributions {
    pub e: f64,
    pub x: f64,
    pub a: f64,
    pub s: f64,
}

impl Contributions {
    pub fn sum(&self) -> f64 {
        self.e + self.x + self.a + self.s
    }
}

/// Cap `raw` when `e` is below the eligibility gate.
pub fn apply_cap(raw: f64, e: f64, config: &LarConfig) -> f64 {
    if e < config.eligibility_gate {
        raw.min(config.eligibility_cap)
    } else {
        raw
    }
}

/// Everything computed for one domain.
#[derive(Debug, Clone)]
pub struct DomainResult {
    pub key: String,
    pub brand: String,
    pub categories: Vec<String>,
    pub dims: Dimensions,
    pub composite: Composite,
    pub contributions: Contributions,
    pub s_source: SentimentSource,
    /// Records behind E and X; empty for domains only present in A/S tables.
    pub aggregate: DomainAggregate,
    /// Per-category breakdown; only filled by the category-weighted variant.
    pub per_category: Vec<CategoryResult>,
}

impl DomainResult {
    pub fn row(&self) -> LarRow {
        LarRow {
            key: self.key.clone(),
            brand: self.brand.clone(),
            categories: self.categories.join(","),
            e: round2(self.dims.e),
            x: round2(self.dims.x),
            a: round2(self.dims.a),
            s: round2(self.dims.s),
            lar: round2(self.composite.lar),
        }
    }

    pub fn attribution(&self, config: &LarConfig) -> AttributionRow {
        let agg = &self.aggregate;
        let stats = agg.rating_stats();
        AttributionRow {
            key: self.key.clone(),
            contribution_e: round2(self.contributions.e),
            contribution_x: round2(self.contributions.x),
            contribution_a: round2(self.contributions.a),
            contribution_s: round2(self.contributions.s),
            lar_before_cap: round2(self.composite.raw),
            lar: round2(self.composite.lar),
            capped: u8::from(self.composite.capped(config.cap_epsilon)),
            e: round2(self.dims.e),
            x: round2(self.dims.x),
            a: round2(self.dims.a),
            s: round2(self.dims.s),
            mean_product_score: round2(agg.mean_product_score()),
            mean_family_score: round2(agg.mean_family_score()),
            pages: agg.pages(),
            rate_structured_product_page: round2(agg.tier_rate(PolicyTier::StructuredOnProductPage)),
            rate_structured_policy_page: round2(agg.tier_rate(PolicyTier::StructuredOnPolicyPage)),
            rate_link_only: round2(agg.tier_rate(PolicyTier::LinkOnly)),
            rate_no_policy: round2(agg.tier_rate(PolicyTier::None)),
            specs_rate: round2(agg.specs_rate()),
            rated_pages: stats.rated,
            mean_rating: stats.mean_rating.map(round2),
            mean_count: stats.mean_count.map(round2),
            mean_confidence: stats.mean_confidence.map(round2),
            mean_source_weight: stats.mean_source_weight.map(round2),
            fallback_share: stats.fallback_share.map(round2),
            s_source: self.s_source.as_str(),
        }
    }
}

/// One row of the LAR table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LarRow {
    pub key: String,
    pub brand: String,
    pub categories: String,
    #[serde(rename = "E")]
    pub e: f64,
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "A")]
    pub a: f64,
    #[serde(rename = "S")]
    pub s: f64,
    #[serde(rename = "LAR")]
    pub lar: f64,
}

/// One row of the attribution table, keyed like [`LarRow`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributionRow {
    pub key: String,
    #[serde(rename = "E contribution")]
    pub contribution_e: f64,
    #[serde(rename = "X contribution")]
    pub contribution_x: f64,
    #[serde(rename = "A contribution")]
    pub contribution_a: f64,
    #[serde(rename = "S contribution")]
    pub contribution_s: f64,
    #[serde(rename = "LAR before cap")]
    pub lar_before_cap: f64,
    #[serde(rename = "LAR")]
    pub lar: f64,
    #[serde(rename = "Capped")]
    pub capped: u8,
    #[serde(rename = "E")]
    pub e: f64,
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "A")]
    pub a: f64,
    #[serde(rename = "S")]
    pub s: f64,
    #[serde(rename = "Mean product score")]
    pub mean_product_score: f64,
    #[serde(rename = "Mean family score")]
    pub mean_family_score: f64,
    #[serde(rename = "Audited pages")]
    pub pages: u64,
    #[serde(rename = "Policy structured on product page (%)")]
    pub rate_structured_product_page: f64,
    #[serde(rename = "Policy structured on policy page (%)")]
    pub rate_structured_policy_page: f64,
    #[serde(rename = "Policy link only (%)")]
    pub rate_link_only: f64,
    #[serde(rename = "No policy (%)")]
    pub rate_no_policy: f64,
    #[serde(rename = "Specs with units (%)")]
    pub specs_rate: f64,
    #[serde(rename = "Rated pages")]
    pub rated_pages: u64,
    #[serde(rename = "Mean rating")]
    pub mean_rating: Option<f64>,
    #[serde(rename = "Mean review count")]
    pub mean_count: Option<f64>,
    #[serde(rename = "Mean confidence")]
    pub mean_confidence: Option<f64>,
    #[serde(rename = "Mean source weight")]
    pub mean_source_weight: Option<f64>,
    #[serde(rename = "Fallback rating share (%)")]
    pub fallback_share: Option<f64>,
    #[serde(rename = "S source")]
    pub s_source: &'static str,
}

/// Externally supplied inputs beside the audit records.
#[derive(Debug, Clone, Copy, Default)]
pub struct LarInputs<'a> {
    /// Share of Answer per domain; absent domains get A = 0.
    pub soa: Option<&'a ScoreTable>,
    /// Manual sentiment; overrides the audit-derived S where present.
    pub sentiment: Option<&'a ScoreTable>,
    pub peers: Option<&'a PeerTable>,
}

/// Computes LAR rows from audit records.
#[derive(Debug, Clone, Default)]
pub struct LarCalculator {
    config: LarConfig,
}

impl LarCalculator {
    pub fn new(config: LarConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LarConfig {
        &self.config
    }

    /// Blend dimensions and apply the eligibility cap.
    pub fn blend(&self, dims: &Dimensions) -> (Composite, Contributions) {
        let c = &self.config;
        let contributions = Contributions {
            e: c.weight_e * dims.e,
            x: c.weight_x * dims.x,
            a: c.weight_a * dims.a,
            s: c.weight_s * dims.s,
        };
        let raw = contributions.sum();
        let composite = Composite {
            raw,
            lar: apply_cap(raw, dims.e, c),
        };
        (composite, contributions)
    }

    /// Domain-wide LAR for every audited domain and every domain named in
    /// the A/S tables, sorted by key. Error rows count as zeroed pages.
    pub fn compute(&self, records: &[ProductRecord], inputs: LarInputs<'_>) -> Vec<DomainResult> {
        let groups = group_by_domain(records);
        let keys = all_keys(&groups, &inputs);

        keys.par_iter()
            .map(|key| {
                let mut aggregate = DomainAggregate::default();
                for record in groups.get(key).into_iter().flatten() {
                    aggregate.add(record, &self.config);
                }
                let (a, s, s_source) = self.external(key, &aggregate, &inputs);
                let dims = Dimensions {
                    e: aggregate.e(&self.config),
                    x: aggregate.x(&self.config),
                    a,
                    s,
                };
                let (composite, contributions) = self.blend(&dims);
                let peer = inputs.peers.and_then(|p| p.find(key));
                DomainResult {
                    key: key.clone(),
                    brand: peer.map(|p| p.brand.clone()).unwrap_or_default(),
                    categories: peer.map(|p| p.categories.clone()).unwrap_or_default(),
                    dims,
                    composite,
                    contributions,
                    s_source,
                    aggregate,
                    per_category: Vec::new(),
                }
            })
            .collect()
    }

    /// A and S for a domain: A from the table (default 0), S from the manual
    /// table when present, else the audit mean, else 0.
    fn external(
        &self,
        key: &str,
        aggregate: &DomainAggregate,
        inputs: &LarInputs<'_>,
    ) -> (f64, f64, SentimentSource) {
        let a = inputs.soa.and_then(|t| t.get(key)).unwrap_or(0.0);
        if let Some(manual) = inputs.sentiment.and_then(|t| t.get(key)) {
            return (a, manual, SentimentSource::Manual);
        }
        match aggregate.s() {
            Some(s) => (a, s, SentimentSource::Audit),
            None => (a, 0.0, SentimentSource::None),
        }
    }
}

/// Records grouped by normalised host, error rows included.
pub(crate) fn group_by_domain(records: &[ProductRecord]) -> BTreeMap<String, Vec<&ProductRecord>> {
    let mut groups: BTreeMap<String, Vec<&ProductRecord>> = BTreeMap::new();
    let mut unkeyed = 0usize;
    for record in records {
        let key = domain_key(&record.url);
        if key.is_empty() {
            unkeyed += 1;
            continue;
        }
        groups.entry(key).or_default().push(record);
    }
    if unkeyed > 0 {
        tracing::debug!("skipped {unkeyed} rows without a host");
    }
    groups
}

fn all_keys<T>(groups: &BTreeMap<String, T>, inputs: &LarInputs<'_>) -> Vec<String> {
    let mut keys: BTreeSet<String> = groups.keys().cloned().collect();
    for table in [inputs.soa, inputs.sentiment].into_iter().flatten() {
        keys.extend(table.keys().cloned());
    }
    keys.into_iter().collect()
}
