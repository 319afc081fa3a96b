//! Rating monitor: re-check ratings of audited pages over time and report
//! review and rating trends.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::acquisition::fallback::extract_fallback_rating;
use crate::acquisition::http_client::Fetcher;
use crate::acquisition::js_fallback::JsFallback;
use crate::acquisition::rating::{jsonld_rating, parse_rating_count, parse_rating_value, RatingSignal, RatingSource};
use crate::acquisition::structured::PageGraph;
use crate::audit::record::zero_one;
use crate::audit::ProductRecord;
use crate::lar::tables::domain_key;

/// Number of review gainers listed in [`Trends`].
pub const TOP_GAINERS: usize = 10;

/// One timestamped rating observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingSnapshot {
    pub timestamp: String,
    pub url: String,
    pub domain: String,
    pub product_id: String,
    pub rating_value: String,
    pub rating_count: String,
    pub source: String,
    #[serde(with = "zero_one")]
    pub has_rating_current: bool,
    #[serde(with = "zero_one")]
    pub has_rating_audit: bool,
    pub rating_value_audit: String,
    pub rating_count_audit: String,
}

/// Product id from a `/p/<id>` URL, without query or fragment.
pub fn product_id(url: &str) -> String {
    url.rsplit_once("/p/")
        .map(|(_, tail)| tail.split(['?', '#']).next().unwrap_or_default())
        .unwrap_or_default()
        .trim_end_matches('/')
        .to_string()
}

/// The current run's timestamp.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Successfully audited records whose URL contains `domain_filter`.
pub fn monitor_targets<'a>(records: &'a [ProductRecord], domain_filter: Option<&str>) -> Vec<&'a ProductRecord> {
    records
        .iter()
        .filter(|r| !r.is_error() && !r.url.is_empty())
        .filter(|r| domain_filter.map(|d| r.url.contains(d)).unwrap_or(true))
        .collect()
}

/// Re-checks ratings with the same extraction order as the audit:
/// server JSON-LD, the fallback cascade, then the browser.
pub struct RatingMonitor {
    fetcher: Arc<dyn Fetcher>,
    js: Option<JsFallback>,
    timeout_ms: u64,
}

impl RatingMonitor {
    pub fn new(fetcher: Arc<dyn Fetcher>, js: Option<JsFallback>, timeout_ms: u64) -> Self {
        Self {
            fetcher,
            js,
            timeout_ms,
        }
    }

    /// Current rating of `url`, if any path finds one.
    pub async fn check(&self, url: &str) -> Option<RatingSignal> {
        match self.fetcher.fetch(url, self.timeout_ms).await {
            Ok(html) => {
                let graph = PageGraph::from_html(&html, url);
                let found = jsonld_rating(&graph, RatingSource::JsonLd).or_else(|| extract_fallback_rating(&html));
                if found.is_some() {
                    return found;
                }
            }
            Err(e) => tracing::warn!("rating check failed for {url}: {e}"),
        }
        let js = self.js.as_ref()?;
        tracing::info!("no rating in server HTML, rendering {url}");
        js.render(url).await?.rating
    }

    /// Snapshot one audited page against its audit baseline.
    pub async fn snapshot(&self, record: &ProductRecord, timestamp: &str) -> RatingSnapshot {
        let current = self.check(&record.url).await;
        let (audit_value, audit_count) = if record.rating_value.is_empty() {
            (&record.rating_value_fallback, &record.rating_count_fallback)
        } else {
            (&record.rating_value, &record.rating_count)
        };
        RatingSnapshot {
            timestamp: timestamp.to_string(),
            url: record.url.clone(),
            domain: domain_key(&record.url),
            product_id: product_id(&record.url),
            has_rating_current: current.is_some(),
            rating_value: current.as_ref().map(|c| c.value.clone()).unwrap_or_default(),
            rating_count: current.as_ref().map(|c| c.count.clone()).unwrap_or_default(),
            source: current.map(|c| c.source.to_string()).unwrap_or_default(),
            has_rating_audit: record.has_rating,
            rating_value_audit: audit_value.clone(),
            rating_count_audit: audit_count.clone(),
        }
    }

    /// Snapshot every successfully audited page whose URL contains
    /// `domain_filter`, in order, all under one timestamp.
    pub async fn run(
        &self,
        records: &[ProductRecord],
        domain_filter: Option<&str>,
        mut on_snapshot: impl FnMut(&RatingSnapshot),
    ) -> Vec<RatingSnapshot> {
        let timestamp = now_timestamp();
        let targets = monitor_targets(records, domain_filter);
        if let Some(filter) = domain_filter {
            tracing::info!("{} URLs match {filter}", targets.len());
        }

        let mut snapshots = Vec::with_capacity(targets.len());
        for record in targets {
            let snapshot = self.snapshot(record, &timestamp).await;
            on_snapshot(&snapshot);
            snapshots.push(snapshot);
        }
        snapshots
    }
}

/// Review growth of one product between its first and last snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewGain {
    pub url: String,
    pub product_id: String,
    pub from_count: u64,
    pub to_count: u64,
    pub gain: u64,
    pub days: f64,
    pub reviews_per_day: Option<f64>,
}

/// Summary over all monitored products.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Trends {
    pub total_products: usize,
    /// Products whose latest snapshot has a rating.
    pub products_with_ratings: usize,
    pub products_gaining_reviews: usize,
    pub products_improving_ratings: usize,
    pub top_review_gainers: Vec<ReviewGain>,
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Group snapshots by URL in time order and compare first with last.
pub fn analyze_trends(snapshots: &[RatingSnapshot]) -> Trends {
    let mut by_url: BTreeMap<&str, Vec<&RatingSnapshot>> = BTreeMap::new();
    for snapshot in snapshots {
        by_url.entry(snapshot.url.as_str()).or_default().push(snapshot);
    }

    let mut trends = Trends {
        total_products: by_url.len(),
        ..Trends::default()
    };

    for (url, mut history) in by_url {
        history.sort_by_key(|s| parse_timestamp(&s.timestamp));
        let (Some(first), Some(last)) = (history.first(), history.last()) else {
            continue;
        };
        if last.has_rating_current {
            trends.products_with_ratings += 1;
        }
        if history.len() < 2 {
            continue;
        }

        if let (Some(from), Some(to)) = (parse_rating_value(&first.rating_value), parse_rating_value(&last.rating_value)) {
            if to > from {
                trends.products_improving_ratings += 1;
            }
        }

        let (Some(from), Some(to)) = (parse_rating_count(&first.rating_count), parse_rating_count(&last.rating_count)) else {
            continue;
        };
        if to <= from {
            continue;
        }
        trends.products_gaining_reviews += 1;
        let days = match (parse_timestamp(&first.timestamp), parse_timestamp(&last.timestamp)) {
            (Some(a), Some(b)) => (b - a).num_seconds() as f64 / 86_400.0,
            _ => 0.0,
        };
        let gain = to - from;
        trends.top_review_gainers.push(ReviewGain {
            url: url.to_string(),
            product_id: last.product_id.clone(),
            from_count: from,
            to_count: to,
            gain,
            days,
            reviews_per_day: (days > 0.0).then(|| gain as f64 / days),
        });
    }

    trends
        .top_review_gainers
        .sort_by(|a, b| b.gain.cmp(&a.gain).then_with(|| a.url.cmp(&b.url)));
    trends.top_review_gainers.truncate(TOP_GAINERS);
    trends
}
