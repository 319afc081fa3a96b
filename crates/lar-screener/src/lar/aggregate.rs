//! Per-domain accumulation of audit records.
//!
//! Sums are kept in forms that do not depend on row order: integer score
//! totals, per-tier counts, and sentiment values summed after sorting. The
//! same records in any order give bit-identical means.

use crate::acquisition::rating::RatingSource;
use crate::audit::{PolicyTier, ProductRecord};
use crate::config::LarConfig;

/// One record's contribution to sentiment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentItem {
    pub rating: f64,
    pub count: Option<u64>,
    pub confidence: f64,
    pub source_weight: f64,
    pub fallback: bool,
    pub source: Option<RatingSource>,
    /// Normalised score in `[-100, 100]`.
    pub score: f64,
}

/// `min(1, count / threshold)`; a missing or zero count is full confidence.
pub fn confidence(count: Option<u64>, threshold: f64) -> f64 {
    match count {
        None | Some(0) => 1.0,
        Some(_) if threshold <= 0.0 => 1.0,
        Some(n) => (n as f64 / threshold).min(1.0),
    }
}

/// Map a rating onto `[-100, 100]` around the neutral point, scaled by
/// confidence and source weight.
pub fn sentiment_score(rating: f64, confidence: f64, source_weight: f64, config: &LarConfig) -> f64 {
    let span = config.rating_max - config.rating_neutral;
    if span <= 0.0 {
        return 0.0;
    }
    let centred = (rating - config.rating_neutral) / span * 100.0;
    (centred * confidence * source_weight).clamp(-100.0, 100.0)
}

/// Policy points for X by tier.
pub fn policy_points(tier: PolicyTier, config: &LarConfig) -> f64 {
    match tier {
        PolicyTier::StructuredOnProductPage => config.policy_points_product_page,
        PolicyTier::StructuredOnPolicyPage => config.policy_points_policy_page,
        PolicyTier::LinkOnly => config.policy_points_link,
        PolicyTier::None => 0.0,
    }
}

/// A page's eligibility value: blended product and family scores.
pub fn record_e(record: &ProductRecord, config: &LarConfig) -> f64 {
    let share = config.e_product_share;
    f64::from(record.product_score) * share + f64::from(record.family_score) * (1.0 - share)
}

/// A page's extensibility value: policy points plus specs points.
pub fn record_x(record: &ProductRecord, config: &LarConfig) -> f64 {
    let specs = if record.specs_units { config.specs_points } else { 0.0 };
    policy_points(record.policy_tier(), config) + specs
}

/// The sentiment contribution of a record, if it has a usable rating.
pub fn sentiment_item(record: &ProductRecord, config: &LarConfig) -> Option<SentimentItem> {
    let rating = record.rating()?;
    let confidence = confidence(rating.count, config.confidence_threshold);
    let source_weight = if rating.fallback {
        config.fallback_source_weight
    } else {
        1.0
    };
    Some(SentimentItem {
        rating: rating.value,
        count: rating.count,
        confidence,
        source_weight,
        fallback: rating.fallback,
        source: rating.source,
        score: sentiment_score(rating.value, confidence, source_weight, config),
    })
}

/// Order-independent mean: sort, then sum.
pub(crate) fn stable_mean(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Accumulator for one domain (or one domain/category pair).
#[derive(Debug, Clone, Default)]
pub struct DomainAggregate {
    pages: u64,
    product_total: u64,
    family_total: u64,
    /// Counts indexed by [`tier_index`].
    tiers: [u64; 4],
    specs: u64,
    sentiment: Vec<SentimentItem>,
}

fn tier_index(tier: PolicyTier) -> usize {
    match tier {
        PolicyTier::StructuredOnProductPage => 0,
        PolicyTier::StructuredOnPolicyPage => 1,
        PolicyTier::LinkOnly => 2,
        PolicyTier::None => 3,
    }
}

impl DomainAggregate {
    /// Add one page. An error row counts as a page with zero E and X and
    /// no rating, whatever its other columns hold.
    pub fn add(&mut self, record: &ProductRecord, config: &LarConfig) {
        self.pages += 1;
        if record.is_error() {
            self.tiers[tier_index(PolicyTier::None)] += 1;
            return;
        }
        self.product_total += u64::from(record.product_score);
        self.family_total += u64::from(record.family_score);
        self.tiers[tier_index(record.policy_tier())] += 1;
        if record.specs_units {
            self.specs += 1;
        }
        if let Some(item) = sentiment_item(record, config) {
            self.sentiment.push(item);
        }
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    pub fn is_empty(&self) -> bool {
        self.pages == 0
    }

    fn page_mean(&self, total: f64) -> f64 {
        if self.pages == 0 {
            0.0
        } else {
            total / self.pages as f64
        }
    }

    pub fn mean_product_score(&self) -> f64 {
        self.page_mean(self.product_total as f64)
    }

    pub fn mean_family_score(&self) -> f64 {
        self.page_mean(self.family_total as f64)
    }

    /// Mean E; 0 without pages.
    pub fn e(&self, config: &LarConfig) -> f64 {
        let share = config.e_product_share;
        self.mean_product_score() * share + self.mean_family_score() * (1.0 - share)
    }

    /// Mean X; 0 without pages.
    pub fn x(&self, config: &LarConfig) -> f64 {
        let policy: f64 = [
            PolicyTier::StructuredOnProductPage,
            PolicyTier::StructuredOnPolicyPage,
            PolicyTier::LinkOnly,
        ]
        .into_iter()
        .map(|t| self.tiers[tier_index(t)] as f64 * policy_points(t, config))
        .sum();
        let specs = self.specs as f64 * config.specs_points;
        self.page_mean(policy + specs)
    }

    /// Mean sentiment over rated pages only; `None` when nothing was rated.
    pub fn s(&self) -> Option<f64> {
        let mut scores: Vec<f64> = self.sentiment.iter().map(|i| i.score).collect();
        stable_mean(&mut scores)
    }

    /// Share of pages in `tier`, as a percentage.
    pub fn tier_rate(&self, tier: PolicyTier) -> f64 {
        self.page_mean(self.tiers[tier_index(tier)] as f64 * 100.0)
    }

    pub fn specs_rate(&self) -> f64 {
        self.page_mean(self.specs as f64 * 100.0)
    }

    pub fn rating_stats(&self) -> RatingStats {
        let mean_of = |f: &dyn Fn(&SentimentItem) -> Option<f64>| {
            let mut values: Vec<f64> = self.sentiment.iter().filter_map(f).collect();
            stable_mean(&mut values)
        };
        let rated = self.sentiment.len() as u64;
        let fallback = self.sentiment.iter().filter(|i| i.fallback).count() as f64;
        RatingStats {
            rated,
            mean_rating: mean_of(&|i| Some(i.rating)),
            mean_count: mean_of(&|i| i.count.map(|c| c as f64)),
            mean_confidence: mean_of(&|i| Some(i.confidence)),
            mean_source_weight: mean_of(&|i| Some(i.source_weight)),
            fallback_share: (rated > 0).then(|| fallback / rated as f64 * 100.0),
        }
    }
}

/// Rating statistics behind a domain's S.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RatingStats {
    pub rated: u64,
    pub mean_rating: Option<f64>,
    /// Over ratings that carried a count.
    pub mean_count: Option<f64>,
    pub mean_confidence: Option<f64>,
    pub mean_source_weight: Option<f64>,
    /// Percentage of ratings that came from fallback extraction.
    pub fallback_share: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> LarConfig {
        LarConfig::default()
    }

    fn rated(value: &str, count: &str) -> ProductRecord {
        ProductRecord {
            rating_value: value.into(),
            rating_count: count.into(),
            has_rating: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_confidence_scaling() {
        assert_eq!(confidence(None, 25.0), 1.0);
        assert_eq!(confidence(Some(0), 25.0), 1.0);
        assert!((confidence(Some(12), 25.0) - 0.48).abs() < 1e-12);
        assert_eq!(confidence(Some(30), 25.0), 1.0);
    }

    #[test]
    fn test_sentiment_normalisation() {
        let c = cfg();
        assert_eq!(sentiment_score(3.5, 1.0, 1.0, &c), 0.0);
        assert_eq!(sentiment_score(5.0, 1.0, 1.0, &c), 100.0);
        assert_eq!(sentiment_score(2.0, 1.0, 1.0, &c), -100.0);
        assert_eq!(sentiment_score(1.0, 1.0, 1.0, &c), -100.0);
        assert!((sentiment_score(5.0, 0.48, 0.8, &c) - 38.4).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_ratings_are_discounted() {
        let c = cfg();
        let fb = ProductRecord {
            rating_value_fallback: "5".into(),
            rating_count_fallback: "100".into(),
            rating_source_fallback: "js-jsonld".into(),
            ..Default::default()
        };
        let item = sentiment_item(&fb, &c).unwrap();
        assert!(item.fallback);
        assert_eq!(item.source_weight, 0.8);
        assert!((item.score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_policy_tier_points() {
        let c = cfg();
        let both = ProductRecord {
            policies: true,
            policy_structured: true,
            policy_link: true,
            ..Default::default()
        };
        assert_eq!(record_x(&both, &c), 50.0);
        let link = ProductRecord {
            policies: true,
            policy_link: true,
            specs_units: true,
            ..Default::default()
        };
        assert_eq!(record_x(&link, &c), 75.0);
        let page = ProductRecord {
            policy_structured_on_policy_page: true,
            ..Default::default()
        };
        assert_eq!(record_x(&page, &c), 40.0);
    }

    #[test]
    fn test_unrated_pages_do_not_dilute_s() {
        let c = cfg();
        let mut agg = DomainAggregate::default();
        agg.add(&rated("5.0", "40"), &c);
        agg.add(&ProductRecord::default(), &c);
        agg.add(&ProductRecord::default(), &c);
        assert_eq!(agg.pages(), 3);
        assert_eq!(agg.s(), Some(100.0));
        assert_eq!(agg.rating_stats().rated, 1);

        let empty = DomainAggregate::default();
        assert_eq!(empty.s(), None);
        assert_eq!(empty.e(&c), 0.0);
        assert_eq!(empty.x(&c), 0.0);
    }

    #[test]
    fn test_means_are_order_independent() {
        let c = cfg();
        let records: Vec<ProductRecord> = [("4.7", "3", 75, 10), ("2.1", "", 33, 0), ("3.9", "250", 90, 70), ("4,4", "7", 61, 0)]
            .into_iter()
            .map(|(v, n, p, f)| ProductRecord {
                product_score: p,
                family_score: f,
                policy_link: p > 60,
                specs_units: f > 0,
                ..rated(v, n)
            })
            .collect();

        let mut forward = DomainAggregate::default();
        records.iter().for_each(|r| forward.add(r, &c));
        let mut backward = DomainAggregate::default();
        records.iter().rev().for_each(|r| backward.add(r, &c));

        assert_eq!(forward.e(&c).to_bits(), backward.e(&c).to_bits());
        assert_eq!(forward.x(&c).to_bits(), backward.x(&c).to_bits());
        assert_eq!(
            forward.s().map(f64::to_bits),
            backward.s().map(f64::to_bits)
        );
        assert_eq!(forward.rating_stats(), backward.rating_stats());
    }

    #[test]
    fn test_rating_stats() {
        let c = cfg();
        let mut agg = DomainAggregate::default();
        agg.add(&rated("4.0", "10"), &c);
        agg.add(
            &ProductRecord {
                rating_value_fallback: "3.0".into(),
                ..Default::default()
            },
            &c,
        );
        let stats = agg.rating_stats();
        assert_eq!(stats.rated, 2);
        assert_eq!(stats.mean_rating, Some(3.5));
        assert_eq!(stats.mean_count, Some(10.0));
        assert!((stats.mean_confidence.unwrap() - 0.7).abs() < 1e-12);
        assert!((stats.mean_source_weight.unwrap() - 0.9).abs() < 1e-12);
        assert_eq!(stats.fallback_share, Some(50.0));
    }
}
