//! Category-weighted LAR.
//!
//! E and X are computed per (domain, category) and each category gets its
//! own capped LAR. A domain's LAR is the unweighted mean over its eligible
//! categories, so a category with many intents does not drown out one with
//! few. A and S stay domain-wide.

use rayon::prelude::*;
use std::collections::BTreeMap;

use super::{
    all_keys, group_by_domain, Composite, Contributions, Dimensions, DomainAggregate, DomainResult,
    LarCalculator, LarInputs,
};
use crate::audit::ProductRecord;
use crate::lar::tables::{CategoryMap, Peer};

/// One category's share of a domain's weighted LAR.
#[derive(Debug, Clone)]
pub struct CategoryResult {
    pub category: String,
    pub dims: Dimensions,
    pub composite: Composite,
    pub aggregate: DomainAggregate,
}

impl LarCalculator {
    /// Category-weighted LAR for every domain, sorted by key.
    ///
    /// Categories come from each record's intent id (or the discovery
    /// URL assignment) through `categories`. With a peer table, a domain's
    /// categories are restricted to those its peer entry declares.
    pub fn compute_weighted(
        &self,
        records: &[ProductRecord],
        inputs: LarInputs<'_>,
        categories: &CategoryMap,
    ) -> Vec<DomainResult> {
        let groups = group_by_domain(records);
        let keys = all_keys(&groups, &inputs);

        keys.par_iter()
            .map(|key| {
                let members = groups.get(key).map(Vec::as_slice).unwrap_or_default();
                let peer = inputs.peers.and_then(|p| p.find(key));
                self.weighted_domain(key, members, peer, &inputs, categories)
            })
            .collect()
    }

    fn weighted_domain(
        &self,
        key: &str,
        members: &[&ProductRecord],
        peer: Option<&Peer>,
        inputs: &LarInputs<'_>,
        categories: &CategoryMap,
    ) -> DomainResult {
        let mut overall = DomainAggregate::default();
        let mut by_category: BTreeMap<String, DomainAggregate> = BTreeMap::new();
        for record in members {
            overall.add(record, &self.config);
            let category = categories.category_for(&record.intent_id, &record.url);
            by_category
                .entry(category)
                .or_default()
                .add(record, &self.config);
        }

        if let Some(allowed) = peer.map(|p| &p.categories).filter(|c| !c.is_empty()) {
            by_category.retain(|category, _| {
                allowed.iter().any(|a| a.eq_ignore_ascii_case(category))
            });
            if by_category.is_empty() && !members.is_empty() {
                tracing::warn!(
                    "{key}: no audited pages in its declared categories ({})",
                    allowed.join(", ")
                );
            }
        }

        let (a, s, s_source) = self.external(key, &overall, inputs);
        let per_category: Vec<CategoryResult> = by_category
            .into_iter()
            .map(|(category, aggregate)| {
                let dims = Dimensions {
                    e: aggregate.e(&self.config),
                    x: aggregate.x(&self.config),
                    a,
                    s,
                };
                let (composite, _) = self.blend(&dims);
                CategoryResult {
                    category,
                    dims,
                    composite,
                    aggregate,
                }
            })
            .collect();

        let (dims, composite, contributions) = if per_category.is_empty() {
            let dims = Dimensions { e: 0.0, x: 0.0, a, s };
            let (composite, contributions) = self.blend(&dims);
            (dims, composite, contributions)
        } else {
            let n = per_category.len() as f64;
            let mean = |f: fn(&CategoryResult) -> f64| per_category.iter().map(f).sum::<f64>() / n;
            let dims = Dimensions {
                e: mean(|c| c.dims.e),
                x: mean(|c| c.dims.x),
                a,
                s,
            };
            let composite = Composite {
                raw: mean(|c| c.composite.raw),
                lar: mean(|c| c.composite.lar),
            };
            let contributions = Contributions {
                e: self.config.weight_e * dims.e,
                x: self.config.weight_x * dims.x,
                a: self.config.weight_a * a,
                s: self.config.weight_s * s,
            };
            (dims, composite, contributions)
        };

        DomainResult {
            key: key.to_string(),
            brand: peer.map(|p| p.brand.clone()).unwrap_or_default(),
            categories: per_category.iter().map(|c| c.category.clone()).collect(),
            dims,
            composite,
            contributions,
            s_source,
            aggregate: overall,
            per_category,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lar::tables::{Intent, PeerTable, ScoreTable, DEFAULT_CATEGORY};

    fn page(url: &str, intent: &str, product: u32) -> ProductRecord {
        ProductRecord {
            url: url.into(),
            intent_id: intent.into(),
            product_score: product,
            policy_structured: true,
            ..Default::default()
        }
    }

    fn intents() -> CategoryMap {
        CategoryMap::from_intents(vec![
            Intent {
                id: "H1".into(),
                category: "heaters".into(),
                keywords: vec![],
            },
            Intent {
                id: "H2".into(),
                category: "heaters".into(),
                keywords: vec![],
            },
            Intent {
                id: "F1".into(),
                category: "fans".into(),
                keywords: vec![],
            },
        ])
    }

    #[test]
    fn test_categories_weigh_equally() {
        // Three heater pages at E=80, one fan page at E=40.
        let records = vec![
            page("https://shop.se/p/1", "H1", 100),
            page("https://shop.se/p/2", "H2", 100),
            page("https://shop.se/p/3", "H1", 100),
            page("https://shop.se/p/4", "F1", 50),
        ];
        let calc = LarCalculator::default();
        let results = calc.compute_weighted(&records, LarInputs::default(), &intents());
        let shop = &results[0];

        assert_eq!(shop.categories, vec!["fans", "heaters"]);
        assert_eq!(shop.per_category.len(), 2);
        let fans = &shop.per_category[0];
        let heaters = &shop.per_category[1];
        assert!((heaters.composite.lar - 44.5).abs() < 1e-9);
        // Fans: raw 0.4*40 + 0.25*50 = 28.5, under the cap.
        assert!((fans.composite.lar - 28.5).abs() < 1e-9);
        assert!((shop.composite.lar - 36.5).abs() < 1e-9);
        assert!((shop.dims.e - 60.0).abs() < 1e-9);

        // Volume-weighted would have given E = 70.
        let flat = &calc.compute(&records, LarInputs::default())[0];
        assert!((flat.dims.e - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_category_cap_applies_per_category() {
        let records = vec![
            page("https://shop.se/p/1", "H1", 100),
            page("https://shop.se/p/2", "F1", 25),
        ];
        let a = ScoreTable::from_pairs([("shop.se", 100.0)]);
        let calc = LarCalculator::default();
        let shop = &calc.compute_weighted(
            &records,
            LarInputs {
                soa: Some(&a),
                ..Default::default()
            },
            &intents(),
        )[0];
        let fans = &shop.per_category[0];
        // 0.4*20 + 12.5 + 25 = 45.5, capped at 40.
        assert!((fans.composite.raw - 45.5).abs() < 1e-9);
        assert_eq!(fans.composite.lar, 40.0);
        let heaters = &shop.per_category[1];
        assert!((heaters.composite.lar - 69.5).abs() < 1e-9);
        assert!((shop.composite.lar - 54.75).abs() < 1e-9);
        assert!(shop.composite.capped(0.1));
    }

    #[test]
    fn test_unmapped_intents_fall_into_general() {
        let records = vec![
            page("https://shop.se/p/1", "", 80),
            page("https://shop.se/p/2", "X9", 60),
        ];
        let calc = LarCalculator::default();
        let shop = &calc.compute_weighted(&records, LarInputs::default(), &intents())[0];
        assert_eq!(shop.categories, vec![DEFAULT_CATEGORY]);
        assert_eq!(shop.per_category[0].aggregate.pages(), 2);
    }

    #[test]
    fn test_peer_categories_restrict_evaluation() {
        let records = vec![
            page("https://www.kjell.com/p/1", "H1", 100),
            page("https://www.kjell.com/p/2", "F1", 50),
            page("https://jula.se/p/1", "F1", 90),
        ];
        let peers = PeerTable {
            peers: vec![
                Peer {
                    brand: "Kjell & Company".into(),
                    domain: "kjell.com".into(),
                    categories: vec!["Heaters".into()],
                    sitemap: None,
                    search: None,
                },
                Peer {
                    brand: "Jula".into(),
                    domain: "jula.se".into(),
                    categories: vec!["heaters".into()],
                    sitemap: None,
                    search: None,
                },
            ],
        };
        let calc = LarCalculator::default();
        let results = calc.compute_weighted(
            &records,
            LarInputs {
                peers: Some(&peers),
                ..Default::default()
            },
            &intents(),
        );

        let jula = &results[0];
        assert_eq!(jula.key, "jula.se");
        assert!(jula.categories.is_empty());
        assert_eq!(jula.dims.e, 0.0);
        assert_eq!(jula.dims.x, 0.0);

        let kjell = &results[1];
        assert_eq!(kjell.brand, "Kjell & Company");
        assert_eq!(kjell.categories, vec!["heaters"]);
        assert!((kjell.dims.e - 80.0).abs() < 1e-9);
    }
}
