//! Page-level structure signals derived from one JSON-LD graph.

use crate::acquisition::structured::{
    has_policy_evidence, has_spec_ranges, has_units, IdentifierTier, PageGraph, ProductIdentifiers,
};

/// Flags the scorer needs from a [`PageGraph`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StructureSignals {
    pub has_product: bool,
    pub has_offer: bool,
    pub has_productgroup: bool,
    pub has_service: bool,
    pub policy_structured: bool,
    pub identifier_tier: IdentifierTier,
    pub specs_units: bool,
    /// First ProductGroup declares `hasVariant`.
    pub has_variant: bool,
    /// First ProductGroup has a ranged `additionalProperty`.
    pub spec_ranges: bool,
}

impl StructureSignals {
    pub fn from_graph(graph: &PageGraph) -> Self {
        let buckets = graph.classify();

        let has_offer = !buckets.offers.is_empty()
            || buckets.products.iter().any(|p| p.has_value("offers"));

        // Organization-level policy defaults count for every product.
        let policy_structured = buckets
            .products
            .iter()
            .chain(&buckets.product_groups)
            .chain(&buckets.organizations)
            .any(|item| has_policy_evidence(graph, item));

        let identifier_tier = buckets
            .products
            .iter()
            .map(|p| ProductIdentifiers::from_item(p).tier())
            .max()
            .unwrap_or_default();

        let specs_units = buckets
            .products
            .iter()
            .any(|p| has_units(p.get("additionalProperty")));

        let group = buckets.product_groups.first();

        Self {
            has_product: !buckets.products.is_empty(),
            has_offer,
            has_productgroup: group.is_some(),
            has_service: !buckets.services.is_empty(),
            policy_structured,
            identifier_tier,
            specs_units,
            has_variant: group.map(|g| g.has_value("hasVariant")).unwrap_or(false),
            spec_ranges: group.map(|g| has_spec_ranges(g)).unwrap_or(false),
        }
    }

    /// Fill signals missing here from `other` without overriding any that
    /// were already found.
    pub fn fill_gaps(&mut self, other: &Self) {
        self.has_product |= other.has_product;
        self.has_offer |= other.has_offer;
        self.has_service |= other.has_service;
        self.policy_structured |= other.policy_structured;
        self.specs_units |= other.specs_units;
        if self.identifier_tier == IdentifierTier::None {
            self.identifier_tier = other.identifier_tier;
        }
        if !self.has_productgroup && other.has_productgroup {
            self.has_productgroup = true;
            self.has_variant = other.has_variant;
            self.spec_ranges = other.spec_ranges;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(value: serde_json::Value) -> PageGraph {
        PageGraph::from_values(&[value], "https://shop.se/p/1")
    }

    #[test]
    fn test_offer_embedded_in_product_counts() {
        let s = StructureSignals::from_graph(&graph(json!({
            "@type": "Product", "offers": {"@type": "Offer", "price": "10"}
        })));
        assert!(s.has_product);
        assert!(s.has_offer);
    }

    #[test]
    fn test_identifier_tiering_takes_best_product() {
        let s = StructureSignals::from_graph(&graph(json!([
            {"@type": "Product", "brand": {"@type": "Brand", "name": "Acme"}, "mpn": "X1"},
            {"@type": "Product", "gtin8": "12345670"}
        ])));
        assert_eq!(s.identifier_tier, IdentifierTier::Gtin);

        let s = StructureSignals::from_graph(&graph(json!(
            {"@type": "Product", "brand": "Acme", "mpn": "X1"}
        )));
        assert_eq!(s.identifier_tier, IdentifierTier::BrandMpn);

        let s = StructureSignals::from_graph(&graph(json!({"@type": "Product", "brand": "Acme"})));
        assert_eq!(s.identifier_tier, IdentifierTier::None);
    }

    #[test]
    fn test_organization_policy_counts() {
        let s = StructureSignals::from_graph(&graph(json!([
            {"@type": "Product", "name": "Fan"},
            {"@type": "Organization", "hasMerchantReturnPolicy": {"@type": "MerchantReturnPolicy"}}
        ])));
        assert!(s.policy_structured);
    }

    #[test]
    fn test_family_signals() {
        let s = StructureSignals::from_graph(&graph(json!({
            "@type": "ProductGroup",
            "hasVariant": [{"@id": "#v1"}],
            "additionalProperty": [{"@type": "PropertyValue", "name": "Power",
                "value": {"@type": "QuantitativeValue", "minValue": 500, "maxValue": 2000}}]
        })));
        assert!(s.has_productgroup);
        assert!(s.has_variant);
        assert!(s.spec_ranges);
    }

    #[test]
    fn test_fill_gaps_never_overrides() {
        let mut server = StructureSignals {
            has_product: true,
            identifier_tier: IdentifierTier::BrandMpn,
            ..Default::default()
        };
        let js = StructureSignals {
            has_offer: true,
            identifier_tier: IdentifierTier::Gtin,
            has_productgroup: true,
            has_variant: true,
            ..Default::default()
        };
        server.fill_gaps(&js);
        assert!(server.has_product);
        assert!(server.has_offer);
        assert_eq!(server.identifier_tier, IdentifierTier::BrandMpn);
        assert!(server.has_productgroup && server.has_variant);
    }
}
