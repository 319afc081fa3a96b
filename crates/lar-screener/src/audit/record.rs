//! One audited URL as a flat report row.

use serde::{Deserialize, Serialize};

use crate::acquisition::rating::{parse_rating_count, parse_rating_value, RatingSource};

/// Strongest policy evidence recorded for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PolicyTier {
    None,
    LinkOnly,
    StructuredOnPolicyPage,
    StructuredOnProductPage,
}

impl PolicyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::LinkOnly => "link-only",
            Self::StructuredOnPolicyPage => "structured-on-policy-page",
            Self::StructuredOnProductPage => "structured-on-product-page",
        }
    }
}

/// A rating read back from a record, with the path that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordRating {
    pub value: f64,
    pub count: Option<u64>,
    /// `true` when the value came from the fallback columns.
    pub fallback: bool,
    pub source: Option<RatingSource>,
}

/// Per-URL audit result. Column order is the report's column order.
///
/// Booleans serialise as `0`/`1`. Rating fields hold normalised text and are
/// empty when nothing was found. The primary pair is server JSON-LD only;
/// everything recovered by the fallback cascade or the browser lands in the
/// `_fallback` columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductRecord {
    pub url: String,
    #[serde(with = "zero_one")]
    pub server_jsonld: bool,
    #[serde(with = "zero_one")]
    pub js_jsonld: bool,
    #[serde(with = "zero_one")]
    pub has_product: bool,
    #[serde(with = "zero_one")]
    pub has_offer: bool,
    #[serde(with = "zero_one")]
    pub has_service: bool,
    #[serde(with = "zero_one")]
    pub identifiers: bool,
    #[serde(with = "zero_one")]
    pub ident_gtin: bool,
    #[serde(with = "zero_one")]
    pub ident_brand_mpn: bool,
    #[serde(with = "zero_one")]
    pub policies: bool,
    #[serde(with = "zero_one")]
    pub policy_structured: bool,
    #[serde(with = "zero_one")]
    pub policy_link: bool,
    #[serde(with = "zero_one")]
    pub policy_structured_on_policy_page: bool,
    #[serde(with = "zero_one")]
    pub specs_units: bool,
    #[serde(with = "zero_one")]
    pub productgroup: bool,
    #[serde(deserialize_with = "lenient_score")]
    pub product_score: u32,
    #[serde(deserialize_with = "lenient_score")]
    pub family_score: u32,
    #[serde(with = "zero_one")]
    pub has_rating: bool,
    pub rating_value: String,
    pub rating_count: String,
    pub rating_source: String,
    pub rating_value_fallback: String,
    pub rating_count_fallback: String,
    pub rating_source_fallback: String,
    pub intent_id: String,
    pub error: String,
}

impl ProductRecord {
    /// The zeroed row emitted when a URL could not be audited.
    pub fn failed(url: &str, error: impl std::fmt::Display) -> Self {
        Self {
            url: url.to_string(),
            error: error.to_string(),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.trim().is_empty()
    }

    /// Policy tier with product-page structure taking precedence.
    ///
    /// Rows written before the tier columns existed only carry `policies`;
    /// those count as structured on the product page.
    pub fn policy_tier(&self) -> PolicyTier {
        if self.policy_structured {
            PolicyTier::StructuredOnProductPage
        } else if self.policy_structured_on_policy_page {
            PolicyTier::StructuredOnPolicyPage
        } else if self.policy_link {
            PolicyTier::LinkOnly
        } else if self.policies {
            PolicyTier::StructuredOnProductPage
        } else {
            PolicyTier::None
        }
    }

    /// The rating used for sentiment: the primary pair when its value
    /// parses, else the fallback pair.
    pub fn rating(&self) -> Option<RecordRating> {
        if let Some(value) = parse_rating_value(&self.rating_value) {
            return Some(RecordRating {
                value,
                count: parse_rating_count(&self.rating_count),
                fallback: false,
                source: self.rating_source.parse().ok().or(Some(RatingSource::JsonLd)),
            });
        }
        let value = parse_rating_value(&self.rating_value_fallback)?;
        Some(RecordRating {
            value,
            count: parse_rating_count(&self.rating_count_fallback),
            fallback: true,
            source: self.rating_source_fallback.parse().ok(),
        })
    }
}

/// `bool` as `0`/`1`; reads `0`/`1`, `true`/`false` and blanks.
pub(crate) mod zero_one {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        deserializer.deserialize_any(FlagVisitor)
    }

    struct FlagVisitor;

    impl<'de> Visitor<'de> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("0/1, true/false or blank")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<bool, E> {
            Ok(v != 0.0)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
            match v.trim().to_ascii_lowercase().as_str() {
                "" | "0" | "false" | "no" => Ok(false),
                "1" | "true" | "yes" => Ok(true),
                other => Err(E::custom(format!("not a flag: {other}"))),
            }
        }

        fn visit_none<E: de::Error>(self) -> Result<bool, E> {
            Ok(false)
        }

        fn visit_unit<E: de::Error>(self) -> Result<bool, E> {
            Ok(false)
        }
    }
}

/// Score column that also accepts `75.0` and blanks.
fn lenient_score<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    use serde::de::{self, Visitor};
    use std::fmt;

    struct ScoreVisitor;

    impl<'de> Visitor<'de> for ScoreVisitor {
        type Value = u32;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a score between 0 and 100")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u32, E> {
            u32::try_from(v).map_err(E::custom)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u32, E> {
            u32::try_from(v).map_err(E::custom)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<u32, E> {
            if v.is_finite() && v >= 0.0 {
                Ok(v.round() as u32)
            } else {
                Err(E::custom(format!("bad score {v}")))
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u32, E> {
            let v = v.trim();
            if v.is_empty() {
                return Ok(0);
            }
            let parsed: f64 = v.parse().map_err(E::custom)?;
            self.visit_f64(parsed)
        }

        fn visit_none<E: de::Error>(self) -> Result<u32, E> {
            Ok(0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<u32, E> {
            Ok(0)
        }
    }

    deserializer.deserialize_any(ScoreVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_tier_precedence() {
        let mut r = ProductRecord {
            policies: true,
            policy_structured: true,
            policy_link: true,
            ..Default::default()
        };
        assert_eq!(r.policy_tier(), PolicyTier::StructuredOnProductPage);

        r.policy_structured = false;
        r.policy_structured_on_policy_page = true;
        assert_eq!(r.policy_tier(), PolicyTier::StructuredOnPolicyPage);

        r.policy_structured_on_policy_page = false;
        assert_eq!(r.policy_tier(), PolicyTier::LinkOnly);

        r.policy_link = false;
        assert_eq!(r.policy_tier(), PolicyTier::StructuredOnProductPage);

        r.policies = false;
        assert_eq!(r.policy_tier(), PolicyTier::None);
    }

    #[test]
    fn test_rating_prefers_primary_pair() {
        let r = ProductRecord {
            rating_value: "4.2".into(),
            rating_count: "130".into(),
            rating_source: "jsonld".into(),
            rating_value_fallback: "3.0".into(),
            rating_source_fallback: "fallback-inline".into(),
            ..Default::default()
        };
        let rating = r.rating().unwrap();
        assert_eq!(rating.value, 4.2);
        assert_eq!(rating.count, Some(130));
        assert!(!rating.fallback);

        let fb = ProductRecord {
            rating_value_fallback: "3,5".into(),
            rating_source_fallback: "js-microdata".into(),
            ..Default::default()
        };
        let rating = fb.rating().unwrap();
        assert_eq!(rating.value, 3.5);
        assert_eq!(rating.count, None);
        assert!(rating.fallback);
        assert_eq!(rating.source, Some(RatingSource::JsMicrodata));

        assert!(ProductRecord::default().rating().is_none());
    }

    #[test]
    fn test_failed_record_is_zeroed() {
        let r = ProductRecord::failed("https://x.se/p/1", "HTTP 404 for https://x.se/p/1");
        assert!(r.is_error());
        assert_eq!(r.product_score, 0);
        assert!(!r.has_rating);
    }
}
