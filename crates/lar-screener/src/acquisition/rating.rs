//! Rating signals and where they came from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::structured::{LdValue, PageGraph, StructuredItem};

/// Extraction path that produced a rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RatingSource {
    /// Server-rendered JSON-LD.
    JsonLd,
    /// `<script type="application/json">` blob in server HTML.
    FallbackEmbedded,
    /// Inline JS state assignment in server HTML.
    FallbackInline,
    /// Raw `"ratingValue": N` text match in server HTML.
    FallbackRegex,
    JsJsonLd,
    JsEmbedded,
    JsInline,
    JsRegex,
    JsMicrodata,
    JsRdfa,
}

impl RatingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JsonLd => "jsonld",
            Self::FallbackEmbedded => "fallback-embedded",
            Self::FallbackInline => "fallback-inline",
            Self::FallbackRegex => "fallback-regex",
            Self::JsJsonLd => "js-jsonld",
            Self::JsEmbedded => "js-embedded",
            Self::JsInline => "js-inline",
            Self::JsRegex => "js-regex",
            Self::JsMicrodata => "js-microdata",
            Self::JsRdfa => "js-rdfa",
        }
    }

    /// Whether the rating came from anywhere but server JSON-LD.
    pub fn is_fallback(&self) -> bool {
        !matches!(self, Self::JsonLd)
    }

    pub fn is_js(&self) -> bool {
        matches!(
            self,
            Self::JsJsonLd
                | Self::JsEmbedded
                | Self::JsInline
                | Self::JsRegex
                | Self::JsMicrodata
                | Self::JsRdfa
        )
    }

    /// The JS-rendered counterpart of a server-side source.
    pub fn rendered(self) -> Self {
        match self {
            Self::JsonLd => Self::JsJsonLd,
            Self::FallbackEmbedded => Self::JsEmbedded,
            Self::FallbackInline => Self::JsInline,
            Self::FallbackRegex => Self::JsRegex,
            js => js,
        }
    }
}

impl fmt::Display for RatingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("unknown rating source: {0}")]
pub struct UnknownRatingSource(pub String);

impl FromStr for RatingSource {
    type Err = UnknownRatingSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let source = match s.trim() {
            "jsonld" => Self::JsonLd,
            "fallback-embedded" | "application/json" => Self::FallbackEmbedded,
            "fallback-inline" | "inline_js" => Self::FallbackInline,
            "fallback-regex" | "regex" => Self::FallbackRegex,
            "js-jsonld" | "playwright-jsonld" => Self::JsJsonLd,
            "js-embedded" | "playwright-application/json" => Self::JsEmbedded,
            "js-inline" | "playwright-inline_js" => Self::JsInline,
            "js-regex" => Self::JsRegex,
            "js-microdata" | "playwright-microdata" => Self::JsMicrodata,
            "js-rdfa" | "playwright-rdfa" => Self::JsRdfa,
            other => return Err(UnknownRatingSource(other.to_string())),
        };
        Ok(source)
    }
}

/// A rating value/count pair as found on a page.
///
/// Both fields hold normalised text: the value uses a dot decimal separator
/// and the count is bare digits (empty when the page gave none).
#[derive(Debug, Clone, PartialEq)]
pub struct RatingSignal {
    pub value: String,
    pub count: String,
    pub source: RatingSource,
}

impl RatingSignal {
    /// Build a signal from raw page text, normalising both fields.
    /// Returns `None` when the value is not numeric.
    pub fn new(value: &str, count: Option<&str>, source: RatingSource) -> Option<Self> {
        let value = normalize_rating_value(value)?;
        let count = count.and_then(normalize_rating_count).unwrap_or_default();
        Some(Self {
            value,
            count,
            source,
        })
    }

    pub fn with_source(mut self, source: RatingSource) -> Self {
        self.source = source;
        self
    }
}

/// Normalise a rating value: trim, comma decimal to dot, must parse as a finite number.
pub fn normalize_rating_value(raw: &str) -> Option<String> {
    let cleaned = raw.trim().replace(',', ".");
    let parsed: f64 = cleaned.parse().ok()?;
    parsed.is_finite().then_some(cleaned)
}

/// Normalise a review count: drop spaces, thousand separators and a trailing
/// decimal part, keep the digits.
pub fn normalize_rating_count(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let integral = match trimmed.split_once('.') {
        // "1.234" is a thousands separator; "130.0" is a float count.
        Some((head, tail)) if tail.len() != 3 || tail.chars().any(|c| !c.is_ascii_digit()) => head,
        _ => trimmed,
    };
    let digits: String = integral
        .chars()
        .filter(|c| !(c.is_whitespace() || *c == ',' || *c == '.' || *c == '\u{a0}'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(digits)
}

/// Parse a normalised rating value.
pub fn parse_rating_value(value: &str) -> Option<f64> {
    normalize_rating_value(value)?.parse().ok()
}

/// Parse a normalised review count.
pub fn parse_rating_count(count: &str) -> Option<u64> {
    normalize_rating_count(count)?.parse().ok()
}

fn rating_from_item(item: &StructuredItem, source: RatingSource) -> Option<RatingSignal> {
    let value = item.get("ratingValue").and_then(LdValue::as_text)?;
    let count = item.text("ratingCount").or_else(|| item.text("reviewCount"));
    RatingSignal::new(&value, count.as_deref(), source)
}

/// Rating from JSON-LD: a Product's (resolved) `aggregateRating` first,
/// then standalone `AggregateRating` nodes. First value found wins.
pub fn jsonld_rating(graph: &PageGraph, source: RatingSource) -> Option<RatingSignal> {
    let buckets = graph.classify();

    for product in &buckets.products {
        for rating in graph.resolve_property(product, "aggregateRating") {
            if let Some(signal) = rating_from_item(rating, source) {
                return Some(signal);
            }
        }
    }

    buckets
        .aggregate_ratings
        .iter()
        .find_map(|rating| rating_from_item(rating, source))
}
