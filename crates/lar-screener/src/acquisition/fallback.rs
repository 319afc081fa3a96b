//! Rating extraction without JSON-LD or JavaScript.
//!
//! Many retailers ship ratings only inside framework state blobs. This module
//! tries an ordered list of strategies against raw HTML and stops at the
//! first hit:
//!
//! 1. `<script type="application/json">` blocks, scanned recursively.
//! 2. Inline state assignments (`window.__NEXT_DATA__ = {...}`,
//!    `window.__INITIAL_STATE__`, `CURRENT_PAGE`), bracket-matched then scanned.
//! 3. A direct `"ratingValue": N` text search.
//!
//! The order is part of the result: a rating found in an embedded blob is
//! reported as such even if the regex would also match it.

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::LazyLock;

use super::rating::{normalize_rating_count, normalize_rating_value, RatingSignal, RatingSource};
use super::structured::parse_lenient;

/// Keys holding a rating value, in priority order within one object.
pub const RATING_KEYS: [&str; 5] = ["ratingValue", "averageScore", "averageRating", "rating", "score"];

/// Keys holding a rating or review count, in priority order within one object.
pub const COUNT_KEYS: [&str; 4] = ["ratingCount", "reviewCount", "numberOfReviews", "numberOfRatings"];

/// Deepest nesting the recursive scan descends into.
const MAX_SCAN_DEPTH: usize = 64;

/// Ratings outside this range are treated as unrelated numbers (scores,
/// percentages, ids) rather than star ratings.
const MAX_PLAUSIBLE_RATING: f64 = 10.0;

/// A pure `html -> rating` extraction step.
pub type RatingStrategy = fn(&str) -> Option<RatingSignal>;

/// The fallback cascade, in priority order.
pub const STRATEGIES: [(&str, RatingStrategy); 3] = [
    ("embedded-json", embedded_json_rating),
    ("inline-state", inline_state_rating),
    ("regex", regex_rating),
];

static STATE_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:window\.|window\[["']|self\.|var\s+|let\s+|const\s+)?(?:__NEXT_DATA__|__INITIAL_STATE__|__PRELOADED_STATE__|CURRENT_PAGE|currentPage)["']?\]?\s*=\s*"#,
    )
    .expect("valid regex")
});

static RATING_VALUE_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\\?"ratingValue\\?"\s*:\s*\\?"?(\d+(?:[.,]\d+)?)"#).expect("valid regex")
});

static RATING_COUNT_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\\?"(?:ratingCount|reviewCount)\\?"\s*:\s*\\?"?(\d[\d ,.]*\d|\d)"#)
        .expect("valid regex")
});

/// Run the cascade and return the first rating found.
pub fn extract_fallback_rating(html: &str) -> Option<RatingSignal> {
    STRATEGIES.iter().find_map(|(name, strategy)| {
        let found = strategy(html);
        if let Some(signal) = &found {
            tracing::debug!("fallback rating via {name}: {} ({})", signal.value, signal.count);
        }
        found
    })
}

/// Strategy 1: `<script type="application/json">` blobs.
pub fn embedded_json_rating(html: &str) -> Option<RatingSignal> {
    let blocks = application_json_blocks(html);
    blocks.iter().find_map(|text| {
        let value = parse_lenient(text)?;
        let (rating, count) = scan_for_rating(&value)?;
        RatingSignal::new(&rating, count.as_deref(), RatingSource::FallbackEmbedded)
    })
}

fn application_json_blocks(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let sel = Selector::parse("script[type]").expect("valid selector");
    let blocks = document
        .select(&sel)
        .filter(|el| {
            el.value()
                .attr("type")
                .map(|t| {
                    let t = t.trim().to_ascii_lowercase();
                    t == "application/json" || t.starts_with("application/json;")
                })
                .unwrap_or(false)
        })
        .map(|el| el.text().collect::<String>())
        .collect();
    blocks
}

/// Strategy 2: framework state assigned to a global in an inline script.
pub fn inline_state_rating(html: &str) -> Option<RatingSignal> {
    STATE_ASSIGNMENT.find_iter(html).find_map(|m| {
        let rest = &html[m.end()..];
        let offset = rest.find(|c: char| !c.is_whitespace())?;
        let literal = balanced_json_slice(html, m.end() + offset)?;
        let value = parse_lenient(literal)?;
        let (rating, count) = scan_for_rating(&value)?;
        RatingSignal::new(&rating, count.as_deref(), RatingSource::FallbackInline)
    })
}

/// Strategy 3: direct `"ratingValue": N` text match anywhere in the page,
/// including JSON escaped inside JS strings.
pub fn regex_rating(html: &str) -> Option<RatingSignal> {
    let value = RATING_VALUE_TEXT.captures(html)?.get(1)?.as_str();
    let plausible = normalize_rating_value(value)
        .and_then(|v| v.parse::<f64>().ok())
        .map(is_plausible_rating)
        .unwrap_or(false);
    if !plausible {
        return None;
    }
    let count = RATING_COUNT_TEXT
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());
    RatingSignal::new(value, count, RatingSource::FallbackRegex)
}

/// Return the JSON object or array literal starting at byte `start`,
/// matching brackets while skipping over string contents.
pub fn balanced_json_slice(text: &str, start: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if !matches!(bytes.get(start), Some(b'{') | Some(b'[')) {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut quote = b'"';

    for (i, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == quote {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => {
                in_string = true;
                quote = b;
            }
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Depth-first scan for a rating (and count) in a JSON tree.
///
/// Objects are checked before their children, children in source order.
/// The first object with a rating key supplies the rating. Its own count is
/// preferred; otherwise the first count key met anywhere in the scan is
/// used. The scan stops once both are known.
pub fn scan_for_rating(value: &Value) -> Option<(String, Option<String>)> {
    let mut found = ScanState::default();
    found.visit(value, 0);
    let rating = found.rating?;
    Some((rating, found.count))
}

#[derive(Default)]
struct ScanState {
    rating: Option<String>,
    count: Option<String>,
}

impl ScanState {
    fn done(&self) -> bool {
        self.rating.is_some() && self.count.is_some()
    }

    fn visit(&mut self, value: &Value, depth: usize) {
        if depth > MAX_SCAN_DEPTH || self.done() {
            return;
        }
        match value {
            Value::Object(map) => {
                let own_count = COUNT_KEYS
                    .iter()
                    .find_map(|k| map.get(*k).and_then(count_text));
                if self.rating.is_none() {
                    if let Some(rating) = RATING_KEYS
                        .iter()
                        .find_map(|k| map.get(*k).and_then(rating_text))
                    {
                        self.rating = Some(rating);
                        if own_count.is_some() {
                            self.count = own_count;
                            return;
                        }
                    }
                }
                if self.count.is_none() {
                    self.count = own_count;
                }
                for child in map.values() {
                    self.visit(child, depth + 1);
                    if self.done() {
                        return;
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.visit(item, depth + 1);
                    if self.done() {
                        return;
                    }
                }
            }
            _ => {}
        }
    }
}

fn rating_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };
    let normalized = normalize_rating_value(&text)?;
    let parsed: f64 = normalized.parse().ok()?;
    is_plausible_rating(parsed).then_some(normalized)
}

fn count_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => normalize_rating_count(&n.to_string()),
        Value::String(s) => normalize_rating_count(s),
        _ => None,
    }
}

fn is_plausible_rating(v: f64) -> bool {
    v > 0.0 && v <= MAX_PLAUSIBLE_RATING
}
