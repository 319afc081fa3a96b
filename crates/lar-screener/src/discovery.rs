//! Audit URL discovery.
//!
//! For every peer × intent pair one product detail page becomes the audit
//! URL. Two strategies find it: the peer's sitemap, searched for product
//! pages whose path best matches the intent keywords, and the retailer's
//! own on-site search. Each peer's sitemap is fetched once per run.

use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use crate::acquisition::http_client::Fetcher;
use crate::acquisition::sitemap::collect_sitemap_urls;
use crate::audit::record::zero_one;
use crate::config::DiscoveryConfig;
use crate::lar::tables::{domain_key, Intent, Peer};
use crate::report::round2;

/// Known on-site search URLs, keyed by domain. `{query}` is replaced by the
/// form-encoded search terms.
pub const SEARCH_PATTERNS: [(&str, &str); 11] = [
    ("elgiganten.se", "https://www.elgiganten.se/search?SearchTerm={query}"),
    ("netonnet.se", "https://www.netonnet.se/art/sok?q={query}"),
    ("kjell.com", "https://www.kjell.com/se/sok?query={query}"),
    ("clasohlson.com", "https://www.clasohlson.com/se/search?q={query}"),
    ("jula.se", "https://www.jula.se/catalog?searchQuery={query}"),
    ("biltema.se", "https://www.biltema.se/sv-se/sok?searchQuery={query}"),
    ("byggmax.se", "https://www.byggmax.se/search?q={query}"),
    ("bygghemma.se", "https://www.bygghemma.se/sok/?q={query}"),
    ("hornbach.se", "https://www.hornbach.se/shop/search/{query}/"),
    ("dustin.se", "https://www.dustin.se/search?q={query}"),
    ("rusta.com", "https://www.rusta.com/sv-se/sok?q={query}"),
];

/// Link fragments that mark a search hit as a product page.
const SEARCH_PRODUCT_MARKERS: [&str; 4] = ["/product/", "/p/", "/produkter/", "-p-"];

/// Link fragments for pagination and cart links on a results page.
const SEARCH_SKIP: [&str; 3] = ["?page=", "/cart", "/kundvagn"];

/// Where discovery looks for product pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryStrategy {
    #[default]
    Sitemap,
    Search,
    /// Sitemap first, on-site search for the pairs it leaves unfound.
    Both,
}

impl DiscoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sitemap => "sitemap",
            Self::Search => "search",
            Self::Both => "both",
        }
    }

    fn uses_sitemap(self) -> bool {
        matches!(self, Self::Sitemap | Self::Both)
    }

    fn uses_search(self) -> bool {
        matches!(self, Self::Search | Self::Both)
    }
}

impl fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("unknown discovery strategy: {0} (expected sitemap, search or both)")]
pub struct UnknownStrategy(pub String);

impl FromStr for DiscoveryStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sitemap" => Ok(Self::Sitemap),
            "search" | "site-search" => Ok(Self::Search),
            "both" => Ok(Self::Both),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// Path fragments marking category or filter listings.
const LISTING_SIGNALS: [&str; 6] = ["/c/", "/f/", "?filter", "&filter", "?category", "&category"];

/// Sitemap names that promise product pages only.
const PRODUCT_SITEMAP_HINTS: [&str; 8] = [
    "product_sitemap",
    "product-sitemap",
    "sitemap_product",
    "sitemap-product",
    "pdp",
    "_product.xml",
    "-product.xml",
    "produkt",
];

/// Last path segments that name a listing rather than a product.
const GENERIC_ENDINGS: [&str; 13] = [
    "products", "produkter", "items", "catalog", "katalog", "all", "alla", "search", "sok",
    "list", "lista", "categories", "kategorier",
];

static PRODUCT_ID: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"/p-\d+(?:[/?#]|$)",
        r"/p/\d+(?:[/?#-]|$)",
        r"/p\d{5,}(?:[/?#]|$)",
        r"-p\d{5,}(?:[/?#]|$)",
        r"/art-?\d{5,}(?:[/?#]|$)",
        r"/sku-?\d{5,}(?:[/?#]|$)",
        r"/produkt/\d+(?:[/?#]|$)",
        r"/product/[^/]+/\d+(?:[/?#]|$)",
        r"-\d{7,}(?:[/?#]|$)",
        r"/\d{6,}(?:[/?#]|$)",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Whether `url` looks like a product detail page.
///
/// Listing markers always disqualify. A product id pattern qualifies. Without
/// one, a deep slug path qualifies: 3+ segments when the sitemap is named as
/// a product sitemap, 4+ otherwise.
pub fn is_product_page(url: &str, sitemap_url: &str) -> bool {
    let lower = url.to_lowercase();
    if LISTING_SIGNALS.iter().any(|s| lower.contains(s)) {
        return false;
    }
    if PRODUCT_ID.iter().any(|re| re.is_match(&lower)) {
        return true;
    }

    let sitemap = sitemap_url.to_lowercase();
    let min_segments = if PRODUCT_SITEMAP_HINTS.iter().any(|h| sitemap.contains(h)) {
        3
    } else {
        4
    };
    let path = url::Url::parse(&lower)
        .map(|u| u.path().to_string())
        .unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments.len() >= min_segments
        && segments
            .last()
            .map(|last| !GENERIC_ENDINGS.contains(last))
            .unwrap_or(false)
}

/// Search terms for an intent: its keywords, or the words of its category.
pub fn intent_terms(intent: &Intent) -> Vec<String> {
    if !intent.keywords.is_empty() {
        return intent.keywords.clone();
    }
    intent
        .category
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

/// Fraction of `terms` present in the URL path, after folding separators
/// to spaces.
pub fn relevance(url: &str, terms: &[String]) -> f64 {
    term_fraction(&url_path(url), terms)
}

fn url_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

fn term_fraction(text: &str, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' { c } else { ' ' })
        .collect();
    let compact: String = haystack.split_whitespace().collect();
    let hits = terms
        .iter()
        .filter(|t| {
            let term = t.to_lowercase();
            let folded: String = term.split(|c: char| !c.is_alphanumeric()).collect();
            haystack.contains(&term) || (!folded.is_empty() && compact.contains(&folded))
        })
        .count();
    hits as f64 / terms.len() as f64
}

/// One discovery result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRow {
    pub intent_id: String,
    pub brand: String,
    pub domain: String,
    pub url: String,
    pub relevance_score: f64,
    #[serde(with = "zero_one")]
    pub found: bool,
}

impl DiscoveryRow {
    fn missing(intent: &Intent, peer: &Peer) -> Self {
        Self {
            intent_id: intent.id.clone(),
            brand: peer.brand.clone(),
            domain: domain_key(&peer.domain),
            url: String::new(),
            relevance_score: 0.0,
            found: false,
        }
    }
}

/// Product page candidates from a peer's sitemap; `None` when the sitemap
/// could not be fetched.
pub async fn product_candidates(fetcher: &dyn Fetcher, peer: &Peer, timeout_ms: u64) -> Option<Vec<String>> {
    let sitemap = peer.sitemap_url();
    match collect_sitemap_urls(fetcher, &sitemap, timeout_ms).await {
        Ok(pairs) => {
            let pages: Vec<String> = pairs
                .into_iter()
                .filter(|(source, url)| is_product_page(url, source))
                .map(|(_, url)| url)
                .collect();
            tracing::info!("{}: {} product pages in {sitemap}", peer.brand, pages.len());
            Some(pages)
        }
        Err(e) => {
            tracing::warn!("{}: sitemap unavailable: {e:#}", peer.brand);
            None
        }
    }
}

/// Best-matching product page for `intent` among `candidates`. Ties keep the
/// earliest sitemap entry.
pub fn best_match(intent: &Intent, peer: &Peer, candidates: &[String]) -> DiscoveryRow {
    let terms = intent_terms(intent);
    let mut best: Option<(&String, f64)> = None;
    for url in candidates {
        let score = relevance(url, &terms);
        if score > best.map(|(_, s)| s).unwrap_or(0.0) {
            best = Some((url, score));
        }
    }
    match best {
        Some((url, score)) => DiscoveryRow {
            url: url.clone(),
            relevance_score: round2(score),
            found: true,
            ..DiscoveryRow::missing(intent, peer)
        },
        None => DiscoveryRow::missing(intent, peer),
    }
}

/// A product link from an on-site search results page.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
}

/// The peer's search URL for `query`: its own `search` template, else the
/// built-in one for its domain.
pub fn search_url(peer: &Peer, query: &str) -> Option<String> {
    let key = domain_key(&peer.domain);
    let template = peer.search.as_deref().or_else(|| {
        SEARCH_PATTERNS
            .iter()
            .find(|(domain, _)| *domain == key)
            .map(|(_, template)| *template)
    })?;
    let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
    Some(template.replace("{query}", &encoded))
}

/// Product links on a search results page, absolute, same-site, deduped,
/// in page order and capped at `limit`.
pub fn search_hits(html: &str, page_url: &str, limit: usize) -> Vec<SearchHit> {
    let Ok(base) = url::Url::parse(page_url) else {
        return Vec::new();
    };
    let site = domain_key(page_url);
    let document = Html::parse_document(html);
    let anchors = Selector::parse("a[href]").expect("valid selector");

    let mut hits: Vec<SearchHit> = Vec::new();
    for anchor in document.select(&anchors) {
        let Some(url) = anchor.value().attr("href").and_then(|h| base.join(h.trim()).ok()) else {
            continue;
        };
        let url = url.to_string();
        let lower = url.to_lowercase();
        if domain_key(&url) != site || SEARCH_SKIP.iter().any(|s| lower.contains(s)) {
            continue;
        }
        let product = SEARCH_PRODUCT_MARKERS.iter().any(|m| lower.contains(m))
            || is_product_page(&url, page_url);
        if !product || hits.iter().any(|h| h.url == url) {
            continue;
        }
        let text: Vec<&str> = anchor.text().flat_map(str::split_whitespace).collect();
        let title = if text.is_empty() {
            anchor.value().attr("title").unwrap_or_default().trim().to_string()
        } else {
            text.join(" ")
        };
        if title.is_empty() {
            continue;
        }
        hits.push(SearchHit { url, title });
        if hits.len() >= limit {
            break;
        }
    }
    hits
}

/// Run the peer's on-site search for `intent`. `None` when the peer has no
/// known search URL or the search page could not be fetched.
pub async fn search_candidates(
    fetcher: &dyn Fetcher,
    peer: &Peer,
    intent: &Intent,
    timeout_ms: u64,
    limit: usize,
) -> Option<Vec<SearchHit>> {
    let query = intent_terms(intent).join(" ");
    let Some(page_url) = search_url(peer, &query) else {
        tracing::debug!("{}: no on-site search configured", peer.brand);
        return None;
    };
    match fetcher.fetch(&page_url, timeout_ms).await {
        Ok(html) => {
            let hits = search_hits(&html, &page_url, limit);
            tracing::info!("{}: {} search hits for {:?}", peer.brand, hits.len(), query);
            Some(hits)
        }
        Err(e) => {
            tracing::warn!("{}: search failed: {e}", peer.brand);
            None
        }
    }
}

/// Best search hit for `intent`, scored on URL path and link title. The
/// retailer already matched the query, so the top hit is kept even when no
/// keyword appears; ties keep page order.
pub fn best_search_match(intent: &Intent, peer: &Peer, hits: &[SearchHit]) -> DiscoveryRow {
    let terms = intent_terms(intent);
    let mut best: Option<(&SearchHit, f64)> = None;
    for hit in hits {
        let text = format!("{} {}", url_path(&hit.url), hit.title);
        let score = term_fraction(&text, &terms);
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((hit, score));
        }
    }
    match best {
        Some((hit, score)) => DiscoveryRow {
            url: hit.url.clone(),
            relevance_score: round2(score),
            found: true,
            ..DiscoveryRow::missing(intent, peer)
        },
        None => DiscoveryRow::missing(intent, peer),
    }
}

/// Run discovery for every peer × intent pair. A peer with declared
/// categories only gets the intents of those categories.
pub async fn discover(
    fetcher: &dyn Fetcher,
    peers: &[Peer],
    intents: &[Intent],
    timeout_ms: u64,
    options: &DiscoveryConfig,
) -> Vec<DiscoveryRow> {
    let strategy = options.strategy;
    let mut cache: HashMap<String, Option<Vec<String>>> = HashMap::new();
    let mut rows = Vec::new();

    for peer in peers {
        let relevant: Vec<&Intent> = intents
            .iter()
            .filter(|i| {
                peer.categories.is_empty()
                    || peer.categories.iter().any(|c| c.eq_ignore_ascii_case(&i.category))
            })
            .collect();
        if relevant.is_empty() {
            continue;
        }

        let candidates = if strategy.uses_sitemap() {
            let key = peer.sitemap_url();
            if !cache.contains_key(&key) {
                let found = product_candidates(fetcher, peer, timeout_ms).await;
                cache.insert(key.clone(), found);
            }
            cache.get(&key).and_then(Option::as_deref)
        } else {
            None
        };

        for intent in relevant {
            let mut row = match candidates {
                Some(candidates) => best_match(intent, peer, candidates),
                None => DiscoveryRow::missing(intent, peer),
            };
            if !row.found && strategy.uses_search() {
                if let Some(hits) =
                    search_candidates(fetcher, peer, intent, timeout_ms, options.max_search_hits).await
                {
                    row = best_search_match(intent, peer, &hits);
                    if options.search_delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(options.search_delay_ms)).await;
                    }
                }
            }
            rows.push(row);
        }
    }
    rows
}
