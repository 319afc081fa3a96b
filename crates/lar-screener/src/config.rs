//! Scoring weights, LAR blend parameters, fetch policy and discovery.
//!
//! Everything tunable lives in [`ScreenerConfig`]. It is passed explicitly
//! into [`PageScorer`](crate::audit::PageScorer) and
//! [`LarCalculator`](crate::lar::LarCalculator) so tests can swap weight
//! tables without touching process state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::discovery::DiscoveryStrategy;

/// Env var naming a JSON config file.
pub const CONFIG_ENV: &str = "LAR_CONFIG";

/// Top-level configuration bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenerConfig {
    pub scoring: ScoringConfig,
    pub lar: LarConfig,
    pub fetch: FetchConfig,
    pub discovery: DiscoveryConfig,
}

/// Weights for the per-URL product and family scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub product: ProductWeights,
    pub family: FamilyWeights,
}

/// Points awarded toward `product_score` (max 100 with defaults).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductWeights {
    /// JSON-LD present in the server HTML.
    pub jsonld: u32,
    /// JSON-LD only present after JS rendering.
    pub jsonld_js: u32,
    pub product: u32,
    pub offer: u32,
    pub identifiers_gtin: u32,
    pub identifiers_brand_mpn: u32,
    pub policies: u32,
    pub specs_with_units: u32,
}

impl Default for ProductWeights {
    fn default() -> Self {
        Self {
            jsonld: 20,
            jsonld_js: 15,
            product: 20,
            offer: 15,
            identifiers_gtin: 20,
            identifiers_brand_mpn: 12,
            policies: 10,
            specs_with_units: 15,
        }
    }
}

/// Points awarded toward `family_score` when a ProductGroup exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilyWeights {
    pub productgroup: u32,
    pub has_variant: u32,
    pub links_to_children: u32,
    pub policies: u32,
    pub spec_ranges: u32,
}

impl Default for FamilyWeights {
    fn default() -> Self {
        Self {
            productgroup: 30,
            has_variant: 30,
            links_to_children: 20,
            policies: 10,
            spec_ranges: 10,
        }
    }
}

/// Parameters of the composite LAR score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LarConfig {
    pub weight_e: f64,
    pub weight_x: f64,
    pub weight_a: f64,
    pub weight_s: f64,
    /// Share of `product_score` in a page's E value; the rest is `family_score`.
    pub e_product_share: f64,
    /// E below this caps the LAR.
    pub eligibility_gate: f64,
    pub eligibility_cap: f64,
    pub policy_points_product_page: f64,
    pub policy_points_policy_page: f64,
    pub policy_points_link: f64,
    pub specs_points: f64,
    pub rating_neutral: f64,
    pub rating_max: f64,
    /// Review count at which a rating reaches full confidence.
    pub confidence_threshold: f64,
    /// Multiplier for ratings recovered by fallback extraction.
    pub fallback_source_weight: f64,
    /// Minimum raw-vs-capped difference reported as "capped".
    pub cap_epsilon: f64,
}

impl Default for LarConfig {
    fn default() -> Self {
        Self {
            weight_e: 0.40,
            weight_x: 0.25,
            weight_a: 0.25,
            weight_s: 0.10,
            e_product_share: 0.8,
            eligibility_gate: 60.0,
            eligibility_cap: 40.0,
            policy_points_product_page: 50.0,
            policy_points_policy_page: 40.0,
            policy_points_link: 25.0,
            specs_points: 50.0,
            rating_neutral: 3.5,
            rating_max: 5.0,
            confidence_threshold: 25.0,
            fallback_source_weight: 0.8,
            cap_epsilon: 0.1,
        }
    }
}

/// Network and browser timing policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    pub attempts: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub policy_page_timeout_ms: u64,
    pub render_timeout_ms: u64,
    /// Upper bound on the best-effort network-idle wait after DOMContentLoaded.
    pub idle_timeout_ms: u64,
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            attempts: 3,
            backoff_initial_ms: 500,
            backoff_max_ms: 4_000,
            policy_page_timeout_ms: 5_000,
            render_timeout_ms: 20_000,
            idle_timeout_ms: 5_000,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
                .to_string(),
            accept_language: "en-US,en;q=0.9,sv;q=0.8".to_string(),
        }
    }
}

/// How `discover` finds audit URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub strategy: DiscoveryStrategy,
    /// Pause after each on-site search request.
    pub search_delay_ms: u64,
    /// Product links kept from one search results page.
    pub max_search_hits: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            strategy: DiscoveryStrategy::Sitemap,
            search_delay_ms: 1_500,
            max_search_hits: 10,
        }
    }
}

/// Errors raised while loading a config file.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl ScreenerConfig {
    /// Load a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolve and load the active config.
    ///
    /// Order: explicit path, `LAR_CONFIG`, `./.lar/config.json`, defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match resolve_config_path(explicit) {
            Some(path) => {
                tracing::debug!("loading config from {}", path.display());
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        if !env_path.trim().is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }

    let cwd_config = PathBuf::from(".lar/config.json");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    None
}
