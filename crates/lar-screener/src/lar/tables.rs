//! Externally supplied inputs to the LAR: per-domain score tables, the
//! intent-to-category map and the peer (brand) table.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::report::{ReportError, Table};

/// Normalise a domain, URL or brand into a join key: lowercase host,
/// leading `www.` stripped.
pub fn domain_key(value: &str) -> String {
    let trimmed = value.trim();
    let host = if trimmed.contains("://") {
        url::Url::parse(trimmed)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| trimmed.to_string())
    } else {
        trimmed
            .split(['/', '?', '#'])
            .next()
            .unwrap_or(trimmed)
            .to_string()
    };
    let host = host.to_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

/// Lowercase alphanumerics only, for fuzzy brand/domain matching.
pub fn match_key(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// A per-domain numeric table (Share of Answer, manual Sentiment).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreTable {
    values: BTreeMap<String, f64>,
}

impl ScoreTable {
    pub fn read(path: &Path) -> Result<Self, ReportError> {
        Self::from_table(&Table::read(path)?, path)
    }

    /// Key column is the first of `key|domain|brand`, value column the
    /// first of `value|score|soa|sentiment`. Rows with a blank key or an
    /// unparseable value are skipped.
    pub fn from_table(table: &Table, path: &Path) -> Result<Self, ReportError> {
        let key_col = table.require(&["key", "domain", "brand"], path)?;
        let value_col = table.require(&["value", "score", "soa", "sentiment"], path)?;

        let mut values = BTreeMap::new();
        for row in &table.rows {
            let key = Table::cell(row, Some(key_col)).map(domain_key);
            let value = Table::cell(row, Some(value_col))
                .and_then(|v| v.replace(',', ".").parse::<f64>().ok())
                .filter(|v| v.is_finite());
            match (key, value) {
                (Some(k), Some(v)) if !k.is_empty() => {
                    values.insert(k, v);
                }
                _ => tracing::debug!("{}: skipping row {:?}", path.display(), row),
            }
        }
        Ok(Self { values })
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (domain_key(k.as_ref()), v))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A competitor: brand name, its domain and the categories it competes in.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub brand: String,
    pub domain: String,
    pub categories: Vec<String>,
    /// Sitemap to search during discovery.
    pub sitemap: Option<String>,
    /// On-site search URL with a `{query}` placeholder.
    pub search: Option<String>,
}

impl Peer {
    /// Whether this peer names `domain`: normalised containment either way,
    /// against the peer's domain or brand.
    pub fn matches(&self, domain: &str) -> bool {
        let target = match_key(domain);
        if target.is_empty() {
            return false;
        }
        [&self.domain, &self.brand].into_iter().any(|candidate| {
            let candidate = match_key(&domain_key(candidate));
            !candidate.is_empty() && (target.contains(&candidate) || candidate.contains(&target))
        })
    }

    /// Sitemap URL, defaulting to `/sitemap.xml` on the peer's domain.
    pub fn sitemap_url(&self) -> String {
        self.sitemap
            .clone()
            .unwrap_or_else(|| format!("https://{}/sitemap.xml", domain_key(&self.domain)))
    }
}

/// The peer table: `brand,domain,categories[,sitemap][,search]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerTable {
    pub peers: Vec<Peer>,
}

impl PeerTable {
    pub fn read(path: &Path) -> Result<Self, ReportError> {
        let table = Table::read(path)?;
        let brand_col = table.column(&["brand", "name"]);
        let domain_col = table.require(&["domain", "key"], path)?;
        let categories_col = table.column(&["categories", "category"]);
        let sitemap_col = table.column(&["sitemap", "sitemap_url"]);
        let search_col = table.column(&["search", "search_url"]);

        let peers = table
            .rows
            .iter()
            .filter_map(|row| {
                let domain = Table::cell(row, Some(domain_col))?.to_string();
                Some(Peer {
                    brand: Table::cell(row, brand_col).unwrap_or(domain.as_str()).to_string(),
                    categories: Table::cell(row, categories_col)
                        .map(split_categories)
                        .unwrap_or_default(),
                    sitemap: Table::cell(row, sitemap_col).map(str::to_string),
                    search: Table::cell(row, search_col).map(str::to_string),
                    domain,
                })
            })
            .collect();
        Ok(Self { peers })
    }

    /// The first peer matching `domain`.
    pub fn find(&self, domain: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.matches(domain))
    }
}

/// Split a category cell on `;`, `|` or `,`.
pub fn split_categories(cell: &str) -> Vec<String> {
    cell.split([';', '|', ','])
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// One shopping intent: id, category and search keywords.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub id: String,
    pub category: String,
    pub keywords: Vec<String>,
}

/// Intent metadata plus URL-to-intent assignments from discovery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryMap {
    pub intents: Vec<Intent>,
    by_id: HashMap<String, usize>,
    url_intents: HashMap<String, String>,
}

/// Bucket for intents with no category mapping.
pub const DEFAULT_CATEGORY: &str = "General";

impl CategoryMap {
    /// Intent table: `intent_id,category[,keywords|prompt]`.
    pub fn read_intents(path: &Path) -> Result<Self, ReportError> {
        let table = Table::read(path)?;
        let id_col = table.require(&["intent_id", "id", "intent"], path)?;
        let category_col = table.column(&["category"]);
        let keywords_col = table.column(&["keywords", "prompt", "query"]);

        let intents = table
            .rows
            .iter()
            .filter_map(|row| {
                Some(Intent {
                    id: Table::cell(row, Some(id_col))?.to_string(),
                    category: Table::cell(row, category_col)
                        .unwrap_or(DEFAULT_CATEGORY)
                        .to_string(),
                    keywords: Table::cell(row, keywords_col)
                        .map(split_keywords)
                        .unwrap_or_default(),
                })
            })
            .collect();
        Ok(Self::from_intents(intents))
    }

    pub fn from_intents(intents: Vec<Intent>) -> Self {
        let by_id = intents
            .iter()
            .enumerate()
            .map(|(i, intent)| (intent.id.clone(), i))
            .collect();
        Self {
            intents,
            by_id,
            url_intents: HashMap::new(),
        }
    }

    /// Add `intent_id,url` assignments (a discovery output) used for audit
    /// rows that carry no intent id.
    pub fn with_url_intents(mut self, path: &Path) -> Result<Self, ReportError> {
        let table = Table::read(path)?;
        let url_col = table.require(&["url"], path)?;
        let id_col = table.require(&["intent_id", "intent"], path)?;
        for row in &table.rows {
            if let (Some(url), Some(id)) = (
                Table::cell(row, Some(url_col)),
                Table::cell(row, Some(id_col)),
            ) {
                self.url_intents
                    .entry(url.to_string())
                    .or_insert_with(|| id.to_string());
            }
        }
        Ok(self)
    }

    pub fn insert_url_intent(&mut self, url: &str, intent_id: &str) {
        self.url_intents
            .insert(url.to_string(), intent_id.to_string());
    }

    pub fn intent(&self, id: &str) -> Option<&Intent> {
        self.by_id.get(id).and_then(|&i| self.intents.get(i))
    }

    /// Category for an audit row: its own intent id, else the discovery
    /// assignment for its URL, else [`DEFAULT_CATEGORY`].
    pub fn category_for(&self, intent_id: &str, url: &str) -> String {
        let id = if intent_id.trim().is_empty() {
            self.url_intents.get(url).map(String::as_str)
        } else {
            Some(intent_id.trim())
        };
        id.and_then(|id| self.intent(id))
            .map(|intent| intent.category.clone())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
    }
}

fn split_keywords(cell: &str) -> Vec<String> {
    cell.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '|'))
        .map(|w| w.trim().to_lowercase())
        .filter(|w| w.chars().count() > 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_domain_key() {
        assert_eq!(domain_key("https://www.Elgiganten.se/product/1"), "elgiganten.se");
        assert_eq!(domain_key("WWW.shop.com"), "shop.com");
        assert_eq!(domain_key("shop.com/path"), "shop.com");
        assert_eq!(domain_key(" Clas Ohlson "), "clas ohlson");
    }

    #[test]
    fn test_score_table_columns_and_bad_rows() {
        let f = write_temp("domain,soa\nwww.shop.se,30\nother.se,n/a\n,12\nbeta.se,\"12,5\"\n");
        let table = ScoreTable::read(f.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("shop.se"), Some(30.0));
        assert_eq!(table.get("beta.se"), Some(12.5));
        assert_eq!(table.get("other.se"), None);
    }

    #[test]
    fn test_score_table_requires_columns() {
        let f = write_temp("site,points\nshop.se,1\n");
        assert!(matches!(
            ScoreTable::read(f.path()),
            Err(ReportError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_peer_matching() {
        let peer = Peer {
            brand: "Clas Ohlson".into(),
            domain: "clasohlson.com".into(),
            categories: vec![],
            sitemap: None,
            search: None,
        };
        assert!(peer.matches("clasohlson.com"));
        assert!(peer.matches("clasohlson.se"));
        assert!(!peer.matches("kjell.com"));
        assert_eq!(peer.sitemap_url(), "https://clasohlson.com/sitemap.xml");
    }

    #[test]
    fn test_peer_table() {
        let f = write_temp("brand,domain,categories\nKjell,www.kjell.com,heaters; fans|lamps\nJula,jula.se,\n");
        let peers = PeerTable::read(f.path()).unwrap();
        assert_eq!(peers.peers.len(), 2);
        assert_eq!(peers.peers[0].categories, vec!["heaters", "fans", "lamps"]);
        assert!(peers.peers[1].categories.is_empty());
        assert_eq!(peers.find("kjell.com").map(|p| p.brand.as_str()), Some("Kjell"));
    }

    #[test]
    fn test_category_resolution() {
        let intents = write_temp("intent_id,category,keywords\nI1,heaters,oil radiator 2000W\nI2,,\n");
        let discovered = write_temp("intent_id,url\nI1,https://shop.se/p/1\n");
        let map = CategoryMap::read_intents(intents.path())
            .unwrap()
            .with_url_intents(discovered.path())
            .unwrap();

        assert_eq!(map.category_for("I1", "https://x"), "heaters");
        assert_eq!(map.category_for("", "https://shop.se/p/1"), "heaters");
        assert_eq!(map.category_for("I2", "https://x"), DEFAULT_CATEGORY);
        assert_eq!(map.category_for("I9", "https://x"), DEFAULT_CATEGORY);
        assert_eq!(map.intent("I1").unwrap().keywords, vec!["oil", "radiator", "2000w"]);
    }
}
