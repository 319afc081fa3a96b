//! Merchant-policy evidence outside JSON-LD: links to returns, warranty,
//! terms and shipping pages, and policy markup on the page they lead to.

use scraper::{Html, Selector};

use super::structured::{PageGraph, POLICY_KEYS};

/// Keywords looked for in link targets and link text (English and Swedish).
pub const POLICY_KEYWORDS: [&str; 11] = [
    "returns", "retur", "ånger", "köpvillkor", "warranty", "garanti", "terms", "villkor", "policy",
    "shipping", "frakt",
];

/// Path fragments that mark a policy URL anywhere in the raw page text.
pub const POLICY_URL_FRAGMENTS: [&str; 12] = [
    "/returns",
    "/return-policy",
    "/retur",
    "/angerratt",
    "/kopvillkor",
    "/köpvillkor",
    "/warranty",
    "/garanti",
    "/terms",
    "/villkor",
    "/shipping",
    "/frakt",
];

/// Policy links found on a page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyLinks {
    /// Any link or URL fragment matched.
    pub found: bool,
    /// Matching link targets resolved to absolute http(s) URLs, in document order.
    pub urls: Vec<String>,
}

impl PolicyLinks {
    pub fn first_url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }
}

/// Scan anchors and raw text for policy links.
pub fn find_policy_links(html: &str, base_url: &str) -> PolicyLinks {
    let base = url::Url::parse(base_url).ok();
    let mut links = PolicyLinks::default();

    {
        let document = Html::parse_document(html);
        let sel = Selector::parse("a[href]").expect("valid selector");
        for anchor in document.select(&sel) {
            let href = anchor.value().attr("href").unwrap_or_default().trim();
            let text: String = anchor.text().collect();
            if !mentions_policy(href) && !mentions_policy(&text) {
                continue;
            }
            links.found = true;
            let resolved = match &base {
                Some(b) => b.join(href).ok(),
                None => url::Url::parse(href).ok(),
            };
            if let Some(u) = resolved.filter(|u| matches!(u.scheme(), "http" | "https")) {
                let u = u.to_string();
                if !links.urls.contains(&u) {
                    links.urls.push(u);
                }
            }
        }
    }

    if !links.found {
        let lower = html.to_lowercase();
        links.found = POLICY_URL_FRAGMENTS.iter().any(|f| lower.contains(f));
    }
    links
}

fn mentions_policy(text: &str) -> bool {
    let lower = text.to_lowercase();
    POLICY_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Whether a policy page itself carries policy markup: a
/// `MerchantReturnPolicy`/`WarrantyPromise` node, or an Organization with
/// policy fields.
pub fn has_policy_page_markup(graph: &PageGraph) -> bool {
    let buckets = graph.classify();
    !buckets.policies.is_empty()
        || buckets
            .organizations
            .iter()
            .any(|org| POLICY_KEYS.iter().any(|k| org.has(k)) || org.has("shippingDetails"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_anchor_href_and_text_match() {
        let html = r#"
          <a href="/kundservice/kopvillkor">Köpvillkor</a>
          <a href="/help">Öppet köp &amp; ångerrätt</a>
          <a href="mailto:help@shop.se">Frakt questions</a>
          <a href="/kundservice/kopvillkor">Terms again</a>"#;
        let links = find_policy_links(html, "https://shop.se/p/123");
        assert!(links.found);
        assert_eq!(
            links.urls,
            vec![
                "https://shop.se/kundservice/kopvillkor".to_string(),
                "https://shop.se/help".to_string(),
            ]
        );
        assert_eq!(links.first_url(), Some("https://shop.se/kundservice/kopvillkor"));
    }

    #[test]
    fn test_raw_fragment_without_anchor() {
        let html = r#"<script>var footer = {"returnsUrl": "https://shop.com/returns"};</script>"#;
        let links = find_policy_links(html, "https://shop.com/p/1");
        assert!(links.found);
        assert!(links.urls.is_empty());
    }

    #[test]
    fn test_nothing_found() {
        let html = r#"<a href="/cart">Cart</a><p>Great heater</p>"#;
        assert_eq!(find_policy_links(html, "https://shop.com/"), PolicyLinks::default());
    }

    #[test]
    fn test_policy_page_markup() {
        let policy = PageGraph::from_values(
            &[json!({"@type": "MerchantReturnPolicy", "merchantReturnDays": 30})],
            "https://shop.com/returns",
        );
        assert!(has_policy_page_markup(&policy));

        let org = PageGraph::from_values(
            &[json!({"@type": "Organization", "hasMerchantReturnPolicy": {"@id": "#r"}})],
            "https://shop.com/returns",
        );
        assert!(has_policy_page_markup(&org));

        let bare = PageGraph::from_values(
            &[json!({"@type": "Organization", "name": "Shop"})],
            "https://shop.com/returns",
        );
        assert!(!has_policy_page_markup(&bare));
    }
}
