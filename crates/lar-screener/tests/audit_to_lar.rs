//! End-to-end: audit a mock retailer, write the report, read it back and
//! compute LAR plus attribution from it.

use lar_screener::acquisition::http_client::{Fetcher, HttpFetcher};
use lar_screener::config::{FetchConfig, ScreenerConfig};
use lar_screener::lar::{LarCalculator, LarInputs, ScoreTable, SentimentSource};
use lar_screener::report::{read_audit_report, read_url_list, write_audit_report, write_rows};
use lar_screener::{PageScorer, UrlTarget};
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRODUCT_PAGE: &str = r#"<html><head>
<script type="application/ld+json">
{"@context": "https://schema.org", "@type": "Product", "name": "Oil radiator 2000W",
 "gtin13": "7350000000001",
 "offers": {"@type": "Offer", "price": "899", "priceCurrency": "SEK"},
 "aggregateRating": {"@type": "AggregateRating", "ratingValue": "4.2", "reviewCount": "130"}}
</script></head>
<body><footer><a href="/returns">Returns</a></footer></body></html>"#;

const RETURNS_PAGE: &str = r#"<html><head>
<script type="application/ld+json">
{"@type": "MerchantReturnPolicy", "merchantReturnDays": 30}
</script></head><body></body></html>"#;

const STATE_ONLY_PAGE: &str = r#"<html><body><div id="root"></div>
<script>window.__INITIAL_STATE__ = {"product": {"title": "Fan", "rating": 4.0, "reviewCount": 5}};</script>
</body></html>"#;

async fn mock_retailer() -> MockServer {
    let server = MockServer::start().await;
    for (route, body) in [
        ("/p/1", PRODUCT_PAGE),
        ("/returns", RETURNS_PAGE),
        ("/p/2", STATE_ONLY_PAGE),
    ] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/p/3"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    server
}

fn scorer() -> PageScorer {
    let config = ScreenerConfig {
        fetch: FetchConfig {
            attempts: 1,
            timeout_ms: 2_000,
            ..FetchConfig::default()
        },
        ..ScreenerConfig::default()
    };
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.fetch));
    PageScorer::new(fetcher, None, config)
}

#[tokio::test]
async fn audit_report_feeds_lar() {
    let server = mock_retailer().await;
    let dir = TempDir::new().unwrap();

    let list = dir.path().join("urls.csv");
    std::fs::write(
        &list,
        format!(
            "url,intent_id\n{0}/p/1,H1\n{0}/p/2,F1\n{0}/p/3,\nmailto:x@y.se,\n",
            server.uri()
        ),
    )
    .unwrap();
    let targets: Vec<UrlTarget> = read_url_list(&list).unwrap();
    assert_eq!(targets.len(), 3);

    let mut audited = 0;
    let records = scorer().score_all(&targets, |_| audited += 1).await;
    assert_eq!(audited, 3);

    let full = &records[0];
    assert_eq!(full.intent_id, "H1");
    assert!(full.server_jsonld && full.ident_gtin && full.policy_link);
    assert!(full.policy_structured_on_policy_page);
    assert_eq!(full.product_score, 85);
    assert_eq!(full.rating_value, "4.2");

    let state_only = &records[1];
    assert_eq!(state_only.product_score, 0);
    assert_eq!(state_only.rating_value, "");
    assert_eq!(state_only.rating_value_fallback, "4.0");
    assert_eq!(state_only.rating_source_fallback, "fallback-inline");

    assert!(records[2].is_error());
    assert_eq!(records[2].product_score, 0);

    let report = dir.path().join("out/audit.csv");
    write_audit_report(&report, &records).unwrap();
    let reloaded = read_audit_report(&report).unwrap();
    assert_eq!(reloaded, records);

    let domain = url::Url::parse(&server.uri())
        .unwrap()
        .host_str()
        .unwrap()
        .to_string();
    let soa = ScoreTable::from_pairs([(domain.as_str(), 50.0)]);
    let calc = LarCalculator::new(ScreenerConfig::default().lar);
    let results = calc.compute(
        &reloaded,
        LarInputs {
            soa: Some(&soa),
            ..Default::default()
        },
    );
    assert_eq!(results.len(), 1);
    let result = &results[0];

    // The failed third page counts as zero in E and X but not in S.
    // E = (68 + 0 + 0) / 3, X = (40 + 0 + 0) / 3, S = (46.67 + 5.33) / 2.
    assert!((result.dims.e - 68.0 / 3.0).abs() < 1e-9);
    assert!((result.dims.x - 40.0 / 3.0).abs() < 1e-9);
    assert!((result.dims.s - 26.0).abs() < 1e-9);
    assert_eq!(result.s_source, SentimentSource::Audit);
    assert!((result.composite.lar - 27.5).abs() < 1e-9);
    assert!(!result.composite.capped(0.1));

    let attribution = result.attribution(calc.config());
    assert_eq!(attribution.pages, 3);
    assert_eq!(attribution.rated_pages, 2);
    assert_eq!(attribution.fallback_share, Some(50.0));
    assert!((attribution.rate_structured_policy_page - 100.0 / 3.0).abs() < 1e-9);

    let lar_out = dir.path().join("out/lar.csv");
    write_rows(&lar_out, &[result.row()]).unwrap();
    let text = std::fs::read_to_string(&lar_out).unwrap();
    assert!(text.starts_with("key,brand,categories,E,X,A,S,LAR\n"));
    assert!(text.contains(",27.5\n"));
}
