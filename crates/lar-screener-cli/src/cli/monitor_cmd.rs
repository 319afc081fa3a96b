//! `lar monitor` and `lar trends`: rating snapshots over time.

use anyhow::{Context, Result};
use clap::Args;
use lar_screener::acquisition::http_client::{Fetcher, HttpFetcher};
use lar_screener::acquisition::js_fallback::JsFallback;
use lar_screener::config::ScreenerConfig;
use lar_screener::monitor::{analyze_trends, monitor_targets, RatingMonitor, RatingSnapshot, Trends};
use lar_screener::renderer::launch_renderer;
use lar_screener::report::{append_rows, read_audit_report, read_rows};
use std::path::PathBuf;
use std::sync::Arc;

use super::output;

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Audit report whose URLs are re-checked
    pub audit: PathBuf,

    /// Snapshot history to append to
    #[arg(long, default_value = "ratings_history.csv")]
    pub out: PathBuf,

    /// Only URLs containing this text (e.g. "clasohlson.com")
    #[arg(long)]
    pub domain: Option<String>,

    /// Render pages without a server-side rating in a headless browser
    #[arg(long)]
    pub js: bool,
}

#[derive(Args, Debug)]
pub struct TrendsArgs {
    /// Snapshot history written by `lar monitor`
    pub history: PathBuf,
}

pub async fn run(args: &MonitorArgs, config: &ScreenerConfig) -> Result<()> {
    let records = read_audit_report(&args.audit)
        .with_context(|| format!("cannot read audit report {}", args.audit.display()))?;
    let total = monitor_targets(&records, args.domain.as_deref()).len();

    let js = if args.js {
        Some(JsFallback::new(launch_renderer(&config.fetch).await, &config.fetch))
    } else {
        None
    };
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.fetch));
    let monitor = RatingMonitor::new(fetcher, js.clone(), config.fetch.timeout_ms);

    let bar = output::progress(total, "checking ratings");
    let snapshots = monitor
        .run(&records, args.domain.as_deref(), |s| {
            bar.set_message(s.url.clone());
            bar.inc(1);
        })
        .await;
    bar.finish_and_clear();
    if let Some(js) = &js {
        js.shutdown().await;
    }

    append_rows(&args.out, &snapshots).with_context(|| format!("cannot append to {}", args.out.display()))?;
    let rated = snapshots.iter().filter(|s| s.has_rating_current).count();
    output::summary(&format!(
        "{rated}/{} pages rated → {}",
        snapshots.len(),
        args.out.display()
    ));
    Ok(())
}

pub fn run_trends(args: &TrendsArgs) -> Result<()> {
    let snapshots: Vec<RatingSnapshot> =
        read_rows(&args.history).with_context(|| format!("cannot read {}", args.history.display()))?;
    let trends = analyze_trends(&snapshots);

    if output::is_json() {
        output::print_json(&serde_json::to_value(&trends)?);
    } else if !output::is_quiet() {
        print!("{}", render_trends(&trends));
    }
    Ok(())
}

fn render_trends(trends: &Trends) -> String {
    let mut out = String::new();
    out.push_str(&format!("  Products monitored:         {}\n", trends.total_products));
    out.push_str(&format!("  Products with ratings:      {}\n", trends.products_with_ratings));
    out.push_str(&format!("  Products gaining reviews:   {}\n", trends.products_gaining_reviews));
    out.push_str(&format!("  Products improving ratings: {}\n", trends.products_improving_ratings));
    if !trends.top_review_gainers.is_empty() {
        out.push_str("\n  Top review gainers:\n");
        for (i, g) in trends.top_review_gainers.iter().enumerate() {
            let pace = g
                .reviews_per_day
                .map(|r| format!(", {r:.1}/day"))
                .unwrap_or_default();
            out.push_str(&format!(
                "  {:>2}. {} {} → {} (+{}) in {:.1} days{pace}\n",
                i + 1,
                g.url,
                g.from_count,
                g.to_count,
                g.gain,
                g.days
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lar_screener::monitor::ReviewGain;

    #[test]
    fn test_render_trends() {
        let trends = Trends {
            total_products: 3,
            products_with_ratings: 2,
            products_gaining_reviews: 1,
            products_improving_ratings: 0,
            top_review_gainers: vec![ReviewGain {
                url: "https://a.se/p/1".into(),
                product_id: "1".into(),
                from_count: 10,
                to_count: 24,
                gain: 14,
                days: 7.0,
                reviews_per_day: Some(2.0),
            }],
        };
        let text = render_trends(&trends);
        assert!(text.contains("Products monitored:         3"));
        assert!(text.contains("1. https://a.se/p/1 10 → 24 (+14) in 7.0 days, 2.0/day"));
    }

    #[test]
    fn test_trends_reads_history() {
        let dir = tempfile::tempdir().unwrap();
        let history = dir.path().join("history.csv");
        std::fs::write(
            &history,
            "timestamp,url,rating_value,rating_count,has_rating_current\n\
             2026-03-01T00:00:00Z,https://a.se/p/1,4.1,10,1\n\
             2026-03-02T00:00:00Z,https://a.se/p/1,4.2,12,1\n",
        )
        .unwrap();
        let snapshots: Vec<RatingSnapshot> = read_rows(&history).unwrap();
        let trends = analyze_trends(&snapshots);
        assert_eq!(trends.products_gaining_reviews, 1);
        assert_eq!(trends.products_improving_ratings, 1);
        run_trends(&TrendsArgs { history }).unwrap();
    }
}
