//! `lar audit <urls>`: audit every URL and write the audit report.

use anyhow::{Context, Result};
use clap::Args;
use lar_screener::acquisition::http_client::{Fetcher, HttpFetcher};
use lar_screener::acquisition::js_fallback::JsFallback;
use lar_screener::config::ScreenerConfig;
use lar_screener::renderer::launch_renderer;
use lar_screener::report::{read_url_list, write_audit_report};
use lar_screener::{PageScorer, ProductRecord};
use std::path::PathBuf;
use std::sync::Arc;

use super::output;

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// URL list: one URL per line, or CSV with `url` (and optional `intent_id`)
    pub input: PathBuf,

    /// Audit report to write
    #[arg(long, default_value = "audit.csv")]
    pub out: PathBuf,

    /// Skip the headless-browser fallback entirely
    #[arg(long)]
    pub no_js: bool,
}

pub async fn run(args: &AuditArgs, config: &ScreenerConfig) -> Result<()> {
    let targets = read_url_list(&args.input)
        .with_context(|| format!("cannot read URL list {}", args.input.display()))?;
    if targets.is_empty() {
        tracing::warn!("{} holds no http(s) URLs", args.input.display());
    }

    let js = if args.no_js {
        None
    } else {
        Some(JsFallback::new(launch_renderer(&config.fetch).await, &config.fetch))
    };
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.fetch));
    let scorer = PageScorer::new(fetcher, js.clone(), config.clone());

    let bar = output::progress(targets.len(), "auditing");
    let records = scorer
        .score_all(&targets, |record| {
            bar.set_message(record.url.clone());
            bar.inc(1);
        })
        .await;
    bar.finish_and_clear();

    if let Some(js) = &js {
        js.shutdown().await;
    }

    write_audit_report(&args.out, &records)
        .with_context(|| format!("cannot write {}", args.out.display()))?;

    let summary = AuditSummary::of(&records);
    if output::is_json() {
        output::print_json(&serde_json::json!({
            "report": args.out.display().to_string(),
            "urls": summary.urls,
            "errors": summary.errors,
            "with_jsonld": summary.with_jsonld,
            "with_rating": summary.with_rating,
        }));
    } else {
        output::summary(&format!(
            "audited {} URLs ({} errors, {} with JSON-LD, {} rated) → {}",
            summary.urls,
            summary.errors,
            summary.with_jsonld,
            summary.with_rating,
            args.out.display()
        ));
    }
    Ok(())
}

#[derive(Debug, Default, PartialEq)]
struct AuditSummary {
    urls: usize,
    errors: usize,
    with_jsonld: usize,
    with_rating: usize,
}

impl AuditSummary {
    fn of(records: &[ProductRecord]) -> Self {
        let count = |f: fn(&ProductRecord) -> bool| records.iter().filter(|r| f(r)).count();
        Self {
            urls: records.len(),
            errors: count(ProductRecord::is_error),
            with_jsonld: count(|r| r.server_jsonld || r.js_jsonld),
            with_rating: count(|r| r.has_rating),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let records = vec![
            ProductRecord {
                server_jsonld: true,
                has_rating: true,
                ..Default::default()
            },
            ProductRecord {
                js_jsonld: true,
                ..Default::default()
            },
            ProductRecord::failed("https://x.se", "timeout"),
        ];
        assert_eq!(
            AuditSummary::of(&records),
            AuditSummary {
                urls: 3,
                errors: 1,
                with_jsonld: 2,
                with_rating: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_urls_still_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("urls.txt");
        std::fs::write(&list, "http://127.0.0.1:9/p/1\n").unwrap();
        let args = AuditArgs {
            input: list,
            out: dir.path().join("audit.csv"),
            no_js: true,
        };
        let mut config = ScreenerConfig::default();
        config.fetch.attempts = 1;
        config.fetch.timeout_ms = 500;

        run(&args, &config).await.unwrap();
        let text = std::fs::read_to_string(&args.out).unwrap();
        assert!(text.starts_with("url,server_jsonld,"));
        assert_eq!(text.lines().count(), 2);
    }
}
