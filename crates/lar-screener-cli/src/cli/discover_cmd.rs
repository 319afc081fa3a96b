//! `lar discover`: pick an audit URL per intent × peer from sitemaps or
//! on-site search.

use anyhow::{Context, Result};
use clap::Args;
use lar_screener::acquisition::http_client::HttpFetcher;
use lar_screener::config::ScreenerConfig;
use lar_screener::discovery::{discover, DiscoveryStrategy};
use lar_screener::lar::{CategoryMap, PeerTable};
use lar_screener::report::write_rows;
use std::path::PathBuf;

use super::output;

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Peer table (`brand,domain,categories[,sitemap][,search]`)
    #[arg(long)]
    pub peers: PathBuf,

    /// Intent table (`intent_id,category,keywords`)
    #[arg(long)]
    pub intents: PathBuf,

    /// Discovery table to write; usable directly as `lar audit` input
    #[arg(long, default_value = "discovered.csv")]
    pub out: PathBuf,

    /// sitemap, search, or both (sitemap first); overrides the config
    #[arg(long)]
    pub strategy: Option<DiscoveryStrategy>,
}

pub async fn run(args: &DiscoverArgs, config: &ScreenerConfig) -> Result<()> {
    let peers = PeerTable::read(&args.peers)
        .with_context(|| format!("cannot read peers {}", args.peers.display()))?;
    let intents = CategoryMap::read_intents(&args.intents)
        .with_context(|| format!("cannot read intents {}", args.intents.display()))?;
    let mut options = config.discovery.clone();
    if let Some(strategy) = args.strategy {
        options.strategy = strategy;
    }
    tracing::info!(
        "discovering {} intents across {} peers via {}",
        intents.intents.len(),
        peers.peers.len(),
        options.strategy
    );

    let fetcher = HttpFetcher::new(&config.fetch);
    let rows = discover(
        &fetcher,
        &peers.peers,
        &intents.intents,
        config.fetch.timeout_ms,
        &options,
    )
    .await;
    write_rows(&args.out, &rows).with_context(|| format!("cannot write {}", args.out.display()))?;

    let found = rows.iter().filter(|r| r.found).count();
    if output::is_json() {
        output::print_json(&serde_json::json!({
            "pairs": rows.len(),
            "found": found,
            "out": args.out.display().to_string(),
        }));
    } else {
        output::summary(&format!(
            "found {found}/{} intent × peer URLs → {}",
            rows.len(),
            args.out.display()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_strategy_without_template_writes_unfound_rows() {
        let dir = tempfile::tempdir().unwrap();
        let peers = dir.path().join("peers.csv");
        std::fs::write(&peers, "brand,domain,categories\nNobody,www.nobody.invalid,\n").unwrap();
        let intents = dir.path().join("intents.csv");
        std::fs::write(&intents, "intent_id,category,keywords\nH1,heaters,oil radiator\n").unwrap();

        let args = DiscoverArgs {
            peers,
            intents,
            out: dir.path().join("out/discovered.csv"),
            strategy: Some(DiscoveryStrategy::Search),
        };
        output::set_mode(true, false);
        run(&args, &ScreenerConfig::default()).await.unwrap();

        let written = std::fs::read_to_string(&args.out).unwrap();
        assert_eq!(
            written,
            "intent_id,brand,domain,url,relevance_score,found\nH1,Nobody,nobody.invalid,,0.0,0\n"
        );
    }
}
