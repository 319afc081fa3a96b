//! `lar lar <audit.csv>`: per-domain LAR and attribution tables.

use anyhow::{Context, Result};
use clap::Args;
use lar_screener::config::ScreenerConfig;
use lar_screener::lar::{
    AttributionRow, CategoryMap, DomainResult, LarCalculator, LarInputs, LarRow, PeerTable, ScoreTable,
};
use lar_screener::report::{read_audit_report, write_rows};
use std::path::{Path, PathBuf};

use super::output;

#[derive(Args, Debug)]
pub struct LarArgs {
    /// Audit report produced by `lar audit`
    pub audit: PathBuf,

    /// Share-of-Answer table (`domain,value`); missing domains get A = 0
    #[arg(long)]
    pub soa: Option<PathBuf>,

    /// Manual sentiment table; overrides audit-derived S per domain
    #[arg(long)]
    pub sentiment: Option<PathBuf>,

    /// LAR table to write
    #[arg(long, default_value = "lar.csv")]
    pub out: PathBuf,

    /// Attribution table to write
    #[arg(long)]
    pub attribution_out: Option<PathBuf>,

    /// Average per-category LARs instead of pooling all pages
    #[arg(long)]
    pub weighted: bool,

    /// Intent table (`intent_id,category[,keywords]`)
    #[arg(long)]
    pub intents: Option<PathBuf>,

    /// Peer table (`brand,domain,categories`)
    #[arg(long)]
    pub peers: Option<PathBuf>,

    /// Discovery output (`intent_id,url`) for rows without an intent id
    #[arg(long)]
    pub urls: Option<PathBuf>,
}

fn read_optional<T>(
    path: Option<&Path>,
    read: impl FnOnce(&Path) -> Result<T, lar_screener::report::ReportError>,
) -> Result<Option<T>> {
    path.map(|p| read(p).with_context(|| format!("cannot read {}", p.display())))
        .transpose()
}

fn category_map(args: &LarArgs) -> Result<CategoryMap> {
    let mut map = match &args.intents {
        Some(path) => CategoryMap::read_intents(path)
            .with_context(|| format!("cannot read {}", path.display()))?,
        None => {
            tracing::warn!("--weighted without --intents: every page falls into one category");
            CategoryMap::default()
        }
    };
    if let Some(path) = &args.urls {
        map = map
            .with_url_intents(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
    }
    Ok(map)
}

pub fn run(args: &LarArgs, config: &ScreenerConfig) -> Result<()> {
    let records = read_audit_report(&args.audit)
        .with_context(|| format!("cannot read audit report {}", args.audit.display()))?;
    let soa = read_optional(args.soa.as_deref(), ScoreTable::read)?;
    let sentiment = read_optional(args.sentiment.as_deref(), ScoreTable::read)?;
    let peers = read_optional(args.peers.as_deref(), PeerTable::read)?;
    if soa.is_none() {
        tracing::warn!("no --soa table: A = 0 for every domain");
    }

    let calc = LarCalculator::new(config.lar.clone());
    let inputs = LarInputs {
        soa: soa.as_ref(),
        sentiment: sentiment.as_ref(),
        peers: peers.as_ref(),
    };
    let results: Vec<DomainResult> = if args.weighted {
        calc.compute_weighted(&records, inputs, &category_map(args)?)
    } else {
        calc.compute(&records, inputs)
    };

    let rows: Vec<LarRow> = results.iter().map(DomainResult::row).collect();
    write_rows(&args.out, &rows).with_context(|| format!("cannot write {}", args.out.display()))?;
    if let Some(path) = &args.attribution_out {
        let attribution: Vec<AttributionRow> = results.iter().map(|r| r.attribution(calc.config())).collect();
        write_rows(path, &attribution).with_context(|| format!("cannot write {}", path.display()))?;
    }

    let capped = results
        .iter()
        .filter(|r| r.composite.capped(calc.config().cap_epsilon))
        .count();
    if output::is_json() {
        output::print_json(&serde_json::json!({
            "domains": rows.len(),
            "capped": capped,
            "rows": rows.iter().map(|r| serde_json::json!({
                "key": r.key, "brand": r.brand, "E": r.e, "X": r.x, "A": r.a, "S": r.s, "LAR": r.lar,
            })).collect::<Vec<_>>(),
        }));
    } else if !output::is_quiet() {
        println!("  {:<28} {:>7} {:>7} {:>7} {:>7} {:>7}", "domain", "E", "X", "A", "S", "LAR");
        for row in &rows {
            println!(
                "  {:<28} {:>7.2} {:>7.2} {:>7.2} {:>7.2} {:>7.2}",
                row.key, row.e, row.x, row.a, row.s, row.lar
            );
        }
        output::summary(&format!(
            "{} domains ({capped} capped by low eligibility) → {}",
            rows.len(),
            args.out.display()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lar_command_writes_both_tables() {
        let dir = tempfile::tempdir().unwrap();
        let audit = dir.path().join("audit.csv");
        std::fs::write(
            &audit,
            "url,product_score,family_score,policy_structured,rating_value,rating_count,intent_id,error\n\
             https://www.shop.se/p/1,100,0,1,3.8,40,H1,\n\
             https://shop.se/p/2,75,0,1,3.5,40,H1,\n\
             https://down.se/p/1,0,0,0,,,,timeout\n",
        )
        .unwrap();
        let soa = dir.path().join("soa.csv");
        std::fs::write(&soa, "domain,soa\nshop.se,30\n").unwrap();

        let args = LarArgs {
            audit,
            soa: Some(soa),
            sentiment: None,
            out: dir.path().join("lar.csv"),
            attribution_out: Some(dir.path().join("attribution.csv")),
            weighted: false,
            intents: None,
            peers: None,
            urls: None,
        };
        output::set_mode(true, false);
        run(&args, &ScreenerConfig::default()).unwrap();

        let lar = std::fs::read_to_string(&args.out).unwrap();
        assert_eq!(
            lar,
            "key,brand,categories,E,X,A,S,LAR\n\
             down.se,,,0.0,0.0,0.0,0.0,0.0\n\
             shop.se,,,70.0,50.0,30.0,10.0,49.0\n"
        );
        let attribution = std::fs::read_to_string(dir.path().join("attribution.csv")).unwrap();
        assert!(attribution.starts_with("key,E contribution,X contribution,"));
        assert!(attribution.contains("LAR before cap"));
    }

    #[test]
    fn test_missing_audit_report_is_an_error() {
        let args = LarArgs {
            audit: PathBuf::from("/nonexistent/audit.csv"),
            soa: None,
            sentiment: None,
            out: PathBuf::from("/nonexistent/lar.csv"),
            attribution_out: None,
            weighted: false,
            intents: None,
            peers: None,
            urls: None,
        };
        let err = run(&args, &ScreenerConfig::default()).unwrap_err();
        assert!(format!("{err:#}").contains("cannot read audit report"));
    }
}
