// Copyright 2026 LAR Screener Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(
    name = "lar",
    about = "LAR screener: audit retailer product pages and score them",
    version,
    after_help = "Typical run: lar discover → lar audit → lar lar.\nRun 'lar <command> --help' for details on each command."
)]
struct Cli {
    /// Print results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress progress bars and summaries
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (JSON); defaults to $LAR_CONFIG, then ./.lar/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find audit URLs for every intent via peer sitemaps or on-site search
    Discover(cli::discover_cmd::DiscoverArgs),
    /// Audit product pages and write the audit report
    Audit(cli::audit_cmd::AuditArgs),
    /// Compute per-domain LAR and attribution from an audit report
    Lar(cli::lar_cmd::LarArgs),
    /// Re-check ratings of audited pages and append snapshots
    Monitor(cli::monitor_cmd::MonitorArgs),
    /// Summarise rating trends from monitor snapshots
    Trends(cli::monitor_cmd::TrendsArgs),
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli::output::set_mode(cli.quiet, cli.json);
    cli::output::init_logging(cli.verbose, cli.quiet, cli.json_logs);

    let result = match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "lar", &mut std::io::stdout());
            Ok(())
        }
        command => run_command(command, cli.config.as_deref()).await,
    };

    // 0 = success, 1 = error
    if let Err(e) = &result {
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        } else {
            eprintln!("Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}

async fn run_command(command: Commands, config: Option<&std::path::Path>) -> Result<()> {
    let config = cli::load_config(config)?;
    match command {
        Commands::Discover(args) => cli::discover_cmd::run(&args, &config).await,
        Commands::Audit(args) => cli::audit_cmd::run(&args, &config).await,
        Commands::Lar(args) => cli::lar_cmd::run(&args, &config),
        Commands::Monitor(args) => cli::monitor_cmd::run(&args, &config).await,
        Commands::Trends(args) => cli::monitor_cmd::run_trends(&args),
        Commands::Completions { .. } => Ok(()),
    }
}
