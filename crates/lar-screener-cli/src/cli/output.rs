//! Output mode, logging setup and progress bars.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

static QUIET: AtomicBool = AtomicBool::new(false);
static JSON: AtomicBool = AtomicBool::new(false);

pub fn set_mode(quiet: bool, json: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
    JSON.store(json, Ordering::Relaxed);
}

pub fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

pub fn is_json() -> bool {
    JSON.load(Ordering::Relaxed)
}

/// Default filter for the given verbosity; `RUST_LOG` wins when set.
pub fn default_directives(verbose: bool, quiet: bool) -> &'static str {
    if verbose {
        "lar_screener=debug,lar=debug"
    } else if quiet {
        "lar_screener=warn,lar=warn"
    } else {
        "lar_screener=info,lar=info"
    }
}

/// Install the global tracing subscriber on stderr.
pub fn init_logging(verbose: bool, quiet: bool, json_logs: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose, quiet)));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// A per-URL progress bar, hidden in quiet or JSON mode.
pub fn progress(len: usize, what: &str) -> ProgressBar {
    if is_quiet() || is_json() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template("  {spinner} {msg} [{bar:30}] {pos}/{len} ({elapsed})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar.set_message(what.to_string());
    bar
}

pub fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Error: cannot encode JSON: {e}"),
    }
}

/// One summary line on stderr unless quiet.
pub fn summary(line: &str) {
    if !is_quiet() && !is_json() {
        eprintln!("  {line}");
    }
}
