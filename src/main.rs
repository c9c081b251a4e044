//! # Mobile News Ingest
//!
//! Runs the fetch-and-extract pipeline once and writes the report as JSON.
//!
//! ## Usage
//!
//! ```sh
//! mobile_news_ingest -c config.yaml -o ./reports
//! ```
//!
//! ## Architecture
//!
//! 1. **Config**: YAML file overlaid on built-in defaults, then CLI overrides
//! 2. **Run**: link collection, then bounded concurrent article workers
//! 3. **Output**: `{output_dir}/{date}/{HHMMSS}.json`

use clap::Parser;
use mobile_news_ingest::config::PipelineConfig;
use mobile_news_ingest::outputs::json;
use mobile_news_ingest::utils::ensure_writable_dir;
use std::error::Error;
use std::path::Path;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;

use cli::Cli;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("mobile_news_ingest starting up");

    let args = Cli::parse();
    debug!(?args.config, ?args.output_dir, "Parsed CLI arguments");

    // --- Config ---
    let mut config = if Path::new(&args.config).exists() {
        let config = PipelineConfig::load(&args.config)?;
        info!(path = %args.config, "Loaded configuration");
        config
    } else {
        warn!(path = %args.config, "Config file not found; using built-in defaults");
        PipelineConfig::default()
    };
    args.apply(&mut config);
    info!(
        listing_pages = config.listing_pages.len(),
        fetch_limit = config.fetch_limit,
        concurrency = config.concurrency,
        identities = config.identities.len(),
        "Effective configuration"
    );

    // Early check: a run is wasted if the report cannot be written
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // --- Run ---
    let report = match mobile_news_ingest::run(&config).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Run aborted");
            return Err(e.into());
        }
    };

    for entry in &report.entries {
        if let Some(failure) = entry.failure() {
            warn!(index = entry.index, url = %entry.url, kind = %failure.kind, detail = %failure.detail, "Article failed");
        }
    }

    // --- Output ---
    if let Err(e) = json::write_report(&report, &args.output_dir).await {
        error!(error = %e, "Failed to write JSON report");
        return Err(e);
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        succeeded = report.succeeded(),
        failed = report.failed(),
        "Execution complete"
    );

    Ok(())
}
