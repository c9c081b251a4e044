//! Command-line interface definitions for Mobile News Ingest.
//!
//! Every option can also come from an environment variable. Values given here
//! override the ones in the config file.

use clap::Parser;
use mobile_news_ingest::config::PipelineConfig;

/// Command-line arguments for the ingest run.
///
/// # Examples
///
/// ```sh
/// # Defaults: ./config.yaml, report under ./reports
/// mobile_news_ingest
///
/// # Custom config, smaller run
/// mobile_news_ingest -c site.yaml -o /var/lib/ingest --fetch-limit 5 --concurrency 2
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML config file; built-in defaults are used if it is missing
    #[arg(short, long, env = "INGEST_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Directory the JSON report is written under
    #[arg(short, long, env = "INGEST_OUTPUT_DIR", default_value = "reports")]
    pub output_dir: String,

    /// Maximum number of articles to fetch
    #[arg(long, env = "FETCH_LIMIT")]
    pub fetch_limit: Option<usize>,

    /// Concurrent article workers
    #[arg(long)]
    pub concurrency: Option<usize>,
}

impl Cli {
    /// Apply command-line overrides on top of a loaded config.
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(limit) = self.fetch_limit {
            config.fetch_limit = limit;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["mobile_news_ingest"]);
        assert_eq!(cli.config, "config.yaml");
        assert_eq!(cli.output_dir, "reports");
        assert_eq!(cli.fetch_limit, None);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(["mobile_news_ingest", "-c", "/etc/ingest.yaml", "-o", "/tmp/reports"]);
        assert_eq!(cli.config, "/etc/ingest.yaml");
        assert_eq!(cli.output_dir, "/tmp/reports");
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let cli = Cli::parse_from(["mobile_news_ingest", "--fetch-limit", "4", "--concurrency", "2"]);
        let mut config = PipelineConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.fetch_limit, 4);
        assert_eq!(config.concurrency, 2);
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let cli = Cli::parse_from(["mobile_news_ingest"]);
        let mut config = PipelineConfig {
            fetch_limit: 7,
            ..PipelineConfig::default()
        };
        cli.apply(&mut config);
        assert_eq!(config.fetch_limit, 7);
    }
}
