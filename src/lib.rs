//! # Mobile News Ingest
//!
//! Fetch-and-extract pipeline for a mobile news site. It discovers article
//! links on listing pages, fetches each article through the mobile endpoint
//! while refusing server redirects to the desktop site, parses the markup into
//! a title plus ordered body segments, and picks a small set of representative
//! images from a noisy candidate pool.
//!
//! ## Architecture
//!
//! 1. **Links** ([`links`]): listing pages → deduplicated [`models::ArticleLink`]s
//! 2. **Fetching** ([`fetcher`], [`redirect`]): retrying GETs under rotating
//!    mobile identities ([`identity`]) with per-host pacing ([`pacing`])
//! 3. **Extraction** ([`extract`]): declarative selectors → [`models::Article`]
//! 4. **Images** ([`images`], [`probe`]): filter, probe, rank
//! 5. **Report** ([`pipeline`]): one entry per link, in discovery order
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = mobile_news_ingest::config::PipelineConfig::load("config.yaml")?;
//! let report = mobile_news_ingest::run(&config).await?;
//! println!("{} articles, {} failures", report.succeeded(), report.failed());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod encoding;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod identity;
pub mod images;
pub mod links;
pub mod models;
pub mod outputs;
pub mod pacing;
pub mod pipeline;
pub mod probe;
pub mod redirect;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::{ArticleError, PipelineError};
pub use pipeline::{Pipeline, run};
