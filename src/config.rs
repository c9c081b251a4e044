//! Pipeline configuration.
//!
//! Loaded from YAML with every field defaulted, so a config file only needs
//! to name what differs from the built-in mobile-site profile.
//!
//! ```yaml
//! listing_pages:
//!   - https://m.zol.com.cn/mobile/
//! fetch_limit: 10
//! concurrency: 3
//! pacing_interval_ms: 1500
//! images:
//!   max_images: 5
//!   min_dimension: 80
//! ```

use crate::error::PipelineError;
use crate::identity::default_identities;
use crate::models::Identity;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Upper bound for `deadline_secs`: one week.
pub const MAX_DEADLINE_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub listing_pages: Vec<String>,
    /// Maximum number of articles fetched per run.
    pub fetch_limit: usize,
    /// Concurrent article workers.
    pub concurrency: usize,
    /// Minimum gap between two requests to the same host.
    pub pacing_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// Overall run deadline; no new article is dispatched after it passes.
    pub deadline_secs: Option<u64>,
    pub retry: RetryConfig,
    pub site: SiteConfig,
    pub extraction: ExtractionConfig,
    pub images: ImageConfig,
    pub identities: Vec<Identity>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            listing_pages: vec!["https://m.zol.com.cn/mobile/".to_string()],
            fetch_limit: 10,
            concurrency: 3,
            pacing_interval_ms: 1500,
            request_timeout_secs: 15,
            deadline_secs: None,
            retry: RetryConfig::default(),
            site: SiteConfig::default(),
            extraction: ExtractionConfig::default(),
            images: ImageConfig::default(),
            identities: default_identities(),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PipelineError> {
        serde_yaml::from_str(yaml).map_err(|e| PipelineError::config(format!("invalid YAML: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn pacing_interval(&self) -> Duration {
        Duration::from_millis(self.pacing_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn listing_urls(&self) -> Result<Vec<Url>, PipelineError> {
        if self.listing_pages.is_empty() {
            return Err(PipelineError::config("no listing pages configured"));
        }
        self.listing_pages
            .iter()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|e| PipelineError::config(format!("invalid listing page URL {raw:?}: {e}")))
            })
            .collect()
    }

    /// Range checks. Regexes and selectors are checked when their owners compile them.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.listing_urls()?;
        if self.fetch_limit == 0 {
            return Err(PipelineError::config("fetch_limit must be positive"));
        }
        if self.concurrency == 0 {
            return Err(PipelineError::config("concurrency must be positive"));
        }
        if self.request_timeout_secs == 0 {
            return Err(PipelineError::config("request_timeout_secs must be positive"));
        }
        if self.deadline_secs.is_some_and(|d| d == 0 || d > MAX_DEADLINE_SECS) {
            return Err(PipelineError::config(format!(
                "deadline_secs must be between 1 and {MAX_DEADLINE_SECS}"
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::config("retry.max_attempts must be at least 1"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(PipelineError::config("retry.base_delay_ms exceeds retry.max_delay_ms"));
        }
        if self.site.mobile_hosts.is_empty() {
            return Err(PipelineError::config("site.mobile_hosts is empty"));
        }
        self.images.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Network round-trips allowed per article, first attempt included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Hosts that serve mobile content; redirects within them are followed.
    pub mobile_hosts: Vec<String>,
    /// Regexes matched against full URLs that identify the desktop site.
    pub desktop_patterns: Vec<String>,
    /// Desktop host to mobile host substitutions applied to discovered links.
    pub host_rewrites: BTreeMap<String, String>,
    /// Regex an absolute URL must match to count as an article.
    pub article_pattern: String,
    pub anchor_selector: String,
    /// Selectors tried inside an anchor for its title, in order.
    pub link_title_selectors: Vec<String>,
    /// Query parameter names (or `prefix*`) stripped during normalization.
    pub tracking_params: Vec<String>,
    /// Links whose URL or title contains one of these are skipped.
    pub noise_keywords: Vec<String>,
    pub max_redirect_hops: usize,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            mobile_hosts: vec!["m.zol.com.cn".to_string()],
            desktop_patterns: vec![
                r"^https?://(?:www|news|mobile|desktop)\.zol\.com\.cn(?:[:/?#]|$)".to_string(),
            ],
            host_rewrites: BTreeMap::from([(
                "news.zol.com.cn".to_string(),
                "m.zol.com.cn".to_string(),
            )]),
            article_pattern:
                r"^https?://[^/]*zol\.com\.cn(?:/[^?#]*)?/(?:mobile/|article/|news/|index|cell_phone/)"
                    .to_string(),
            anchor_selector: "a[href]".to_string(),
            link_title_selectors: ["h3", ".title", "h4", ".item-title", "p", "div.text"]
                .into_iter()
                .map(String::from)
                .collect(),
            tracking_params: ["utm_*", "spm", "from", "fr", "share_token", "share_from", "wx_*"]
                .into_iter()
                .map(String::from)
                .collect(),
            noise_keywords: Vec::new(),
            max_redirect_hops: 3,
        }
    }
}

/// Structural matchers for article pages, as CSS selectors.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub title_selectors: Vec<String>,
    /// Site-name separators stripped from a `<title>` fallback.
    pub title_separators: Vec<String>,
    /// Preferred main-content containers, tried before the paragraph heuristic.
    pub content_selectors: Vec<String>,
    /// Subtrees dropped entirely: scripts, ads, share widgets, comments.
    pub excluded_selectors: Vec<String>,
    pub header_selectors: Vec<String>,
    pub footer_selectors: Vec<String>,
    pub navigation_selectors: Vec<String>,
    /// Tags counted as paragraph-like and emitted as text segments.
    pub paragraph_tags: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            title_selectors: strings(&[
                "h1.article-title",
                ".article-header h1",
                ".article-title",
                "article h1",
                "h1",
            ]),
            title_separators: strings(&["_", " - ", " | "]),
            content_selectors: strings(&[
                ".article-cont",
                "#article-content",
                ".article-content",
                "article",
            ]),
            excluded_selectors: strings(&[
                "script",
                "style",
                "noscript",
                "iframe",
                "form",
                ".share",
                ".share-box",
                "[class*='share-']",
                ".ad",
                ".ads",
                "[class*='advert']",
                "[id*='advert']",
                ".comment",
                ".comments",
                "#comment",
            ]),
            header_selectors: strings(&["header", ".header", ".top-bar"]),
            footer_selectors: strings(&["footer", ".footer", ".related", ".recommend", "aside"]),
            navigation_selectors: strings(&["nav", ".nav", ".menu", ".breadcrumb"]),
            paragraph_tags: strings(&["p", "h2", "h3", "h4", "h5", "h6", "blockquote", "figure", "pre"]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub max_images: usize,
    /// Width or height below this is decorative.
    pub min_dimension: u32,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    /// Ratio that scores best on the shape component.
    pub ideal_aspect_ratio: f64,
    /// Pixel count above which resolution stops adding to the score.
    pub resolution_cap: u64,
    /// Case-insensitive tokens that disqualify an image when they appear as a
    /// whole word of its URL path (`icon` matches `icons/` and `icon-share`,
    /// not `silicon`).
    pub excluded_patterns: Vec<String>,
    /// Standard ad slot sizes, `[width, height]`.
    pub ad_sizes: Vec<[u32; 2]>,
    pub resolution_weight: f64,
    pub aspect_weight: f64,
    pub position_weight: f64,
    /// Component score used when dimensions are unknown.
    pub neutral_score: f64,
    pub probe: bool,
    pub max_probes: usize,
    pub probe_max_bytes: usize,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_images: 5,
            min_dimension: 80,
            min_aspect_ratio: 0.4,
            max_aspect_ratio: 3.0,
            ideal_aspect_ratio: 1.5,
            resolution_cap: 1_000_000,
            excluded_patterns: strings(&[
                "icon", "logo", "banner", "avatar", "pixel.gif", "pixel.png", "spacer", "blank.gif", "1x1", "loading.",
            ]),
            ad_sizes: vec![
                [1, 1],
                [728, 90],
                [468, 60],
                [320, 50],
                [300, 250],
                [160, 600],
                [120, 600],
                [970, 250],
            ],
            resolution_weight: 0.5,
            aspect_weight: 0.3,
            position_weight: 0.2,
            neutral_score: 0.5,
            probe: true,
            max_probes: 8,
            probe_max_bytes: 64 * 1024,
        }
    }
}

impl ImageConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.min_aspect_ratio > 0.0 && self.min_aspect_ratio < self.max_aspect_ratio) {
            return Err(PipelineError::config(format!(
                "invalid aspect ratio band [{}, {}]",
                self.min_aspect_ratio, self.max_aspect_ratio
            )));
        }
        if self.ideal_aspect_ratio <= 0.0 {
            return Err(PipelineError::config("ideal_aspect_ratio must be positive"));
        }
        if self.resolution_cap == 0 {
            return Err(PipelineError::config("resolution_cap must be positive"));
        }
        let weights = [self.resolution_weight, self.aspect_weight, self.position_weight];
        if weights.iter().any(|w| *w < 0.0) {
            return Err(PipelineError::config("image score weights must be non-negative"));
        }
        Ok(())
    }
}
