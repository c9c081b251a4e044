//! Data models shared by every stage of the pipeline.
//!
//! - [`Identity`]: a mobile browser fingerprint sent with one request
//! - [`FetchResult`]: the classified outcome of one HTTP attempt
//! - [`ArticleLink`]: a discovered article URL with its discovery order
//! - [`ImageCandidate`]: an unfiltered image found during extraction
//! - [`Article`]: the pipeline's output unit
//! - [`PipelineReport`]: every link's outcome, in discovery order

use crate::error::{ArticleError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// A mobile browser identity: user agent plus the headers that accompany it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_agent: String,
    #[serde(default = "default_accept")]
    pub accept: String,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
    /// Sent as `Referer` when present.
    #[serde(default)]
    pub referer: Option<String>,
}

fn default_accept() -> String {
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8".to_string()
}

fn default_accept_language() -> String {
    "zh-CN,zh;q=0.9,ja;q=0.8,en-US;q=0.7,en;q=0.6".to_string()
}

impl Identity {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            accept: default_accept(),
            accept_language: default_accept_language(),
            referer: None,
        }
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Header pairs to attach to a request made under this identity.
    pub fn headers(&self) -> Vec<(&'static str, &str)> {
        let mut headers = vec![
            ("user-agent", self.user_agent.as_str()),
            ("accept", self.accept.as_str()),
            ("accept-language", self.accept_language.as_str()),
        ];
        if let Some(referer) = &self.referer {
            headers.push(("referer", referer.as_str()));
        }
        headers
    }
}

/// Classification of a single fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchClass {
    Ok,
    RedirectedToDesktop,
    HttpError,
    NetworkError,
    Timeout,
}

/// Outcome of one HTTP attempt, after redirect classification. Never persisted.
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Last URL requested, or the redirect target that was refused.
    pub final_url: Url,
    pub status: Option<u16>,
    pub body: Vec<u8>,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub elapsed: Duration,
    pub class: FetchClass,
    /// Human-readable note for non-ok classes.
    pub detail: Option<String>,
}

impl FetchResult {
    /// A result for an attempt that never produced a response.
    pub fn without_response(url: Url, class: FetchClass, elapsed: Duration, detail: String) -> Self {
        Self {
            final_url: url,
            status: None,
            body: Vec::new(),
            headers: HashMap::new(),
            elapsed,
            class,
            detail: Some(detail),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// A candidate article discovered on a listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleLink {
    /// Canonical URL; the dedup key.
    pub url: Url,
    pub title: Option<String>,
    /// Listing page the link was found on.
    pub source_page: Url,
    /// Discovery order across all listing pages in one run.
    pub order: usize,
}

/// Where an image sat in the page relative to the article body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomContext {
    Header,
    Body,
    Footer,
    Navigation,
}

impl DomContext {
    pub fn is_body(self) -> bool {
        self == DomContext::Body
    }
}

/// An image reference found during extraction, not yet judged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageCandidate {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub alt: Option<String>,
    pub context: DomContext,
    /// Index in document order among the article's candidates.
    pub position: usize,
    pub aspect_ratio: Option<f64>,
    pub score: Option<f64>,
}

impl ImageCandidate {
    pub fn new(url: impl Into<String>, position: usize, context: DomContext) -> Self {
        Self {
            url: url.into(),
            width: None,
            height: None,
            alt: None,
            context,
            position,
            aspect_ratio: None,
            score: None,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.set_dimensions(width, height);
        self
    }

    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = Some(width);
        self.height = Some(height);
        self.aspect_ratio = if height > 0 {
            Some(f64::from(width) / f64::from(height))
        } else {
            None
        };
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.width.zip(self.height)
    }
}

/// One piece of the article body, in source order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BodySegment {
    Text { text: String },
    Image {
        url: String,
        /// Index into the article's candidate list.
        candidate: usize,
        /// Set once the image selector keeps this candidate.
        selected: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Complete,
    Partial,
    Failed,
}

/// The pipeline's output unit.
#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub source_url: String,
    pub title: String,
    pub body: Vec<BodySegment>,
    pub images: Vec<ImageCandidate>,
    #[serde(skip)]
    pub candidates: Vec<ImageCandidate>,
    pub status: ArticleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Article {
    pub fn text_len(&self) -> usize {
        self.body
            .iter()
            .map(|s| match s {
                BodySegment::Text { text } => text.chars().count(),
                BodySegment::Image { .. } => 0,
            })
            .sum()
    }

    pub fn plain_text(&self) -> String {
        self.body
            .iter()
            .filter_map(|s| match s {
                BodySegment::Text { text } => Some(text.as_str()),
                BodySegment::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Why one link did not yield an article. The link itself is on the
/// enclosing [`ReportEntry`].
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub detail: String,
}

impl FailureReport {
    pub fn new(error: &ArticleError) -> Self {
        Self {
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Outcome {
    Article(Article),
    Failure(FailureReport),
}

/// One report line per discovered link.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub index: usize,
    pub url: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ReportEntry {
    pub fn article(&self) -> Option<&Article> {
        match &self.outcome {
            Outcome::Article(a) => Some(a),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReport> {
        match &self.outcome {
            Outcome::Article(_) => None,
            Outcome::Failure(f) => Some(f),
        }
    }
}

/// Result of a whole run, entries in discovery order.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Run date in `YYYY-MM-DD` format.
    pub local_date: String,
    pub local_time: String,
    pub entries: Vec<ReportEntry>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.article().is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }
}
