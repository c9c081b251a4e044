//! Error taxonomy for the ingest pipeline.
//!
//! Errors come in two tiers:
//! - [`PipelineError`]: fatal, aborts [`crate::run`] before or instead of producing a report.
//! - [`ArticleError`]: scoped to one article, recorded in the report and never propagated
//!   to other workers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Fatal errors. A run that hits one of these produces no report.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid or incomplete configuration, detected before any fetch.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No listing page could be fetched, or none yielded an article link.
    #[error("no article links available ({failed} of {pages} listing page(s) failed)")]
    NoLinksAvailable { pages: usize, failed: usize },
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }
}

/// Terminal outcome of one article that did not produce usable content.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArticleError {
    #[error("server kept redirecting to the desktop site ({location})")]
    DesktopRedirectPersists { location: String },

    #[error("redirect chain exceeded {hops} hop(s) at {url}")]
    RedirectLoop { hops: usize, url: String },

    #[error("article not found (HTTP {status})")]
    NotFound { status: u16 },

    #[error("HTTP {status}: {detail}")]
    HttpStatus { status: u16, detail: String },

    #[error("extraction produced no {missing}")]
    ExtractionEmpty { missing: &'static str },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("pipeline deadline exceeded before dispatch")]
    DeadlineExceeded,
}

impl ArticleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArticleError::DesktopRedirectPersists { .. } => ErrorKind::DesktopRedirectPersists,
            ArticleError::RedirectLoop { .. } => ErrorKind::RedirectLoop,
            ArticleError::NotFound { .. } => ErrorKind::NotFound,
            ArticleError::HttpStatus { .. } => ErrorKind::HttpStatus,
            ArticleError::ExtractionEmpty { .. } => ErrorKind::ExtractionEmpty,
            ArticleError::Network(_) => ErrorKind::Network,
            ArticleError::Timeout(_) => ErrorKind::Timeout,
            ArticleError::DeadlineExceeded => ErrorKind::PipelineDeadlineExceeded,
        }
    }
}

/// Machine-readable tag attached to every failure descriptor in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "DesktopRedirectPersistsError")]
    DesktopRedirectPersists,
    #[serde(rename = "RedirectLoopError")]
    RedirectLoop,
    #[serde(rename = "NotFoundError")]
    NotFound,
    #[serde(rename = "HttpStatusError")]
    HttpStatus,
    #[serde(rename = "ExtractionEmptyError")]
    ExtractionEmpty,
    #[serde(rename = "NetworkError")]
    Network,
    #[serde(rename = "TimeoutError")]
    Timeout,
    #[serde(rename = "PipelineDeadlineExceeded")]
    PipelineDeadlineExceeded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::DesktopRedirectPersists => "DesktopRedirectPersistsError",
            ErrorKind::RedirectLoop => "RedirectLoopError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::HttpStatus => "HttpStatusError",
            ErrorKind::ExtractionEmpty => "ExtractionEmptyError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::PipelineDeadlineExceeded => "PipelineDeadlineExceeded",
        };
        f.write_str(name)
    }
}
