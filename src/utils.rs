//! Small helpers shared across modules: text cleanup, log truncation,
//! selector compilation and output directory checks.

use crate::error::PipelineError;
use scraper::Selector;
use std::error::Error;
use std::fs as stdfs;
use std::path::Path;
use tokio::fs;
use tracing::info;
use url::Url;

/// Truncate a string for logging purposes.
///
/// Long strings are cut at a char boundary at or below `max` bytes and get a
/// `"…(+N bytes)"` suffix.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Collapse runs of whitespace (including full-width spaces) to single spaces and trim.
pub fn normalize_whitespace(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c == '\u{3000}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased host used as the pacing key; empty for host-less URLs.
pub fn host_key(url: &Url) -> String {
    url.host_str().unwrap_or_default().to_ascii_lowercase()
}

pub fn parse_selector(css: &str) -> Result<Selector, PipelineError> {
    Selector::parse(css).map_err(|e| PipelineError::config(format!("invalid selector {css:?}: {e}")))
}

pub fn parse_selectors(list: &[String]) -> Result<Vec<Selector>, PipelineError> {
    list.iter().map(|css| parse_selector(css)).collect()
}

/// Parse a leading integer from an HTML dimension attribute (`"640"`, `"640px"`).
/// Percentages and empty values yield `None`.
pub fn parse_dimension(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.ends_with('%') {
        return None;
    }
    let digits: String = raw.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Create `path` if needed and check a file can be written into it.
pub async fn ensure_writable_dir(path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
    let path = path.as_ref();
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!(path = %path.display(), "Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
