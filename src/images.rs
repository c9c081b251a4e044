//! Filter-then-rank selection of an article's representative images.
//!
//! Selection runs in four steps over the extractor's raw candidates:
//!
//! 1. **Hard exclusion**: URL path tokens (icon, logo, banner, tracking pixel),
//!    standard ad slot sizes, declared sizes under the minimum, and any
//!    placement outside the article body.
//! 2. **Probing**: candidates with no known size get a bounded number of
//!    header probes; probed sizes face the same minimum-size rule.
//! 3. **Aspect band**: known ratios outside `[min_aspect_ratio, max_aspect_ratio]` go.
//! 4. **Ranking**: a pure weighted score (resolution, ratio closeness,
//!    position). The best `max_images` are kept and returned in document order.

use crate::config::ImageConfig;
use crate::error::PipelineError;
use crate::models::{Article, BodySegment, DomContext, ImageCandidate};
use crate::probe::ImageProbe;
use itertools::Itertools;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, instrument};
use url::Url;

/// Why a candidate was dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum Exclusion {
    Pattern(String),
    AdSize(u32, u32),
    TooSmall(u32, u32),
    Placement(DomContext),
    AspectRatio(f64),
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusion::Pattern(p) => write!(f, "url matches {p:?}"),
            Exclusion::AdSize(w, h) => write!(f, "ad slot size {w}x{h}"),
            Exclusion::TooSmall(w, h) => write!(f, "too small ({w}x{h})"),
            Exclusion::Placement(ctx) => write!(f, "placed in {ctx:?}"),
            Exclusion::AspectRatio(r) => write!(f, "aspect ratio {r:.2} out of band"),
        }
    }
}

/// Match `token` as a whole word of a URL path: a letter edge may not touch
/// another letter, a digit edge may not touch another digit. A word token also
/// matches its plural (`icons/`).
fn token_regex(token: &str) -> Result<Regex, regex::Error> {
    fn edge(c: Option<char>) -> &'static str {
        match c {
            Some(c) if c.is_ascii_alphabetic() => "[^a-z]",
            Some(c) if c.is_ascii_digit() => "[^0-9]",
            _ => "",
        }
    }
    let (lead, trail) = (edge(token.chars().next()), edge(token.chars().last()));
    let mut pattern = String::new();
    if !lead.is_empty() {
        pattern.push_str(&format!("(?:^|{lead})"));
    }
    pattern.push_str(&regex::escape(token));
    if !trail.is_empty() {
        if trail == "[^a-z]" {
            pattern.push_str("s?");
        }
        pattern.push_str(&format!("(?:{trail}|$)"));
    }
    Regex::new(&pattern)
}

#[derive(Debug, Clone)]
pub struct ImageSelector {
    config: ImageConfig,
    patterns: Vec<(String, Regex)>,
}

impl ImageSelector {
    /// Compile the exclusion tokens of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] if a token cannot be compiled.
    pub fn new(config: &ImageConfig) -> Result<Self, PipelineError> {
        let patterns = config
            .excluded_patterns
            .iter()
            .map(|p| {
                let token = p.to_lowercase();
                token_regex(&token)
                    .map(|re| (token, re))
                    .map_err(|e| PipelineError::config(format!("invalid image pattern {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config: config.clone(),
            patterns,
        })
    }

    /// Disqualifying checks that do not depend on the aspect ratio.
    pub fn hard_exclusion(&self, candidate: &ImageCandidate) -> Option<Exclusion> {
        if !candidate.context.is_body() {
            return Some(Exclusion::Placement(candidate.context));
        }

        let path = Url::parse(&candidate.url)
            .map(|u| u.path().to_lowercase())
            .unwrap_or_else(|_| candidate.url.to_lowercase());
        if let Some((token, _)) = self.patterns.iter().find(|(_, re)| re.is_match(&path)) {
            return Some(Exclusion::Pattern(token.clone()));
        }

        let (w, h) = candidate.dimensions()?;
        if self.config.ad_sizes.contains(&[w, h]) {
            return Some(Exclusion::AdSize(w, h));
        }
        if w < self.config.min_dimension || h < self.config.min_dimension {
            return Some(Exclusion::TooSmall(w, h));
        }
        None
    }

    pub fn aspect_exclusion(&self, candidate: &ImageCandidate) -> Option<Exclusion> {
        let ratio = candidate.aspect_ratio?;
        if ratio < self.config.min_aspect_ratio || ratio > self.config.max_aspect_ratio {
            Some(Exclusion::AspectRatio(ratio))
        } else {
            None
        }
    }

    /// Weighted quality score in `[0, sum of weights]`. `count` is the number of
    /// candidates on the page, used to normalise position.
    pub fn score(&self, candidate: &ImageCandidate, count: usize) -> f64 {
        let c = &self.config;

        let resolution = match candidate.dimensions() {
            Some((w, h)) => {
                let pixels = (u64::from(w) * u64::from(h)).min(c.resolution_cap);
                (pixels as f64 / c.resolution_cap as f64).sqrt()
            }
            None => c.neutral_score,
        };

        let shape = match candidate.aspect_ratio {
            Some(r) if r > 0.0 => (-(r / c.ideal_aspect_ratio).ln().abs()).exp(),
            _ => c.neutral_score,
        };

        let position = if count == 0 {
            1.0
        } else {
            1.0 - candidate.position as f64 / count as f64
        };

        c.resolution_weight * resolution + c.aspect_weight * shape + c.position_weight * position
    }

    /// Score, keep the best `max_images` (ties go to the earlier image), and
    /// return them in document order.
    pub fn rank(&self, candidates: Vec<ImageCandidate>, count: usize) -> Vec<ImageCandidate> {
        let mut scored: Vec<ImageCandidate> = candidates
            .into_iter()
            .map(|mut c| {
                c.score = Some(self.score(&c, count));
                c
            })
            .collect();

        scored.sort_by(|a, b| {
            let (sa, sb) = (a.score.unwrap_or_default(), b.score.unwrap_or_default());
            sb.total_cmp(&sa).then(a.position.cmp(&b.position))
        });
        scored.truncate(self.config.max_images);
        scored.sort_by_key(|c| c.position);
        scored
    }

    /// Run the full selection over `article.candidates`.
    ///
    /// Duplicate URLs collapse to their first occurrence. Candidates without a
    /// known size are probed, at most `max_probes` of them, and must then pass
    /// the hard exclusion rules again before ranking.
    ///
    /// # Arguments
    ///
    /// * `article` - Extracted article; `images` and the `selected` flags of
    ///   its body image segments are overwritten.
    /// * `probe` - Dimension source for candidates the markup did not size.
    #[instrument(level = "debug", skip_all, fields(url = %article.source_url))]
    pub async fn select<P: ImageProbe>(&self, article: &mut Article, probe: &P) {
        let count = article.candidates.len();
        let mut survivors = Vec::new();

        for candidate in article.candidates.iter().unique_by(|c| c.url.clone()) {
            match self.hard_exclusion(candidate) {
                Some(why) => debug!(url = %candidate.url, %why, "image excluded"),
                None => survivors.push(candidate.clone()),
            }
        }

        if self.config.probe {
            let mut probes = 0;
            for candidate in survivors.iter_mut().filter(|c| c.dimensions().is_none()) {
                if probes == self.config.max_probes {
                    debug!(limit = probes, "probe budget spent");
                    break;
                }
                probes += 1;
                if let Some((w, h)) = probe.dimensions(&candidate.url).await {
                    candidate.set_dimensions(w, h);
                }
            }
            survivors.retain(|c| match self.hard_exclusion(c) {
                Some(why) => {
                    debug!(url = %c.url, %why, "probed image excluded");
                    false
                }
                None => true,
            });
        }

        survivors.retain(|c| match self.aspect_exclusion(c) {
            Some(why) => {
                debug!(url = %c.url, %why, "image excluded");
                false
            }
            None => true,
        });

        let selected = self.rank(survivors, count);
        let kept: HashSet<usize> = selected.iter().map(|c| c.position).collect();
        for segment in &mut article.body {
            if let BodySegment::Image {
                candidate,
                selected: flag,
                ..
            } = segment
            {
                *flag = kept.contains(candidate);
            }
        }

        info!(candidates = count, selected = selected.len(), "images selected");
        article.images = selected;
    }
}
