//! Article markup to structured content.
//!
//! Site-specific knowledge lives in [`ExtractionRules`], a declarative set of
//! CSS matchers compiled from [`ExtractionConfig`]. The traversal itself is
//! site-agnostic:
//!
//! 1. Title from the first matching title selector, else `og:title`, else
//!    `<title>` with the site-name suffix removed.
//! 2. Main region from the content selectors, else the element with the most
//!    direct paragraph-like children outside excluded and marked regions.
//! 3. Document-order walk of the region emitting text and image segments.
//!    Excluded subtrees are skipped; header/footer/navigation subtrees only
//!    contribute image candidates, tagged with that context.

use crate::config::ExtractionConfig;
use crate::error::{ArticleError, PipelineError};
use crate::models::{Article, ArticleStatus, BodySegment, DomContext, ImageCandidate};
use crate::utils::{normalize_whitespace, parse_dimension, parse_selectors};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashSet;
use tracing::{debug, instrument};
use url::Url;

/// Container tags that end the current text segment.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "dd", "div", "dl", "dt", "figcaption", "footer", "header", "li",
    "main", "ol", "section", "table", "td", "th", "tr", "ul",
];

/// Lazy-loading attributes checked before `src`.
const IMAGE_SOURCE_ATTRS: &[&str] = &["data-original", "data-src", "data-lazy-src", "data-actualsrc", "src"];

static OG_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).expect("valid selector"));

static DOCUMENT_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("valid selector"));

/// `640x480` style size token in an image file name.
static FILENAME_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[^0-9])(\d{2,4})[x×*](\d{2,4})(?:[^0-9]|$)").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct ExtractionRules {
    title: Vec<Selector>,
    title_separators: Vec<String>,
    content: Vec<Selector>,
    excluded: Vec<Selector>,
    header: Vec<Selector>,
    footer: Vec<Selector>,
    navigation: Vec<Selector>,
    paragraph_tags: HashSet<String>,
}

fn matches_any(selectors: &[Selector], el: &ElementRef) -> bool {
    selectors.iter().any(|s| s.matches(el))
}

impl ExtractionRules {
    pub fn compile(config: &ExtractionConfig) -> Result<Self, PipelineError> {
        if config.paragraph_tags.is_empty() {
            return Err(PipelineError::config("extraction.paragraph_tags is empty"));
        }
        Ok(Self {
            title: parse_selectors(&config.title_selectors)?,
            title_separators: config.title_separators.clone(),
            content: parse_selectors(&config.content_selectors)?,
            excluded: parse_selectors(&config.excluded_selectors)?,
            header: parse_selectors(&config.header_selectors)?,
            footer: parse_selectors(&config.footer_selectors)?,
            navigation: parse_selectors(&config.navigation_selectors)?,
            paragraph_tags: config.paragraph_tags.iter().map(|t| t.to_ascii_lowercase()).collect(),
        })
    }

    fn is_excluded(&self, el: &ElementRef) -> bool {
        matches_any(&self.excluded, el)
    }

    /// Context marker carried by the element itself, if any.
    fn marker(&self, el: &ElementRef) -> Option<DomContext> {
        if matches_any(&self.navigation, el) {
            Some(DomContext::Navigation)
        } else if matches_any(&self.footer, el) {
            Some(DomContext::Footer)
        } else if matches_any(&self.header, el) {
            Some(DomContext::Header)
        } else {
            None
        }
    }

    /// Context of an element from its nearest marked ancestor-or-self.
    fn context_of(&self, el: ElementRef) -> DomContext {
        std::iter::once(el)
            .chain(el.ancestors().filter_map(ElementRef::wrap))
            .find_map(|e| self.marker(&e))
            .unwrap_or(DomContext::Body)
    }

    /// True when the element or an ancestor is excluded or context-marked.
    fn outside_body(&self, el: ElementRef) -> bool {
        std::iter::once(el)
            .chain(el.ancestors().filter_map(ElementRef::wrap))
            .any(|e| self.is_excluded(&e) || self.marker(&e).is_some())
    }

    fn is_paragraph(&self, el: &ElementRef) -> bool {
        self.paragraph_tags.contains(el.value().name())
    }

    fn is_block(&self, name: &str) -> bool {
        self.paragraph_tags.contains(name) || BLOCK_TAGS.contains(&name)
    }

    fn strip_site_suffix(&self, title: &str) -> String {
        let cut = self
            .title_separators
            .iter()
            .filter_map(|sep| title.find(sep.as_str()))
            .filter(|&idx| idx > 0)
            .min();
        let head = cut.map_or(title, |idx| &title[..idx]);
        normalize_whitespace(head)
    }
}

/// Parses article markup into an [`Article`] with raw image candidates.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    rules: ExtractionRules,
}

impl ContentExtractor {
    pub fn new(rules: ExtractionRules) -> Self {
        Self { rules }
    }

    pub fn from_config(config: &ExtractionConfig) -> Result<Self, PipelineError> {
        Ok(Self::new(ExtractionRules::compile(config)?))
    }

    /// Extract an article. Missing title or body text yields status
    /// [`ArticleStatus::Failed`] with an `ExtractionEmptyError` reason.
    #[instrument(level = "debug", skip_all, fields(%source))]
    pub fn extract(&self, html: &str, source: &Url) -> Article {
        let document = Html::parse_document(html);
        let title_el = self.find_title_element(&document);
        let title = title_el
            .map(|el| normalize_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())
            .or_else(|| self.fallback_title(&document))
            .unwrap_or_default();

        let mut walker = Walker {
            rules: &self.rules,
            base: source,
            skip: title_el,
            body: Vec::new(),
            candidates: Vec::new(),
            buf: String::new(),
        };
        if let Some(region) = self.main_region(&document) {
            debug!(tag = region.value().name(), "main region selected");
            walker.walk(region, false);
            walker.flush();
        }
        let Walker { body, candidates, .. } = walker;

        let has_text = body.iter().any(|s| matches!(s, BodySegment::Text { .. }));
        let missing = if title.is_empty() {
            Some("title")
        } else if !has_text {
            Some("body text")
        } else {
            None
        };

        let (status, reason) = match missing {
            Some(missing) => (
                ArticleStatus::Failed,
                Some(ArticleError::ExtractionEmpty { missing }.to_string()),
            ),
            None => (ArticleStatus::Complete, None),
        };

        debug!(
            title = %title,
            segments = body.len(),
            candidates = candidates.len(),
            ?status,
            "extraction finished"
        );

        Article {
            source_url: source.to_string(),
            title,
            body,
            images: Vec::new(),
            candidates,
            status,
            reason,
        }
    }

    fn find_title_element<'d>(&self, document: &'d Html) -> Option<ElementRef<'d>> {
        self.rules.title.iter().find_map(|sel| {
            document.select(sel).find(|el| {
                !self.rules.outside_body(*el) && !normalize_whitespace(&el.text().collect::<String>()).is_empty()
            })
        })
    }

    fn fallback_title(&self, document: &Html) -> Option<String> {
        let og = document
            .select(&OG_TITLE)
            .next()
            .and_then(|m| m.value().attr("content"))
            .map(normalize_whitespace)
            .filter(|t| !t.is_empty());
        og.or_else(|| {
            document
                .select(&DOCUMENT_TITLE)
                .next()
                .map(|t| self.rules.strip_site_suffix(&t.text().collect::<String>()))
                .filter(|t| !t.is_empty())
        })
    }

    /// Paragraph-like direct children that carry text or an image.
    fn paragraph_weight(&self, el: ElementRef) -> (usize, usize) {
        el.children()
            .filter_map(ElementRef::wrap)
            .filter(|c| self.rules.is_paragraph(c) && !self.rules.is_excluded(c))
            .map(|c| {
                let chars = normalize_whitespace(&c.text().collect::<String>()).chars().count();
                let has_img = c.descendants().filter_map(ElementRef::wrap).any(|d| d.value().name() == "img");
                (chars, has_img)
            })
            .filter(|(chars, has_img)| *chars > 0 || *has_img)
            .fold((0, 0), |(count, total), (chars, _)| (count + 1, total + chars))
    }

    fn main_region<'d>(&self, document: &'d Html) -> Option<ElementRef<'d>> {
        for sel in &self.rules.content {
            let best = document
                .select(sel)
                .filter(|el| !self.rules.outside_body(*el))
                .map(|el| (self.paragraph_weight(el), el))
                .filter(|((count, _), _)| *count > 0)
                .max_by(|(a, _), (b, _)| a.cmp(b).then(std::cmp::Ordering::Greater));
            if let Some((_, el)) = best {
                return Some(el);
            }
        }

        // Heuristic: most paragraph children, then most text; first in document order on ties.
        let root = document.root_element();
        std::iter::once(root)
            .chain(root.descendants().filter_map(ElementRef::wrap))
            .filter(|el| !self.rules.outside_body(*el))
            .map(|el| (self.paragraph_weight(el), el))
            .filter(|((count, _), _)| *count > 0)
            .max_by(|(a, _), (b, _)| a.cmp(b).then(std::cmp::Ordering::Greater))
            .map(|(_, el)| el)
    }
}

struct Walker<'r, 'd> {
    rules: &'r ExtractionRules,
    base: &'r Url,
    /// The title element, already consumed.
    skip: Option<ElementRef<'d>>,
    body: Vec<BodySegment>,
    candidates: Vec<ImageCandidate>,
    buf: String,
}

impl<'d> Walker<'_, 'd> {
    fn walk(&mut self, el: ElementRef<'d>, suppress_text: bool) {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => {
                    if !suppress_text {
                        self.buf.push_str(text);
                    }
                }
                Node::Element(element) => {
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    if Some(child_el) == self.skip {
                        self.flush();
                        continue;
                    }
                    if self.rules.is_excluded(&child_el) {
                        continue;
                    }
                    let name = element.name();
                    match name {
                        "img" => {
                            self.flush();
                            self.push_image(child_el);
                        }
                        "br" => self.flush(),
                        _ => {
                            let marked = self.rules.marker(&child_el).is_some();
                            let block = marked || self.rules.is_block(name);
                            if block {
                                self.flush();
                            }
                            self.walk(child_el, suppress_text || marked);
                            if block {
                                self.flush();
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn flush(&mut self) {
        let text = normalize_whitespace(&self.buf);
        self.buf.clear();
        if !text.is_empty() {
            self.body.push(BodySegment::Text { text });
        }
    }

    fn push_image(&mut self, img: ElementRef<'d>) {
        let attrs = img.value();
        let Some(url) = IMAGE_SOURCE_ATTRS
            .iter()
            .filter_map(|a| attrs.attr(a))
            .map(str::trim)
            .find(|src| !src.is_empty() && !src.starts_with("data:"))
            .and_then(|src| self.base.join(src).ok())
        else {
            return;
        };

        let position = self.candidates.len();
        let mut candidate = ImageCandidate::new(url.as_str(), position, self.rules.context_of(img));
        candidate.alt = attrs.attr("alt").map(normalize_whitespace).filter(|a| !a.is_empty());

        let declared = attrs
            .attr("width")
            .and_then(parse_dimension)
            .zip(attrs.attr("height").and_then(parse_dimension));
        if let Some((w, h)) = declared.or_else(|| dimensions_from_filename(&url)) {
            candidate.set_dimensions(w, h);
        }

        self.body.push(BodySegment::Image {
            url: candidate.url.clone(),
            candidate: position,
            selected: false,
        });
        self.candidates.push(candidate);
    }
}

/// Size token in the last path segment, e.g. `photo_640x480.jpg`.
/// Directory tokens are ignored; CDNs use them for bounding boxes, not real sizes.
pub fn dimensions_from_filename(url: &Url) -> Option<(u32, u32)> {
    let file = url.path_segments()?.next_back()?;
    let caps = FILENAME_SIZE.captures(file)?;
    let w = caps.get(1)?.as_str().parse().ok()?;
    let h = caps.get(2)?.as_str().parse().ok()?;
    Some((w, h))
}
