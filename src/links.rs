//! Article link discovery from listing pages.
//!
//! Listing pages are fetched through the same retrying fetcher as articles.
//! Anchors are resolved against the page's base URL, rewritten from desktop to
//! mobile hosts, stripped of tracking parameters and matched against the
//! article URL pattern. Dedup is by canonical URL, first-seen order wins, and
//! collection stops as soon as the limit is reached.

use crate::config::SiteConfig;
use crate::error::PipelineError;
use crate::fetcher::ArticleFetcher;
use crate::models::ArticleLink;
use crate::transport::HttpTransport;
use crate::utils::{normalize_whitespace, parse_selector, parse_selectors};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, instrument, warn};
use url::Url;

static BASE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("base[href]").expect("valid selector"));

/// Compiled link rules for one site.
#[derive(Debug, Clone)]
pub struct LinkRules {
    article: Regex,
    anchor: Selector,
    title_selectors: Vec<Selector>,
    tracking_params: Vec<String>,
    noise_keywords: Vec<String>,
    host_rewrites: BTreeMap<String, String>,
}

impl LinkRules {
    pub fn from_config(site: &SiteConfig) -> Result<Self, PipelineError> {
        let article = Regex::new(&site.article_pattern).map_err(|e| {
            PipelineError::config(format!("invalid article pattern {:?}: {e}", site.article_pattern))
        })?;
        Ok(Self {
            article,
            anchor: parse_selector(&site.anchor_selector)?,
            title_selectors: parse_selectors(&site.link_title_selectors)?,
            tracking_params: site.tracking_params.iter().map(|p| p.to_ascii_lowercase()).collect(),
            noise_keywords: site.noise_keywords.iter().map(|k| k.to_lowercase()).collect(),
            host_rewrites: site
                .host_rewrites
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect(),
        })
    }

    fn is_tracking_param(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.tracking_params.iter().any(|p| match p.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name == *p,
        })
    }

    /// Case-insensitive noise keyword hit in the URL or title.
    pub fn is_noise(&self, url: &Url, title: Option<&str>) -> bool {
        let url = url.as_str().to_lowercase();
        let title = title.map(str::to_lowercase);
        self.noise_keywords
            .iter()
            .any(|k| url.contains(k.as_str()) || title.as_deref().is_some_and(|t| t.contains(k.as_str())))
    }

    /// Resolve, rewrite and canonicalize one `href`.
    ///
    /// Relative links are joined onto `base`, desktop hosts are rewritten to
    /// their mobile counterparts, the fragment and tracking query parameters
    /// are dropped, and the host is lowercased.
    ///
    /// # Arguments
    ///
    /// * `href` - Raw attribute value from the listing page.
    /// * `base` - URL of the page the link was found on.
    ///
    /// # Returns
    ///
    /// The canonical URL, or `None` for non-HTTP or unresolvable links.
    pub fn normalize(&self, href: &str, base: &Url) -> Option<Url> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            return None;
        }
        let mut url = base.join(href).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }

        if let Some(mobile) = url.host_str().and_then(|h| self.host_rewrites.get(&h.to_ascii_lowercase())) {
            let mobile = mobile.clone();
            url.set_host(Some(&mobile)).ok()?;
        }

        url.set_fragment(None);
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !self.is_tracking_param(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
        Some(url)
    }

    pub fn is_article(&self, url: &Url) -> bool {
        self.article.is_match(url.as_str())
    }

    fn anchor_title(&self, anchor: &ElementRef) -> Option<String> {
        let from_child = self.title_selectors.iter().find_map(|sel| {
            anchor
                .select(sel)
                .map(|el| normalize_whitespace(&el.text().collect::<String>()))
                .find(|t| !t.is_empty())
        });
        from_child
            .or_else(|| Some(normalize_whitespace(&anchor.text().collect::<String>())).filter(|t| !t.is_empty()))
            .or_else(|| anchor.value().attr("title").map(normalize_whitespace).filter(|t| !t.is_empty()))
    }
}

/// Article URLs and titles on one listing page, in document order, noise removed.
/// Not deduplicated.
pub fn extract_links(html: &str, page_url: &Url, rules: &LinkRules) -> Vec<(Url, Option<String>)> {
    let document = Html::parse_document(html);
    let base = document
        .select(&BASE_SELECTOR)
        .next()
        .and_then(|b| b.value().attr("href"))
        .and_then(|href| page_url.join(href).ok())
        .unwrap_or_else(|| page_url.clone());

    let mut found = Vec::new();
    for anchor in document.select(&rules.anchor) {
        let Some(url) = anchor.value().attr("href").and_then(|href| rules.normalize(href, &base)) else {
            continue;
        };
        if !rules.is_article(&url) {
            continue;
        }
        let title = rules.anchor_title(&anchor);
        if rules.is_noise(&url, title.as_deref()) {
            info!(%url, title = title.as_deref().unwrap_or_default(), "skipping link with noise keyword");
            continue;
        }
        found.push((url, title));
    }
    found
}

/// Ordered, deduplicated, bounded accumulation of links across listing pages.
#[derive(Debug)]
pub struct LinkSet {
    max: usize,
    seen: HashSet<String>,
    links: Vec<ArticleLink>,
}

impl LinkSet {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            seen: HashSet::new(),
            links: Vec::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.links.len() >= self.max
    }

    pub fn extend(&mut self, page: &Url, found: Vec<(Url, Option<String>)>) {
        for (url, title) in found {
            if self.is_full() {
                break;
            }
            if !self.seen.insert(url.as_str().to_string()) {
                continue;
            }
            debug!(%url, order = self.links.len(), "article link discovered");
            self.links.push(ArticleLink {
                url,
                title,
                source_page: page.clone(),
                order: self.links.len(),
            });
        }
    }

    pub fn into_links(self) -> Vec<ArticleLink> {
        self.links
    }
}

#[derive(Debug)]
pub struct LinkCollector<'a, T> {
    fetcher: &'a ArticleFetcher<'a, T>,
    rules: &'a LinkRules,
}

impl<'a, T: HttpTransport> LinkCollector<'a, T> {
    pub fn new(fetcher: &'a ArticleFetcher<'a, T>, rules: &'a LinkRules) -> Self {
        Self { fetcher, rules }
    }

    /// Fetch listing pages in order until `max` links are known.
    ///
    /// A page that fails to fetch is logged and skipped.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NoLinksAvailable`] if no page yields a single link.
    #[instrument(level = "info", skip_all, fields(pages = pages.len(), max))]
    pub async fn collect(&self, pages: &[Url], max: usize) -> Result<Vec<ArticleLink>, PipelineError> {
        let mut set = LinkSet::new(max);
        let mut failed = 0usize;

        for page in pages {
            if set.is_full() {
                debug!(%page, "link limit reached; not fetching further listing pages");
                break;
            }
            let fetched = match self.fetcher.fetch_url(page).await {
                Ok(f) => f,
                Err(e) => {
                    warn!(%page, error = %e, "listing page failed; skipping");
                    failed += 1;
                    continue;
                }
            };
            let found = extract_links(&fetched.text(), &fetched.url, self.rules);
            info!(%page, candidates = found.len(), "parsed listing page");
            set.extend(page, found);
        }

        let links = set.into_links();
        if links.is_empty() {
            return Err(PipelineError::NoLinksAvailable {
                pages: pages.len(),
                failed,
            });
        }
        info!(count = links.len(), "collected article links");
        Ok(links)
    }
}
