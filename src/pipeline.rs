//! Run orchestration: collect links, then fetch, extract and select images
//! for each link on a bounded set of concurrent workers.
//!
//! ## Flow
//!
//! 1. Listing pages are fetched one at a time until `fetch_limit` links are known
//! 2. Links are dispatched to `concurrency` workers (`buffer_unordered`)
//! 3. Each worker: fetch → decode → extract → select images → classify status
//! 4. Entries are re-sorted by discovery index before the report is returned
//!
//! A worker's failure becomes a [`FailureReport`] entry and never touches other
//! workers. Once the optional deadline passes, links not yet dispatched are
//! reported as `PipelineDeadlineExceeded`; in-flight ones run to completion.

use crate::config::PipelineConfig;
use crate::error::{ArticleError, PipelineError};
use crate::extract::ContentExtractor;
use crate::fetcher::{ArticleFetcher, RetryPolicy};
use crate::identity::IdentityPool;
use crate::images::ImageSelector;
use crate::links::{LinkCollector, LinkRules};
use crate::models::{ArticleLink, ArticleStatus, FailureReport, Outcome, PipelineReport, ReportEntry};
use crate::pacing::HostPacer;
use crate::probe::{HttpImageProbe, ImageProbe, NoProbe};
use crate::redirect::{RedirectGuard, SitePatterns};
use crate::transport::{HttpTransport, ReqwestTransport};
use chrono::Local;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

const NO_IMAGE_REASON: &str = "no candidate image passed selection";

/// Build a reqwest-backed pipeline from `config` and run it once.
///
/// # Arguments
///
/// * `config` - Validated before any request is made.
///
/// # Returns
///
/// One report entry per discovered link, in discovery order. Per-article
/// failures are entries; only configuration problems and an empty link set
/// are errors.
pub async fn run(config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
    config.validate()?;
    let transport = ReqwestTransport::new(config.request_timeout())
        .map_err(|e| PipelineError::config(format!("cannot build HTTP client: {e}")))?;
    Pipeline::new(config.clone(), transport)?.run().await
}

/// All compiled components of one run. Built once, so every regex and
/// selector error surfaces before the first request.
#[derive(Debug)]
pub struct Pipeline<T> {
    config: PipelineConfig,
    transport: T,
    identities: IdentityPool,
    pacer: HostPacer,
    patterns: SitePatterns,
    link_rules: LinkRules,
    extractor: ContentExtractor,
    selector: ImageSelector,
    policy: RetryPolicy,
}

impl<T: HttpTransport> Pipeline<T> {
    pub fn new(config: PipelineConfig, transport: T) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            identities: IdentityPool::new(config.identities.clone())?,
            pacer: HostPacer::new(config.pacing_interval()),
            patterns: SitePatterns::from_config(&config.site)?,
            link_rules: LinkRules::from_config(&config.site)?,
            extractor: ContentExtractor::from_config(&config.extraction)?,
            selector: ImageSelector::new(&config.images)?,
            policy: RetryPolicy::from_config(&config.retry),
            transport,
            config,
        })
    }

    /// Replace the identity pool, e.g. with a seeded one.
    pub fn with_identities(mut self, identities: IdentityPool) -> Self {
        self.identities = identities;
        self
    }

    /// Run with the configured image probe.
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        if self.config.images.probe {
            let probe = HttpImageProbe::new(
                &self.transport,
                &self.pacer,
                &self.identities,
                self.config.images.probe_max_bytes,
            );
            self.run_with_probe(&probe).await
        } else {
            self.run_with_probe(&NoProbe).await
        }
    }

    #[instrument(level = "info", skip_all, fields(limit = self.config.fetch_limit, concurrency = self.config.concurrency))]
    pub async fn run_with_probe<P: ImageProbe>(&self, probe: &P) -> Result<PipelineReport, PipelineError> {
        let started = Instant::now();
        let deadline = self.config.deadline().and_then(|d| started.checked_add(d));
        let local_date = Local::now().date_naive().to_string();
        let local_time = Local::now().time().format("%H:%M:%S").to_string();

        let guard = RedirectGuard::new(
            &self.transport,
            &self.patterns,
            &self.pacer,
            self.config.site.max_redirect_hops,
        );
        let fetcher = ArticleFetcher::new(guard, &self.identities, self.policy.clone());

        let listing = self.config.listing_urls()?;
        let links = LinkCollector::new(&fetcher, &self.link_rules)
            .collect(&listing, self.config.fetch_limit)
            .await?;
        let total = links.len();
        info!(total, "dispatching article workers");

        let fetcher = &fetcher;
        let mut entries: Vec<ReportEntry> = stream::iter(links.iter().enumerate())
            .map(|(index, link)| async move {
                let outcome = if deadline.is_some_and(|d| Instant::now() >= d) {
                    warn!(index, url = %link.url, "deadline passed; not dispatching");
                    Outcome::Failure(FailureReport::new(&ArticleError::DeadlineExceeded))
                } else {
                    self.process(fetcher, link, probe).await
                };
                ReportEntry {
                    index,
                    url: link.url.to_string(),
                    outcome,
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;
        entries.sort_by_key(|e| e.index);

        let report = PipelineReport {
            local_date,
            local_time,
            entries,
        };
        info!(
            total,
            succeeded = report.succeeded(),
            failed = report.failed(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }

    /// One worker: everything that happens to a single link.
    #[instrument(level = "info", skip_all, fields(order = link.order, url = %link.url))]
    async fn process<P: ImageProbe>(&self, fetcher: &ArticleFetcher<'_, T>, link: &ArticleLink, probe: &P) -> Outcome {
        let page = match fetcher.fetch(link).await {
            Ok(page) => page,
            Err(e) => return Outcome::Failure(FailureReport::new(&e)),
        };

        let mut article = self.extractor.extract(&page.text(), &page.url);
        if article.status == ArticleStatus::Failed {
            let missing = if article.title.is_empty() { "title" } else { "body text" };
            let e = ArticleError::ExtractionEmpty { missing };
            error!(error = %e, "extraction failed");
            return Outcome::Failure(FailureReport::new(&e));
        }

        self.selector.select(&mut article, probe).await;
        if article.images.is_empty() && !article.candidates.is_empty() {
            article.status = ArticleStatus::Partial;
            article.reason = Some(NO_IMAGE_REASON.to_string());
        } else {
            article.status = ArticleStatus::Complete;
            article.reason = None;
        }
        info!(
            title = %article.title,
            chars = article.text_len(),
            images = article.images.len(),
            status = ?article.status,
            "article assembled"
        );
        Outcome::Article(article)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImageConfig, RetryConfig, SiteConfig};
    use crate::error::ErrorKind;
    use crate::models::{BodySegment, Identity};
    use crate::testing::{ScriptedTransport, Step};
    use std::time::Duration;

    const LISTING: &str = "https://m.example.com/news/";

    fn config() -> PipelineConfig {
        PipelineConfig {
            listing_pages: vec![LISTING.to_string()],
            fetch_limit: 5,
            concurrency: 2,
            pacing_interval_ms: 0,
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 100,
                max_delay_ms: 1000,
                jitter_ms: 0,
            },
            site: SiteConfig {
                mobile_hosts: vec!["m.example.com".to_string()],
                desktop_patterns: vec![r"^https?://desktop\.example\.com(?:[:/?#]|$)".to_string()],
                article_pattern: r"^https://m\.example\.com/article/\d+\.html$".to_string(),
                ..SiteConfig::default()
            },
            images: ImageConfig {
                probe: false,
                ..ImageConfig::default()
            },
            identities: vec![Identity::new("UA-A"), Identity::new("UA-B"), Identity::new("UA-C")],
            ..PipelineConfig::default()
        }
    }

    fn pipeline(config: PipelineConfig, transport: &ScriptedTransport) -> Pipeline<&ScriptedTransport> {
        let ids = IdentityPool::with_seed(config.identities.clone(), 7).unwrap();
        Pipeline::new(config, transport).unwrap().with_identities(ids)
    }

    fn listing(n: usize) -> String {
        let items: String = (1..=n)
            .map(|i| format!(r#"<li><a href="/article/{i}.html">Story {i}</a></li>"#))
            .collect();
        format!("<html><body><ul>{items}</ul></body></html>")
    }

    fn article_html(i: usize, images: &str) -> String {
        format!(
            r#"<html><head><title>Story {i}_Example</title></head><body>
            <div class="article-cont">
              <h1>Story {i}</h1>
              <p>First paragraph of story {i}.</p>
              {images}
              <p>Second paragraph of story {i}.</p>
            </div></body></html>"#
        )
    }

    fn article_url(i: usize) -> String {
        format!("https://m.example.com/article/{i}.html")
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_report_in_discovery_order() {
        let transport = ScriptedTransport::new();
        transport.html(LISTING, &listing(3));
        transport.html(
            &article_url(1),
            &article_html(1, r#"<img src="/img/a.jpg" width="600" height="400">"#),
        );
        transport.status(&article_url(2), 404);
        transport.html(
            &article_url(3),
            &article_html(3, r#"<img src="/img/icon.png" width="16" height="16">"#),
        );

        let report = pipeline(config(), &transport).run().await.unwrap();

        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.entries.iter().map(|e| e.index).collect::<Vec<_>>(), vec![0, 1, 2]);

        let first = report.entries[0].article().unwrap();
        assert_eq!(first.title, "Story 1");
        assert_eq!(first.status, ArticleStatus::Complete);
        assert_eq!(first.images.len(), 1);
        assert_eq!(first.images[0].url, "https://m.example.com/img/a.jpg");
        assert!(first
            .body
            .iter()
            .any(|s| matches!(s, BodySegment::Image { selected: true, .. })));

        let missing = report.entries[1].failure().unwrap();
        assert_eq!(missing.kind, ErrorKind::NotFound);
        assert_eq!(transport.calls_to(&article_url(2)), 1);

        let third = report.entries[2].article().unwrap();
        assert_eq!(third.status, ArticleStatus::Partial);
        assert_eq!(third.reason.as_deref(), Some(NO_IMAGE_REASON));

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_workers_respect_host_pacing() {
        let transport = ScriptedTransport::new();
        transport.html(LISTING, &listing(4));
        for i in 1..=4 {
            transport.html(&article_url(i), &article_html(i, ""));
        }
        let cfg = PipelineConfig {
            concurrency: 2,
            pacing_interval_ms: 1000,
            ..config()
        };

        let report = pipeline(cfg, &transport).run().await.unwrap();
        assert_eq!(report.succeeded(), 4);

        let times = transport.call_times();
        assert_eq!(times.len(), 5);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000), "{:?}", pair[1] - pair[0]);
        }
    }

    #[test]
    fn test_oversized_deadline_is_configuration_error() {
        let cfg = PipelineConfig {
            deadline_secs: Some(u64::MAX),
            ..config()
        };
        let err = Pipeline::new(cfg, &ScriptedTransport::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_limit_bounds_dispatch() {
        let transport = ScriptedTransport::new();
        transport.html(LISTING, &listing(3));
        for i in 1..=3 {
            transport.html(&article_url(i), &article_html(i, ""));
        }
        let cfg = PipelineConfig {
            fetch_limit: 2,
            ..config()
        };

        let report = pipeline(cfg, &transport).run().await.unwrap();

        let urls: Vec<&str> = report.entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec![article_url(1), article_url(2)]);
        assert_eq!(transport.calls_to(&article_url(3)), 0);
        assert!(report.entries.iter().all(|e| e.article().map(|a| a.status) == Some(ArticleStatus::Complete)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_desktop_redirect_then_mobile_succeeds() {
        let transport = ScriptedTransport::new();
        transport.html(LISTING, &listing(1));
        transport
            .redirect(&article_url(1), "https://desktop.example.com/article/1.html")
            .html(&article_url(1), &article_html(1, ""));

        let report = pipeline(config(), &transport).run().await.unwrap();

        assert!(report.entries[0].article().is_some());
        assert_eq!(transport.calls_to(&article_url(1)), 2);
        let agents: Vec<String> = transport
            .calls()
            .into_iter()
            .filter(|(u, _)| u == &article_url(1))
            .map(|(_, ua)| ua)
            .collect();
        assert_ne!(agents[0], agents[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_desktop_redirect_is_reported() {
        let transport = ScriptedTransport::new();
        transport.html(LISTING, &listing(1));
        transport.redirect(&article_url(1), "https://desktop.example.com/article/1.html");

        let report = pipeline(config(), &transport).run().await.unwrap();

        let failure = report.entries[0].failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::DesktopRedirectPersists);
        assert_eq!(transport.calls_to(&article_url(1)), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_dispatch_but_lets_inflight_finish() {
        let transport = ScriptedTransport::new();
        transport.html(LISTING, &listing(5));
        for i in 1..=5 {
            let page = crate::testing::response(
                &article_url(i),
                200,
                &[("content-type", "text/html; charset=utf-8")],
                &article_html(i, ""),
            );
            let step = if matches!(i, 2 | 3) {
                Step::Delay(Duration::from_secs(2), Box::new(Step::Respond(page)))
            } else {
                Step::Respond(page)
            };
            transport.push(&article_url(i), step);
        }
        let cfg = PipelineConfig {
            deadline_secs: Some(1),
            ..config()
        };

        let report = pipeline(cfg, &transport).run().await.unwrap();

        assert_eq!(report.entries.len(), 5);
        let attempted: Vec<usize> = report
            .entries
            .iter()
            .filter(|e| e.article().is_some())
            .map(|e| e.index)
            .collect();
        assert_eq!(attempted, vec![0, 1, 2]);
        let expired: Vec<usize> = report
            .entries
            .iter()
            .filter(|e| e.failure().map(|f| f.kind) == Some(ErrorKind::PipelineDeadlineExceeded))
            .map(|e| e.index)
            .collect();
        assert_eq!(expired, vec![3, 4]);
        assert_eq!(transport.calls_to(&article_url(4)), 0);
        assert_eq!(transport.calls_to(&article_url(5)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_failure_does_not_abort_run() {
        let transport = ScriptedTransport::new();
        transport.html(LISTING, &listing(2));
        transport.html(&article_url(1), "<html><body><div></div></body></html>");
        transport.html(&article_url(2), &article_html(2, ""));

        let report = pipeline(config(), &transport).run().await.unwrap();

        let failure = report.entries[0].failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::ExtractionEmpty);
        assert!(report.entries[1].article().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_links_is_fatal() {
        let transport = ScriptedTransport::new();
        transport.status(LISTING, 404);

        let err = pipeline(config(), &transport).run().await.unwrap_err();
        assert!(matches!(err, PipelineError::NoLinksAvailable { pages: 1, failed: 1 }));
    }

    #[test]
    fn test_bad_selector_is_configuration_error() {
        let mut cfg = config();
        cfg.extraction.content_selectors = vec!["div >>> [".to_string()];
        let err = Pipeline::new(cfg, &ScriptedTransport::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_empty_identity_pool_is_configuration_error() {
        let mut cfg = config();
        cfg.identities.clear();
        let err = Pipeline::new(cfg, &ScriptedTransport::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
