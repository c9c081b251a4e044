//! Article retrieval with bounded retry.
//!
//! Retry control flow is an explicit state machine. [`transition`] is a pure
//! function from an attempt's [`FetchResult`] to the next [`FetchState`], so
//! the policy is testable without a network; [`ArticleFetcher`] only drives it.
//!
//! # Retry Strategy
//!
//! - At most `max_attempts` round-trips per article, first attempt included
//! - Network errors, timeouts, 408, 429 and 5xx are retried
//! - A desktop redirect is retried once with a different identity; a second
//!   one is terminal ([`ArticleError::DesktopRedirectPersists`])
//! - 404/410 fail immediately ([`ArticleError::NotFound`])
//!
//! The delay between attempts follows:
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=jitter)
//! ```

use crate::config::RetryConfig;
use crate::encoding::decode_body;
use crate::error::ArticleError;
use crate::identity::IdentityPool;
use crate::models::{ArticleLink, FetchClass, FetchResult};
use crate::redirect::RedirectGuard;
use crate::transport::HttpTransport;
use rand::{Rng, rng};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// How many times a desktop redirect is tolerated before giving up.
const MAX_DESKTOP_REDIRECTS: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    /// Backoff after `attempt` completed attempts, before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exp).min(self.max_delay)
    }

    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=jitter_ms)
        };
        self.backoff(attempt) + Duration::from_millis(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    DesktopRedirect,
    Status(u16),
    Network,
    Timeout,
}

/// Outcome of classifying one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchState {
    Retrying { attempt: u32, reason: RetryReason },
    Succeeded,
    Failed(ArticleError),
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

/// Next state after attempt number `attempt` (1-based) produced `result`.
/// `desktop_redirects` counts desktop redirects seen so far, this one included.
pub fn transition(policy: &RetryPolicy, attempt: u32, desktop_redirects: u32, result: &FetchResult) -> FetchState {
    let budget_left = attempt < policy.max_attempts;
    let retry_or = |reason: RetryReason, terminal: ArticleError| {
        if budget_left {
            FetchState::Retrying { attempt, reason }
        } else {
            FetchState::Failed(terminal)
        }
    };

    match result.class {
        FetchClass::Ok => FetchState::Succeeded,
        FetchClass::RedirectedToDesktop => {
            let terminal = ArticleError::DesktopRedirectPersists {
                location: result.final_url.to_string(),
            };
            if desktop_redirects >= MAX_DESKTOP_REDIRECTS {
                FetchState::Failed(terminal)
            } else {
                retry_or(RetryReason::DesktopRedirect, terminal)
            }
        }
        FetchClass::HttpError => {
            let status = result.status.unwrap_or_default();
            let detail = result.detail.clone().unwrap_or_else(|| format!("HTTP {status}"));
            match status {
                404 | 410 => FetchState::Failed(ArticleError::NotFound { status }),
                s if is_retryable_status(s) => {
                    retry_or(RetryReason::Status(s), ArticleError::HttpStatus { status: s, detail })
                }
                s => FetchState::Failed(ArticleError::HttpStatus { status: s, detail }),
            }
        }
        FetchClass::NetworkError => retry_or(
            RetryReason::Network,
            ArticleError::Network(result.detail.clone().unwrap_or_else(|| "network error".to_string())),
        ),
        FetchClass::Timeout => retry_or(RetryReason::Timeout, ArticleError::Timeout(result.elapsed)),
    }
}

/// Markup retrieved for one URL.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: Url,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub attempts: u32,
}

impl FetchedPage {
    /// Body decoded to UTF-8 using the declared or sniffed charset.
    pub fn text(&self) -> String {
        decode_body(self.content_type.as_deref(), &self.body)
    }
}

/// Fetches one URL through the redirect guard with a fresh identity per attempt.
#[derive(Debug)]
pub struct ArticleFetcher<'a, T> {
    guard: RedirectGuard<'a, T>,
    identities: &'a IdentityPool,
    policy: RetryPolicy,
}

impl<'a, T: HttpTransport> ArticleFetcher<'a, T> {
    pub fn new(guard: RedirectGuard<'a, T>, identities: &'a IdentityPool, policy: RetryPolicy) -> Self {
        Self {
            guard,
            identities,
            policy,
        }
    }

    pub async fn fetch(&self, link: &ArticleLink) -> Result<FetchedPage, ArticleError> {
        self.fetch_url(&link.url).await
    }

    /// Fetch `url` until it succeeds or the retry policy gives up.
    ///
    /// Each attempt goes through the redirect guard with an identity drawn
    /// from the pool; after a desktop redirect the next identity is forced to
    /// differ from the one that triggered it. Retries back off per
    /// [`RetryPolicy`].
    ///
    /// # Arguments
    ///
    /// * `url` - Canonical mobile URL of the page.
    ///
    /// # Returns
    ///
    /// The final response body with its effective URL and attempt count, or
    /// the terminal [`ArticleError`] of the last attempt.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn fetch_url(&self, url: &Url) -> Result<FetchedPage, ArticleError> {
        let mut identity = self.identities.next();
        let mut attempt = 0u32;
        let mut desktop_redirects = 0u32;

        loop {
            attempt += 1;
            let result = match self.guard.fetch(url, &identity).await {
                Ok(r) => r,
                Err(e) => {
                    error!(attempt, error = %e, "fetch failed terminally");
                    return Err(e);
                }
            };
            if result.class == FetchClass::RedirectedToDesktop {
                desktop_redirects += 1;
            }

            let next = transition(&self.policy, attempt, desktop_redirects, &result);
            debug!(attempt, class = ?result.class, status = ?result.status, ?next, "attempt classified");

            match next {
                FetchState::Succeeded => {
                    info!(
                        attempt,
                        bytes = result.body.len(),
                        elapsed_ms = result.elapsed.as_millis() as u64,
                        "fetched"
                    );
                    return Ok(FetchedPage {
                        content_type: result.header("content-type").map(str::to_string),
                        url: result.final_url,
                        body: result.body,
                        attempts: attempt,
                    });
                }
                FetchState::Failed(e) => {
                    error!(attempt, error = %e, "fetch failed terminally");
                    return Err(e);
                }
                FetchState::Retrying { reason, .. } => {
                    let delay = self.policy.delay_with_jitter(attempt);
                    warn!(
                        attempt,
                        max = self.policy.max_attempts,
                        ?reason,
                        ?delay,
                        detail = result.detail.as_deref().unwrap_or_default(),
                        "attempt failed; backing off"
                    );
                    sleep(delay).await;
                    identity = match reason {
                        RetryReason::DesktopRedirect => self.identities.next_excluding(&identity),
                        _ => self.identities.next(),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identity;
    use crate::pacing::HostPacer;
    use crate::redirect::SitePatterns;
    use crate::testing::ScriptedTransport;
    use crate::transport::TransportError;
    use std::collections::HashSet;

    const ARTICLE: &str = "https://m.example.com/article/1.html";

    fn patterns() -> SitePatterns {
        SitePatterns::new(vec!["m.example.com".to_string()], &[r"^https?://desktop\.example\.com/".to_string()])
            .unwrap()
    }

    fn pool() -> IdentityPool {
        IdentityPool::with_seed(vec![Identity::new("ua-one"), Identity::new("ua-two"), Identity::new("ua-three")], 11)
            .unwrap()
    }

    fn result(class: FetchClass, status: Option<u16>) -> FetchResult {
        let mut r = FetchResult::without_response(Url::parse(ARTICLE).unwrap(), class, Duration::from_millis(5), "x".into());
        r.status = status;
        r
    }

    async fn run_fetch(transport: &ScriptedTransport) -> Result<FetchedPage, ArticleError> {
        let (p, pacer, ids) = (patterns(), HostPacer::new(Duration::ZERO), pool());
        let fetcher = ArticleFetcher::new(RedirectGuard::new(transport, &p, &pacer, 3), &ids, RetryPolicy::default());
        fetcher.fetch_url(&Url::parse(ARTICLE).unwrap()).await
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(9), Duration::from_secs(30));
        assert_eq!(policy.delay_with_jitter(2), Duration::from_secs(2));
    }

    #[test]
    fn test_transition_table() {
        let policy = RetryPolicy::default();
        assert_eq!(transition(&policy, 1, 0, &result(FetchClass::Ok, Some(200))), FetchState::Succeeded);
        assert_eq!(
            transition(&policy, 1, 0, &result(FetchClass::Timeout, None)),
            FetchState::Retrying { attempt: 1, reason: RetryReason::Timeout }
        );
        assert_eq!(
            transition(&policy, 1, 0, &result(FetchClass::HttpError, Some(429))),
            FetchState::Retrying { attempt: 1, reason: RetryReason::Status(429) }
        );
        assert_eq!(
            transition(&policy, 1, 0, &result(FetchClass::HttpError, Some(404))),
            FetchState::Failed(ArticleError::NotFound { status: 404 })
        );
        assert!(matches!(
            transition(&policy, 1, 0, &result(FetchClass::HttpError, Some(403))),
            FetchState::Failed(ArticleError::HttpStatus { status: 403, .. })
        ));
        assert!(matches!(
            transition(&policy, 3, 0, &result(FetchClass::NetworkError, None)),
            FetchState::Failed(ArticleError::Network(_))
        ));
    }

    #[test]
    fn test_transition_desktop_redirect_retried_once() {
        let policy = RetryPolicy::default();
        assert_eq!(
            transition(&policy, 1, 1, &result(FetchClass::RedirectedToDesktop, Some(302))),
            FetchState::Retrying { attempt: 1, reason: RetryReason::DesktopRedirect }
        );
        assert!(matches!(
            transition(&policy, 2, 2, &result(FetchClass::RedirectedToDesktop, Some(302))),
            FetchState::Failed(ArticleError::DesktopRedirectPersists { .. })
        ));
        let single = RetryPolicy { max_attempts: 1, ..RetryPolicy::default() };
        assert!(matches!(
            transition(&single, 1, 1, &result(FetchClass::RedirectedToDesktop, Some(302))),
            FetchState::Failed(ArticleError::DesktopRedirectPersists { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_desktop_redirect_then_ok_with_new_identity() {
        let transport = ScriptedTransport::new();
        transport
            .redirect(ARTICLE, "https://desktop.example.com/article/1.html")
            .html(ARTICLE, "<h1>t</h1><p>body</p>");

        let page = run_fetch(&transport).await.unwrap();
        assert_eq!(page.attempts, 2);
        assert_eq!(page.text(), "<h1>t</h1><p>body</p>");

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].1, calls[1].1, "retry must use a different identity");
    }

    #[tokio::test(start_paused = true)]
    async fn test_desktop_redirect_twice_is_terminal() {
        let transport = ScriptedTransport::new();
        transport.redirect(ARTICLE, "https://desktop.example.com/article/1.html");

        let err = run_fetch(&transport).await.unwrap_err();
        assert!(matches!(err, ArticleError::DesktopRedirectPersists { .. }));
        assert_eq!(transport.calls_to(ARTICLE), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let transport = ScriptedTransport::new();
        transport.status(ARTICLE, 404);

        let err = run_fetch(&transport).await.unwrap_err();
        assert_eq!(err, ArticleError::NotFound { status: 404 });
        assert_eq!(transport.calls_to(ARTICLE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_exhaust_budget() {
        let transport = ScriptedTransport::new();
        transport.status(ARTICLE, 503);

        let err = run_fetch(&transport).await.unwrap_err();
        assert!(matches!(err, ArticleError::HttpStatus { status: 503, .. }));
        assert_eq!(transport.calls_to(ARTICLE), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_success() {
        let transport = ScriptedTransport::new();
        transport
            .fail(ARTICLE, TransportError::Timeout)
            .fail(ARTICLE, TransportError::Network("reset".into()))
            .html(ARTICLE, "<p>ok</p>");

        let page = run_fetch(&transport).await.unwrap();
        assert_eq!(page.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redirect_loop_is_terminal() {
        let transport = ScriptedTransport::new();
        transport.redirect(ARTICLE, ARTICLE);

        let err = run_fetch(&transport).await.unwrap_err();
        assert!(matches!(err, ArticleError::RedirectLoop { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let transport = ScriptedTransport::new();
        transport.fail(ARTICLE, TransportError::Timeout);

        let t0 = tokio::time::Instant::now();
        let err = run_fetch(&transport).await.unwrap_err();
        assert!(matches!(err, ArticleError::Timeout(_)));
        // 1s + 2s of backoff between three attempts.
        assert!(tokio::time::Instant::now() - t0 >= Duration::from_secs(3));
        let identities: HashSet<_> = transport.calls().into_iter().map(|(_, ua)| ua).collect();
        assert!(!identities.is_empty());
    }
}
