//! Redirect trap detection around a single fetch.
//!
//! The transport never follows redirects. The guard inspects each 3xx hop:
//! a `Location` on the desktop site is refused and classified
//! [`FetchClass::RedirectedToDesktop`]; a `Location` inside the mobile host set
//! is followed, up to `max_hops`; anything else is an HTTP error. A 2xx whose
//! URL is itself on the desktop site is refused as well, so desktop markup is
//! never labelled ok.

use crate::config::SiteConfig;
use crate::error::{ArticleError, PipelineError};
use crate::models::{FetchClass, FetchResult, Identity};
use crate::pacing::HostPacer;
use crate::transport::{HttpTransport, RawResponse, TransportError};
use crate::utils::host_key;
use regex::Regex;
use std::time::Instant;
use tracing::{debug, instrument, warn};
use url::Url;

/// Host and URL patterns separating the mobile site from the desktop site.
#[derive(Debug, Clone)]
pub struct SitePatterns {
    mobile_hosts: Vec<String>,
    desktop: Vec<Regex>,
}

impl SitePatterns {
    pub fn new(mobile_hosts: Vec<String>, desktop_patterns: &[String]) -> Result<Self, PipelineError> {
        let desktop = desktop_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| PipelineError::config(format!("invalid desktop pattern {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            mobile_hosts: mobile_hosts.into_iter().map(|h| h.to_ascii_lowercase()).collect(),
            desktop,
        })
    }

    pub fn from_config(site: &SiteConfig) -> Result<Self, PipelineError> {
        Self::new(site.mobile_hosts.clone(), &site.desktop_patterns)
    }

    pub fn is_desktop(&self, url: &Url) -> bool {
        self.desktop.iter().any(|re| re.is_match(url.as_str()))
    }

    pub fn is_mobile(&self, url: &Url) -> bool {
        let on_mobile_host = url
            .host_str()
            .is_some_and(|h| self.mobile_hosts.iter().any(|m| m.eq_ignore_ascii_case(h)));
        on_mobile_host && !self.is_desktop(url)
    }
}

/// Wraps one logical GET, following only mobile-to-mobile redirects.
#[derive(Debug)]
pub struct RedirectGuard<'a, T> {
    transport: &'a T,
    patterns: &'a SitePatterns,
    pacer: &'a HostPacer,
    max_hops: usize,
}

impl<'a, T: HttpTransport> RedirectGuard<'a, T> {
    pub fn new(transport: &'a T, patterns: &'a SitePatterns, pacer: &'a HostPacer, max_hops: usize) -> Self {
        Self {
            transport,
            patterns,
            pacer,
            max_hops,
        }
    }

    /// Issue the request and classify it. Only a redirect loop is an error;
    /// every other outcome is a classified [`FetchResult`].
    #[instrument(level = "debug", skip_all, fields(%url))]
    pub async fn fetch(&self, url: &Url, identity: &Identity) -> Result<FetchResult, ArticleError> {
        let started = Instant::now();
        let mut current = url.clone();
        let mut hops = 0usize;

        loop {
            self.pacer.wait(&host_key(&current)).await;

            let response = match self.transport.get(&current, identity).await {
                Ok(r) => r,
                Err(TransportError::Timeout) => {
                    return Ok(FetchResult::without_response(
                        current,
                        FetchClass::Timeout,
                        started.elapsed(),
                        "request timed out".to_string(),
                    ));
                }
                Err(TransportError::Network(msg)) => {
                    return Ok(FetchResult::without_response(
                        current,
                        FetchClass::NetworkError,
                        started.elapsed(),
                        msg,
                    ));
                }
            };

            if response.is_redirect() {
                let Some(target) = response.header("location").and_then(|l| current.join(l).ok()) else {
                    return Ok(classified(response, FetchClass::HttpError, started, Some("redirect without usable Location")));
                };

                if self.patterns.is_desktop(&target) {
                    warn!(from = %current, to = %target, "redirect to desktop site refused");
                    let mut result = classified(response, FetchClass::RedirectedToDesktop, started, None);
                    result.detail = Some(format!("redirected to {target}"));
                    result.final_url = target;
                    return Ok(result);
                }

                if !self.patterns.is_mobile(&target) {
                    let detail = format!("redirect leaves mobile site: {target}");
                    return Ok(classified(response, FetchClass::HttpError, started, Some(detail.as_str())));
                }

                hops += 1;
                if hops > self.max_hops {
                    return Err(ArticleError::RedirectLoop {
                        hops: self.max_hops,
                        url: target.to_string(),
                    });
                }
                debug!(hop = hops, to = %target, "following mobile redirect");
                current = target;
                continue;
            }

            if self.patterns.is_desktop(&response.url) || self.patterns.is_desktop(&current) {
                let detail = format!("response served from desktop URL {}", response.url);
                return Ok(classified(response, FetchClass::RedirectedToDesktop, started, Some(detail.as_str())));
            }

            let class = if (200..300).contains(&response.status) {
                FetchClass::Ok
            } else {
                FetchClass::HttpError
            };
            return Ok(classified(response, class, started, None));
        }
    }
}

fn classified(response: RawResponse, class: FetchClass, started: Instant, detail: Option<&str>) -> FetchResult {
    let detail = detail
        .map(str::to_string)
        .or_else(|| (class == FetchClass::HttpError).then(|| format!("HTTP {}", response.status)));
    FetchResult {
        final_url: response.url,
        status: Some(response.status),
        body: response.body,
        headers: response.headers,
        elapsed: started.elapsed(),
        class,
        detail,
    }
}
