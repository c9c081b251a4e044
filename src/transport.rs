//! HTTP transport seam.
//!
//! [`HttpTransport`] issues exactly one GET and never follows redirects, so the
//! redirect guard observes every hop. [`ReqwestTransport`] is the production
//! implementation; tests swap in a scripted transport.

use crate::models::Identity;
use reqwest::redirect::Policy;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// A raw, unclassified HTTP response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub url: Url,
    pub status: u16,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Network(String),
}

/// One GET, custom headers, no redirect following.
#[allow(async_fn_in_trait)]
pub trait HttpTransport {
    async fn get(&self, url: &Url, identity: &Identity) -> Result<RawResponse, TransportError>;

    /// Ranged GET used by the image probe; only the first `max_bytes` are needed.
    async fn get_prefix(
        &self,
        url: &Url,
        identity: &Identity,
        max_bytes: usize,
    ) -> Result<RawResponse, TransportError>;
}

impl<T: HttpTransport> HttpTransport for &T {
    async fn get(&self, url: &Url, identity: &Identity) -> Result<RawResponse, TransportError> {
        (**self).get(url, identity).await
    }

    async fn get_prefix(
        &self,
        url: &Url,
        identity: &Identity,
        max_bytes: usize,
    ) -> Result<RawResponse, TransportError> {
        (**self).get_prefix(url, identity, max_bytes).await
    }
}

/// `reqwest`-backed transport with redirects disabled.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    fn request(&self, url: &Url, identity: &Identity) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(url.clone());
        for (name, value) in identity.headers() {
            builder = builder.header(name, value);
        }
        builder
    }

    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(e.to_string())
        }
    }

    async fn read(
        &self,
        response: reqwest::Response,
        max_bytes: Option<usize>,
    ) -> Result<RawResponse, TransportError> {
        let url = response.url().clone();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = match max_bytes {
            None => response.bytes().await.map_err(|e| self.map_error(e))?.to_vec(),
            Some(limit) => {
                let mut response = response;
                let mut buf = Vec::with_capacity(limit.min(64 * 1024));
                while let Some(chunk) = response.chunk().await.map_err(|e| self.map_error(e))? {
                    buf.extend_from_slice(&chunk);
                    if buf.len() >= limit {
                        buf.truncate(limit);
                        break;
                    }
                }
                buf
            }
        };

        Ok(RawResponse {
            url,
            status,
            headers,
            body,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn get(&self, url: &Url, identity: &Identity) -> Result<RawResponse, TransportError> {
        let response = self
            .request(url, identity)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        let raw = self.read(response, None).await?;
        debug!(status = raw.status, bytes = raw.body.len(), timeout = ?self.timeout, "GET complete");
        Ok(raw)
    }

    #[instrument(level = "debug", skip_all, fields(%url, max_bytes))]
    async fn get_prefix(
        &self,
        url: &Url,
        identity: &Identity,
        max_bytes: usize,
    ) -> Result<RawResponse, TransportError> {
        let response = self
            .request(url, identity)
            .header("range", format!("bytes=0-{}", max_bytes.saturating_sub(1)))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        self.read(response, Some(max_bytes)).await
    }
}
