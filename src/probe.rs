//! Lightweight image dimension probing.
//!
//! When an image declares no size, the selector may ask an [`ImageProbe`] for
//! one. [`HttpImageProbe`] fetches only a prefix of the file and reads the
//! dimensions from the header, so no pixel data is decoded.

use crate::identity::IdentityPool;
use crate::pacing::HostPacer;
use crate::transport::HttpTransport;
use crate::utils::host_key;
use image::ImageReader;
use std::io::Cursor;
use tracing::{debug, instrument};
use url::Url;

#[allow(async_fn_in_trait)]
pub trait ImageProbe {
    /// `(width, height)`, or `None` when the size cannot be learned cheaply.
    async fn dimensions(&self, url: &str) -> Option<(u32, u32)>;
}

/// Probe that never learns anything; candidates keep a neutral score.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

impl ImageProbe for NoProbe {
    async fn dimensions(&self, _url: &str) -> Option<(u32, u32)> {
        None
    }
}

/// Read width and height from the leading bytes of an image file.
pub fn dimensions_from_bytes(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[derive(Debug)]
pub struct HttpImageProbe<'a, T> {
    transport: &'a T,
    pacer: &'a HostPacer,
    identities: &'a IdentityPool,
    max_bytes: usize,
}

impl<'a, T: HttpTransport> HttpImageProbe<'a, T> {
    pub fn new(transport: &'a T, pacer: &'a HostPacer, identities: &'a IdentityPool, max_bytes: usize) -> Self {
        Self {
            transport,
            pacer,
            identities,
            max_bytes,
        }
    }
}

impl<T: HttpTransport> ImageProbe for HttpImageProbe<'_, T> {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn dimensions(&self, url: &str) -> Option<(u32, u32)> {
        let url = Url::parse(url).ok()?;
        self.pacer.wait(&host_key(&url)).await;
        let response = match self.transport.get_prefix(&url, &self.identities.next(), self.max_bytes).await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "image probe failed");
                return None;
            }
        };
        if !matches!(response.status, 200 | 206) {
            debug!(status = response.status, "image probe got non-success status");
            return None;
        }
        let dims = dimensions_from_bytes(&response.body);
        debug!(?dims, bytes = response.body.len(), "image probed");
        dims
    }
}
