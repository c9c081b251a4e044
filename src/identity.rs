//! Pool of mobile browser identities, one drawn per fetch attempt.

use crate::error::PipelineError;
use crate::models::Identity;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MOBILE_REFERER: &str = "https://m.zol.com.cn/mobile/";

/// Built-in mobile user agents (iPhone, Pixel, Samsung, Huawei, Xiaomi).
pub const DEFAULT_MOBILE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 14_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) CriOS/96.0.4664.53 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 15_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148 Safari/605.1.15",
    "Mozilla/5.0 (Linux; Android 10; SM-G981B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.162 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 11; Pixel 5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/90.0.4430.91 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 12; SM-S908B) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/102.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 10; VOG-L29) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.120 Mobile Safari/537.36",
    "Mozilla/5.0 (Linux; Android 11; M2102K1G) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/95.0.4638.74 Mobile Safari/537.36",
];

/// The default identity set used when the config names none.
pub fn default_identities() -> Vec<Identity> {
    DEFAULT_MOBILE_USER_AGENTS
        .iter()
        .map(|ua| Identity::new(*ua).with_referer(MOBILE_REFERER))
        .collect()
}

/// Uniform-random identity selection over a fixed, non-empty set.
///
/// The random source sits behind a mutex held only for a single draw, so the
/// pool can be shared by reference across concurrent fetches.
#[derive(Debug)]
pub struct IdentityPool {
    identities: Vec<Identity>,
    rng: Mutex<StdRng>,
}

impl IdentityPool {
    pub fn new(identities: Vec<Identity>) -> Result<Self, PipelineError> {
        Self::with_rng(identities, StdRng::from_os_rng())
    }

    /// Deterministic pool for reproducible runs.
    pub fn with_seed(identities: Vec<Identity>, seed: u64) -> Result<Self, PipelineError> {
        Self::with_rng(identities, StdRng::seed_from_u64(seed))
    }

    fn with_rng(identities: Vec<Identity>, rng: StdRng) -> Result<Self, PipelineError> {
        if identities.is_empty() {
            return Err(PipelineError::config("identity pool is empty"));
        }
        Ok(Self {
            identities,
            rng: Mutex::new(rng),
        })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Draw an identity uniformly at random for one request attempt.
    ///
    /// Draws are independent, so consecutive attempts may repeat an identity;
    /// use [`IdentityPool::next_excluding`] when a retry must differ.
    ///
    /// # Returns
    ///
    /// A clone of the drawn identity, ready to be applied to a request.
    pub fn next(&self) -> Identity {
        let idx = self.rng.lock().random_range(0..self.identities.len());
        self.identities[idx].clone()
    }

    /// Draw an identity different from `previous` whenever the pool allows it.
    pub fn next_excluding(&self, previous: &Identity) -> Identity {
        let others: Vec<&Identity> = self.identities.iter().filter(|i| *i != previous).collect();
        if others.is_empty() {
            return self.next();
        }
        let idx = self.rng.lock().random_range(0..others.len());
        others[idx].clone()
    }
}
