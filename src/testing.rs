//! Scripted transport for network-free tests.

use crate::models::Identity;
use crate::transport::{HttpTransport, RawResponse, TransportError};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

#[derive(Debug, Clone)]
pub enum Step {
    Respond(RawResponse),
    Fail(TransportError),
    Delay(Duration, Box<Step>),
}

/// Responses queued per URL. The last queued step repeats once the queue drains.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<(String, String, Instant)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, url: &str, step: Step) -> &Self {
        self.routes
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn html(&self, url: &str, body: &str) -> &Self {
        self.push(url, Step::Respond(response(url, 200, &[("content-type", "text/html; charset=utf-8")], body)))
    }

    pub fn status(&self, url: &str, status: u16) -> &Self {
        self.push(url, Step::Respond(response(url, status, &[], "")))
    }

    pub fn redirect(&self, url: &str, location: &str) -> &Self {
        self.push(url, Step::Respond(response(url, 302, &[("location", location)], "")))
    }

    pub fn fail(&self, url: &str, error: TransportError) -> &Self {
        self.push(url, Step::Fail(error))
    }

    /// (url, user-agent) for every request made, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .iter()
            .map(|(u, ua, _)| (u.clone(), ua.clone()))
            .collect()
    }

    /// When each request was issued, by the tokio clock, in order.
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(_, _, at)| *at).collect()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|(u, _, _)| u == url).count()
    }

    fn next_step(&self, url: &Url) -> Option<Step> {
        let mut routes = self.routes.lock();
        let queue = routes.get_mut(url.as_str())?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

pub fn response(url: &str, status: u16, headers: &[(&str, &str)], body: &str) -> RawResponse {
    RawResponse {
        url: Url::parse(url).unwrap(),
        status,
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
            .collect(),
        body: body.as_bytes().to_vec(),
    }
}

impl HttpTransport for ScriptedTransport {
    async fn get(&self, url: &Url, identity: &Identity) -> Result<RawResponse, TransportError> {
        self.calls
            .lock()
            .push((url.to_string(), identity.user_agent.clone(), Instant::now()));
        let mut step = self
            .next_step(url)
            .ok_or_else(|| TransportError::Network(format!("no route for {url}")))?;
        loop {
            match step {
                Step::Respond(r) => return Ok(r),
                Step::Fail(e) => return Err(e),
                Step::Delay(d, inner) => {
                    tokio::time::sleep(d).await;
                    step = *inner;
                }
            }
        }
    }

    async fn get_prefix(
        &self,
        url: &Url,
        identity: &Identity,
        max_bytes: usize,
    ) -> Result<RawResponse, TransportError> {
        let mut raw = self.get(url, identity).await?;
        raw.body.truncate(max_bytes);
        Ok(raw)
    }
}
