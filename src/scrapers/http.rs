//! HTTP access for the fetcher.
//!
//! [`PageClient`] is the seam tests use to serve canned pages;
//! [`HttpPageClient`] is the `reqwest` implementation with per-source
//! politeness (User-Agent rotation, browser-like headers, randomized delay
//! before every request).

use crate::errors::FetchError;
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use rand::{rng, Rng};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, instrument};

/// A fetched page. Non-200 statuses are returned, not raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub status: u16,
    pub body: String,
}

impl Page {
    #[cfg(test)]
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

#[async_trait]
pub trait PageClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<Page, FetchError>;
}

/// Randomized delay, uniform in `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    pub min: Duration,
    pub max: Duration,
}

impl Throttle {
    pub fn between_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min.min(max)),
            max: Duration::from_millis(max),
        }
    }

    pub fn pick(&self) -> Duration {
        let ms = rng().random_range(self.min.as_millis() as u64..=self.max.as_millis() as u64);
        Duration::from_millis(ms)
    }

    pub async fn wait(&self) {
        let delay = self.pick();
        debug!(delay_ms = delay.as_millis() as u64, "Throttling before request");
        sleep(delay).await;
    }
}

/// How a source wants to be approached.
#[derive(Debug, Clone, Copy)]
pub struct Politeness {
    /// One is chosen at random per request. Empty means the crate default.
    pub user_agents: &'static [&'static str],
    pub headers: &'static [(&'static str, &'static str)],
    pub throttle: Option<(u64, u64)>,
}

impl Politeness {
    pub const NONE: Politeness = Politeness {
        user_agents: &[],
        headers: &[],
        throttle: None,
    };
}

const DEFAULT_USER_AGENT: &str = concat!("finscrap/", env!("CARGO_PKG_VERSION"));

pub struct HttpPageClient {
    client: reqwest::Client,
    user_agents: &'static [&'static str],
    throttle: Option<Throttle>,
}

impl HttpPageClient {
    pub fn new(politeness: &Politeness, timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        for &(name, value) in politeness.headers {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            user_agents: politeness.user_agents,
            throttle: politeness
                .throttle
                .map(|(min, max)| Throttle::between_millis(min, max)),
        })
    }
}

#[async_trait]
impl PageClient for HttpPageClient {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn get(&self, url: &str) -> Result<Page, FetchError> {
        if let Some(throttle) = &self.throttle {
            throttle.wait().await;
        }
        let mut request = self.client.get(url);
        // pick before the await; ThreadRng is not Send
        let agent = self.user_agents.choose(&mut rng()).copied();
        if let Some(agent) = agent {
            request = request.header(header::USER_AGENT, agent);
        }

        let t0 = Instant::now();
        let resp = request.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        debug!(status, bytes = body.len(), elapsed_ms = t0.elapsed().as_millis() as u64, "Fetched page");
        Ok(Page { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_stays_in_bounds() {
        let throttle = Throttle::between_millis(1500, 3500);
        for _ in 0..200 {
            let d = throttle.pick();
            assert!(d >= Duration::from_millis(1500) && d <= Duration::from_millis(3500));
        }
    }

    #[test]
    fn test_inverted_bounds_collapse() {
        let throttle = Throttle::between_millis(10, 5);
        assert_eq!(throttle.min, Duration::from_millis(5));
        assert_eq!(throttle.pick(), Duration::from_millis(5));
    }

    #[test]
    fn test_client_builds_with_static_headers() {
        let politeness = Politeness {
            user_agents: &["a", "b"],
            headers: &[("accept-language", "en-US,en;q=0.5")],
            throttle: Some((0, 0)),
        };
        assert!(HttpPageClient::new(&politeness, Duration::from_secs(5)).is_ok());
        assert!(Page::ok("x").is_ok());
    }
}
