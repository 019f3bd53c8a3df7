use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CrawlSettings;
use crate::model::FailureReason;

/// How a single id resolved after the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(Value),
    NotFound,
    Exhausted(Exhaustion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    RetriesExhausted,
    /// Non-retryable status other than 404; retrying stopped right away.
    UnexpectedStatus(u16),
}

impl From<Exhaustion> for FailureReason {
    fn from(value: Exhaustion) -> Self {
        match value {
            Exhaustion::RetriesExhausted => FailureReason::RetriesExhausted,
            Exhaustion::UnexpectedStatus(code) => FailureReason::UnexpectedStatus(code),
        }
    }
}

/// Result of `fetch`, including the retry bookkeeping for that id.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub id: i64,
    pub outcome: FetchOutcome,
    pub attempts: u32,
    pub backoffs: u32,
}

#[async_trait]
pub trait ProductSource: Send + Sync {
    async fn fetch(&self, id: i64) -> Fetched;
}

/// Delay before retry number `attempt` (1-based): `unit * attempt`.
pub fn backoff_delay(unit: Duration, attempt: u32) -> Duration {
    unit.saturating_mul(attempt)
}

pub fn is_transient(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

enum Attempt {
    Resolved(FetchOutcome),
    Transient(String),
}

#[derive(Clone)]
pub struct HttpProductClient {
    http: Client,
    base_url: String,
    retries: u32,
    backoff_unit: Duration,
}

impl fmt::Debug for HttpProductClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProductClient")
            .field("base_url", &self.base_url)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl HttpProductClient {
    /// The idle pool is capped at `settings.concurrency`, the same bound the
    /// crawler's semaphore puts on in-flight requests.
    pub fn new(base_url: &str, user_agent: &str, settings: &CrawlSettings) -> Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(settings.request_timeout)
            .pool_max_idle_per_host(settings.concurrency)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retries: settings.retries.max(1),
            backoff_unit: settings.backoff_unit,
        })
    }

    pub fn product_url(&self, id: i64) -> String {
        format!("{}/{}", self.base_url, id)
    }

    async fn attempt(&self, id: i64, url: &str) -> Attempt {
        let res = match self.http.get(url).send().await {
            Ok(res) => res,
            Err(err) => return Attempt::Transient(format!("request failed: {}", err)),
        };
        let status = res.status();
        if status == StatusCode::OK {
            return match res.json::<Value>().await {
                Ok(body) => Attempt::Resolved(FetchOutcome::Success(body)),
                Err(err) => Attempt::Transient(format!("unreadable body: {}", err)),
            };
        }
        if status == StatusCode::NOT_FOUND {
            return Attempt::Resolved(FetchOutcome::NotFound);
        }
        if is_transient(status) {
            return Attempt::Transient(format!("status {}", status.as_u16()));
        }
        warn!(id, status = status.as_u16(), "unexpected status; not retrying");
        Attempt::Resolved(FetchOutcome::Exhausted(Exhaustion::UnexpectedStatus(
            status.as_u16(),
        )))
    }
}

#[async_trait]
impl ProductSource for HttpProductClient {
    async fn fetch(&self, id: i64) -> Fetched {
        let url = self.product_url(id);
        let mut backoffs = 0;
        for attempt in 1..=self.retries {
            match self.attempt(id, &url).await {
                Attempt::Resolved(outcome) => {
                    return Fetched {
                        id,
                        outcome,
                        attempts: attempt,
                        backoffs,
                    };
                }
                Attempt::Transient(reason) => {
                    if attempt == self.retries {
                        warn!(id, attempt, %reason, "giving up after final attempt");
                        break;
                    }
                    let delay = backoff_delay(self.backoff_unit, attempt);
                    debug!(id, attempt, %reason, delay_ms = delay.as_millis() as u64, "transient failure; backing off");
                    tokio::time::sleep(delay).await;
                    backoffs += 1;
                }
            }
        }
        Fetched {
            id,
            outcome: FetchOutcome::Exhausted(Exhaustion::RetriesExhausted),
            attempts: self.retries,
            backoffs,
        }
    }
}
