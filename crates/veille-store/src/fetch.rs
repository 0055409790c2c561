//! Allowlisted HTTP fetch with timeout, retry and typed failures.
//!
//! The allowlist check runs before any request is issued: downstream data
//! feeds legally significant calculators, so the agent must never fetch or
//! trust content from an unapproved host.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info_span;

use veille_core::SourceProvenance;

/// Typed fetch failures. Variants carry owned data so outcomes can be cloned
/// into provenance records and test fixtures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("host of {url} is not in the allowed domains")]
    DomainNotAllowed { url: String },
    #[error("http status {status} for {url}")]
    Http { status: u16, url: String },
    #[error("transport failure for {url}: {message}")]
    Transport { url: String, message: String },
}

/// A successfully fetched source page, decoded as text.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub fetched_at: chrono::DateTime<Utc>,
    pub content_sha256: String,
}

impl FetchedPage {
    /// Provenance skeleton for this page; `verified` and the publication date
    /// are filled in by the candidate builder.
    pub fn provenance(&self) -> SourceProvenance {
        SourceProvenance {
            url: self.url.clone(),
            fetched_at: self.fetched_at,
            verified: false,
            publication_date: veille_core::PublicationDate::NotFound,
            content_sha256: Some(self.content_sha256.clone()),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: Some("veille-agent/0.1".to_string()),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Seam between the pipeline and the network, so tests can substitute a mock
/// transport and assert zero calls.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, allowed_domains: &[String])
        -> Result<FetchedPage, FetchError>;
}

/// Checks that the URL's host ends with one of the allowed domain suffixes.
/// Suffix matching is dot-anchored: `gouv.fr` allows `impots.gouv.fr` but not
/// `notgouv.fr`.
pub fn host_allowed(url: &str, allowed_domains: &[String]) -> Result<(), FetchError> {
    let not_allowed = || FetchError::DomainNotAllowed {
        url: url.to_string(),
    };
    let parsed = reqwest::Url::parse(url).map_err(|_| not_allowed())?;
    let host = parsed.host_str().ok_or_else(not_allowed)?.to_ascii_lowercase();
    let allowed = allowed_domains.iter().any(|suffix| {
        let suffix = suffix.to_ascii_lowercase();
        host == suffix || host.ends_with(&format!(".{suffix}"))
    });
    if allowed {
        Ok(())
    } else {
        Err(not_allowed())
    }
}

#[derive(Debug)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpPageFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().map_err(|err| FetchError::Transport {
            url: String::new(),
            message: format!("building http client: {err}"),
        })?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(
        &self,
        url: &str,
        allowed_domains: &[String],
    ) -> Result<FetchedPage, FetchError> {
        host_allowed(url, allowed_domains)?;

        let span = info_span!("http_fetch", url);
        let _guard = span.enter();

        let transport = |err: &reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        };

        let mut last_error: Option<FetchError> = None;
        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    if status.is_success() {
                        let fetched_at = Utc::now();
                        let body = resp.text().await.map_err(|err| transport(&err))?;
                        let content_sha256 = sha256_hex(body.as_bytes());
                        return Ok(FetchedPage {
                            url: final_url,
                            status: status.as_u16(),
                            body,
                            fetched_at,
                            content_sha256,
                        });
                    }
                    let err = FetchError::Http {
                        status: status.as_u16(),
                        url: final_url,
                    };
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(err);
                }
                Err(err) => {
                    let mapped = transport(&err);
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_error = Some(mapped);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(mapped);
                }
            }
        }

        Err(last_error.unwrap_or(FetchError::Transport {
            url: url.to_string(),
            message: "retries exhausted".to_string(),
        }))
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
