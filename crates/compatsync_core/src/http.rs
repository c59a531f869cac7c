use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{
    ETAG, HeaderMap, HeaderName, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, USER_AGENT,
};
use thiserror::Error;
use tracing::debug;

use crate::model::CompatibilityCacheMeta;

pub const DEFAULT_USER_AGENT: &str = "compatsync/0.2 (+https://github.com/optiscaler/OptiScaler)";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn from_meta(meta: &CompatibilityCacheMeta) -> Self {
        Self {
            etag: non_empty(&meta.etag),
            last_modified: non_empty(&meta.last_modified),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED.as_u16()
    }
}

/// Blocking GET transport. An `Err` is a transport failure (no HTTP status).
pub trait HttpFetcher {
    fn get(&mut self, url: &str, validators: &Validators) -> Result<HttpResponse>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed after {attempts} attempt(s): {message}")]
    Transport {
        url: String,
        attempts: u32,
        message: String,
    },
    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub transport_backoff: Duration,
    pub rejected_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            transport_backoff: Duration::from_millis(1_500),
            rejected_backoff: Duration::from_millis(2_000),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget with no waiting between attempts.
    pub fn immediate() -> Self {
        Self {
            transport_backoff: Duration::ZERO,
            rejected_backoff: Duration::ZERO,
            ..Self::default()
        }
    }

    fn wait(&self, backoff: Duration, attempt: u32) {
        let delay = backoff.saturating_mul(attempt);
        if !delay.is_zero() {
            sleep(delay);
        }
    }
}

/// Issues `url` until it yields 2xx/304, a non-retryable status, or the
/// attempt budget runs out. Throttling and auth rejections (401/403/429)
/// and transport errors are retried with a linear backoff.
pub fn fetch_with_retry<F: HttpFetcher + ?Sized>(
    fetcher: &mut F,
    url: &str,
    validators: &Validators,
    policy: &RetryPolicy,
) -> Result<HttpResponse, FetchError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let last_attempt = attempt >= max_attempts;
        match fetcher.get(url, validators) {
            Ok(response) if response.is_success() || response.is_not_modified() => {
                return Ok(response);
            }
            Ok(response) if is_rejection_status(response.status) && !last_attempt => {
                debug!(url, status = response.status, attempt, "request rejected; retrying");
                policy.wait(policy.rejected_backoff, attempt);
            }
            Ok(response) => {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: response.status,
                });
            }
            Err(error) if !last_attempt => {
                debug!(url, attempt, error = %format!("{error:#}"), "transport error; retrying");
                policy.wait(policy.transport_backoff, attempt);
            }
            Err(error) => {
                return Err(FetchError::Transport {
                    url: url.to_string(),
                    attempts: attempt,
                    message: format!("{error:#}"),
                });
            }
        }
    }
}

fn is_rejection_status(status: u16) -> bool {
    matches!(
        StatusCode::from_u16(status),
        Ok(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

pub struct ReqwestFetcher {
    client: Client,
    user_agent: String,
    request_count: usize,
}

impl ReqwestFetcher {
    pub fn new(config: &HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .context("failed to build compatibility HTTP client")?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            request_count: 0,
        })
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn get(&mut self, url: &str, validators: &Validators) -> Result<HttpResponse> {
        self.request_count += 1;
        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, self.user_agent.as_str());
        if let Some(etag) = &validators.etag {
            request = request.header(IF_NONE_MATCH, etag.as_str());
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified.as_str());
        }

        let response = request
            .send()
            .with_context(|| format!("failed to request {url}"))?;
        let status = response.status();
        let etag = header_value(response.headers(), &ETAG);
        let last_modified = header_value(response.headers(), &LAST_MODIFIED);
        let body = if status == StatusCode::NOT_MODIFIED {
            String::new()
        } else {
            response
                .text()
                .with_context(|| format!("failed to read response body from {url}"))?
        };

        Ok(HttpResponse {
            status: status.as_u16(),
            etag,
            last_modified,
            body,
        })
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn header_value(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use anyhow::{Result, anyhow};

    use super::*;

    #[derive(Default)]
    struct ScriptedFetcher {
        script: VecDeque<std::result::Result<u16, &'static str>>,
        request_count: usize,
    }

    impl ScriptedFetcher {
        fn new(script: &[std::result::Result<u16, &'static str>]) -> Self {
            Self {
                script: script.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    impl HttpFetcher for ScriptedFetcher {
        fn get(&mut self, _url: &str, _validators: &Validators) -> Result<HttpResponse> {
            self.request_count += 1;
            match self.script.pop_front() {
                Some(Ok(status)) => Ok(HttpResponse {
                    status,
                    body: "body".to_string(),
                    ..HttpResponse::default()
                }),
                Some(Err(message)) => Err(anyhow!(message)),
                None => Err(anyhow!("script exhausted")),
            }
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    fn fetch(fetcher: &mut ScriptedFetcher) -> std::result::Result<HttpResponse, FetchError> {
        fetch_with_retry(
            fetcher,
            "https://example.test/index",
            &Validators::default(),
            &RetryPolicy::immediate(),
        )
    }

    #[test]
    fn success_returns_after_single_request() {
        let mut fetcher = ScriptedFetcher::new(&[Ok(200)]);
        let response = fetch(&mut fetcher).expect("fetch");
        assert_eq!(response.status, 200);
        assert_eq!(fetcher.request_count(), 1);
    }

    #[test]
    fn not_modified_is_returned_without_retry() {
        let mut fetcher = ScriptedFetcher::new(&[Ok(304)]);
        let response = fetch(&mut fetcher).expect("fetch");
        assert!(response.is_not_modified());
        assert_eq!(fetcher.request_count(), 1);
    }

    #[test]
    fn transport_errors_and_rejections_are_retried() {
        let mut fetcher = ScriptedFetcher::new(&[Err("connection reset"), Ok(429), Ok(200)]);
        let response = fetch(&mut fetcher).expect("fetch");
        assert_eq!(response.status, 200);
        assert_eq!(fetcher.request_count(), 3);
    }

    #[test]
    fn other_statuses_fail_immediately() {
        let mut fetcher = ScriptedFetcher::new(&[Ok(404), Ok(200)]);
        let error = fetch(&mut fetcher).expect_err("404 must fail");
        assert!(matches!(error, FetchError::Status { status: 404, .. }));
        assert_eq!(fetcher.request_count(), 1);
    }

    #[test]
    fn attempt_budget_is_bounded() {
        let mut fetcher = ScriptedFetcher::new(&[Ok(403), Ok(403), Ok(403), Ok(200)]);
        let error = fetch(&mut fetcher).expect_err("budget exhausted");
        assert!(matches!(error, FetchError::Status { status: 403, .. }));
        assert_eq!(fetcher.request_count(), 3);

        let mut fetcher = ScriptedFetcher::new(&[Err("dns"), Err("dns"), Err("timeout")]);
        let error = fetch(&mut fetcher).expect_err("transport exhausted");
        match error {
            FetchError::Transport {
                attempts, message, ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(message, "timeout");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validators_skip_empty_meta_values() {
        let meta = CompatibilityCacheMeta {
            etag: "\"abc\"".to_string(),
            last_modified: "  ".to_string(),
            ..CompatibilityCacheMeta::default()
        };
        let validators = Validators::from_meta(&meta);
        assert_eq!(validators.etag.as_deref(), Some("\"abc\""));
        assert_eq!(validators.last_modified, None);
        assert!(!validators.is_empty());
        assert!(Validators::default().is_empty());
    }

    #[test]
    fn default_policy_uses_linear_backoff_constants() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.transport_backoff, Duration::from_millis(1_500));
        assert_eq!(policy.rejected_backoff, Duration::from_millis(2_000));
    }
}
