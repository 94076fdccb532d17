//! Network retrieval with bounded retries.
//!
//! A [`Fetcher`] performs one logical GET, retrying transient failures
//! (timeouts, resets, 5xx) up to a fixed number of times with exponential
//! backoff. It knows nothing about mangas or chapters and never touches the
//! disk. The actual wire attempt sits behind the [`Transport`] trait so the
//! retry policy can be exercised without a network.

use crate::config::FetchConfig;
use crate::error::FetchError;
use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum jitter added to backoff delays.
const MAX_JITTER: Duration = Duration::from_millis(250);

/// Operating systems used to build client identity strings.
const UA_SYSTEMS: &[&str] = &[
    "X11; Ubuntu; Linux x86_64;",
    "X11; Linux x86_64;",
    "Windows NT 10.0; Win64; x64;",
    "Macintosh; Intel Mac OS X 10.15;",
];

/// Browser versions used to build client identity strings.
const UA_VERSIONS: &[&str] = &["128.0", "131.0", "133.0", "134.0", "135.0"];

/// What a fetch is for. Only affects request headers and decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// HTML or JSON listing pages.
    Text,
    /// Binary page images.
    Image,
}

impl FetchKind {
    fn accept_header(self) -> &'static str {
        match self {
            FetchKind::Text => "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
            FetchKind::Image => "image/avif,image/webp,image/png,image/jpeg,*/*;q=0.8",
        }
    }
}

/// One attempt as handed to a [`Transport`].
#[derive(Debug, Clone)]
pub struct Attempt<'a> {
    pub url: &'a str,
    pub kind: FetchKind,
    pub user_agent: &'a str,
    /// Set on retries: the transport must not reuse a pooled connection.
    pub fresh_connection: bool,
}

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// May succeed if tried again.
    Transient(String),
    /// Will fail again no matter how often it is tried.
    Permanent { status: Option<u16>, cause: String },
}

/// Performs a single GET attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, attempt: &Attempt<'_>) -> Result<Vec<u8>, AttemptError>;
}

/// Retry bound and backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        FetchConfig::default().retry_policy()
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
            max_delay,
        }
    }

    /// A policy that retries immediately, for tests and offline use.
    pub fn immediate(retries: u32) -> Self {
        Self::new(retries, Duration::ZERO, Duration::ZERO)
    }

    /// Number of retries after the first attempt.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Total number of attempts, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
        delay + Duration::from_millis(jitter_ms)
    }
}

/// Builds a random desktop browser identity string.
pub fn random_user_agent() -> String {
    let mut rng = rand::thread_rng();
    let system = UA_SYSTEMS.choose(&mut rng).copied().unwrap_or(UA_SYSTEMS[0]);
    let version = UA_VERSIONS.choose(&mut rng).copied().unwrap_or(UA_VERSIONS[0]);
    format!("Mozilla/5.0 ({system} rv:{version}) Gecko/20100101 Firefox/{version}")
}

/// Stateless retrieval with bounded retry.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    request_delay: Duration,
}

impl Fetcher {
    /// Creates a fetcher over the given transport.
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            request_delay: Duration::ZERO,
        }
    }

    /// Creates an HTTP fetcher from configuration.
    pub fn http(config: &FetchConfig) -> Result<Self, FetchError> {
        let transport = HttpTransport::new(config.timeout())?;
        Ok(Self::new(Arc::new(transport), config.retry_policy())
            .with_request_delay(Duration::from_secs_f64(config.delay_between_requests_sec)))
    }

    /// Waits this long before every attempt.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retrieves `url`, retrying transient failures.
    pub async fn fetch(&self, url: &str, kind: FetchKind) -> Result<Vec<u8>, FetchError> {
        url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

        let mut attempt_no = 1;
        loop {
            if !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            let user_agent = random_user_agent();
            let attempt = Attempt {
                url,
                kind,
                user_agent: &user_agent,
                fresh_connection: attempt_no > 1,
            };
            debug!(url, attempt = attempt_no, ?kind, "fetching");

            match self.transport.get(&attempt).await {
                Ok(body) => return Ok(body),
                Err(AttemptError::Permanent { status, cause }) => {
                    return Err(FetchError::Permanent {
                        url: url.to_string(),
                        status,
                        cause,
                    });
                }
                Err(AttemptError::Transient(cause)) => {
                    if attempt_no >= self.policy.max_attempts() {
                        return Err(FetchError::Exhausted {
                            url: url.to_string(),
                            attempts: attempt_no,
                            cause,
                        });
                    }
                    let delay = self.policy.delay_for(attempt_no);
                    warn!(
                        url,
                        attempt = attempt_no,
                        max_attempts = self.policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        %cause,
                        "transient fetch failure, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt_no += 1;
                }
            }
        }
    }

    /// Retrieves `url` as text, replacing invalid UTF-8.
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let body = self.fetch(url, FetchKind::Text).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// [`Transport`] backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    cookies: Arc<Jar>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let cookies = Arc::new(Jar::default());
        let client = Self::build_client(&cookies, timeout)?;
        Ok(Self {
            client,
            cookies,
            timeout,
        })
    }

    fn build_client(cookies: &Arc<Jar>, timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .cookie_provider(Arc::clone(cookies))
            .timeout(timeout)
            .build()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, attempt: &Attempt<'_>) -> Result<Vec<u8>, AttemptError> {
        // A throwaway client shares the cookie jar but not the connection pool.
        let fresh;
        let client = if attempt.fresh_connection {
            fresh = Self::build_client(&self.cookies, self.timeout)
                .map_err(|e| AttemptError::Transient(e.to_string()))?;
            &fresh
        } else {
            &self.client
        };

        let mut request = client
            .get(attempt.url)
            .header(USER_AGENT, attempt.user_agent)
            .header(ACCEPT, attempt.kind.accept_header())
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5");
        if let Some(origin) = origin_of(attempt.url) {
            request = request.header(REFERER, origin);
        }

        let response = request.send().await.map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let cause = format!("HTTP {status}");
            return Err(if is_transient_status(status.as_u16()) {
                AttemptError::Transient(cause)
            } else {
                AttemptError::Permanent {
                    status: Some(status.as_u16()),
                    cause,
                }
            });
        }

        let body = response.bytes().await.map_err(classify_reqwest_error)?;
        Ok(body.to_vec())
    }
}

/// 408, 429 and 5xx are worth another try; every other status is final.
fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

fn classify_reqwest_error(error: reqwest::Error) -> AttemptError {
    if error.is_builder() || error.is_decode() || error.is_redirect() {
        AttemptError::Permanent {
            status: error.status().map(|s| s.as_u16()),
            cause: error.to_string(),
        }
    } else {
        // Timeouts, refused or reset connections, truncated bodies.
        AttemptError::Transient(error.to_string())
    }
}

fn origin_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(format!("{}://{}/", parsed.scheme(), host))
}
