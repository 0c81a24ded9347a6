//! Request executor with exponential backoff

use std::time::Duration;

use reqwest::{Client, Request, Response};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Statuses that are worth another attempt
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// HTTP statuses that trigger a retry
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.to_vec(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let delay_secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }

    /// Check if a status is on the retry allow-list
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }
}

/// Sleep for `delay` unless `cancel` fires first.
pub async fn cancellable_sleep(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// A body-buffered copy of a request that can be rebuilt for every attempt.
struct ReplayableRequest {
    template: Request,
    body: Option<Vec<u8>>,
}

impl ReplayableRequest {
    fn new(template: Request) -> Result<Self> {
        let body = match template.body() {
            None => None,
            Some(body) => match body.as_bytes() {
                Some(bytes) => Some(bytes.to_vec()),
                None => {
                    return Err(Error::InvalidRequest(
                        "streaming request bodies cannot be replayed".to_string(),
                    ));
                }
            },
        };
        Ok(Self { template, body })
    }

    fn arm(&self) -> Request {
        let mut request = Request::new(self.template.method().clone(), self.template.url().clone());
        *request.headers_mut() = self.template.headers().clone();
        *request.timeout_mut() = self.template.timeout().copied();
        *request.version_mut() = self.template.version();
        if let Some(body) = &self.body {
            *request.body_mut() = Some(body.clone().into());
        }
        request
    }
}

/// Wraps a `reqwest::Client` with retry on transient failures.
#[derive(Debug, Clone)]
pub struct BackoffTransport {
    client: Client,
    retry: RetryConfig,
    response_timeout: Duration,
}

impl BackoffTransport {
    /// Default connect timeout for the shared client
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default time allowed until response headers arrive
    pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a transport with a fresh client and default retry policy
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client))
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            retry: RetryConfig::default(),
            response_timeout: Self::RESPONSE_TIMEOUT,
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-attempt response-header timeout
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// The retry policy in use
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// The underlying client, for building requests
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Execute `request`, retrying transient failures.
    ///
    /// Returns the first 2xx response. A non-retryable status is returned as
    /// `Error::Upstream` right away; exhausting the retry budget wraps the last
    /// error in `Error::RetriesExhausted`.
    pub async fn execute(&self, request: Request, cancel: &CancellationToken) -> Result<Response> {
        let replayable = ReplayableRequest::new(request)?;
        let mut retries = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let failure = match self.attempt(replayable.arm(), cancel).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        return Ok(response);
                    }
                    let body = response.text().await.unwrap_or_default();
                    let err = Error::Upstream { status, body };
                    if !self.retry.is_retryable_status(status) {
                        return Err(err);
                    }
                    err
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };

            if retries >= self.retry.max_retries {
                return Err(Error::RetriesExhausted {
                    retries,
                    source: Box::new(failure),
                });
            }

            retries += 1;
            let delay = self.retry.delay_for_retry(retries);
            tracing::warn!(
                "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                retries,
                self.retry.max_retries + 1,
                failure,
                delay
            );
            cancellable_sleep(delay, cancel).await?;
        }
    }

    async fn attempt(&self, request: Request, cancel: &CancellationToken) -> Result<Response> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(self.response_timeout, self.client.execute(request)) => {
                match result {
                    Ok(response) => Ok(response?),
                    Err(_) => Err(Error::Timeout(self.response_timeout)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            backoff_multiplier: 2.0,
            ..RetryConfig::default()
        }
    }

    fn post(transport: &BackoffTransport, url: String, body: &str) -> Request {
        transport
            .client()
            .post(url)
            .body(body.to_string())
            .build()
            .unwrap()
    }

    #[test]
    fn test_delay_progression_and_cap() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_retry(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_retry(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_retry(3), Duration::from_secs(4));
        assert_eq!(config.delay_for_retry(10), Duration::from_secs(30));
    }

    #[test]
    fn test_default_status_allow_list() {
        let config = RetryConfig::default();
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(config.is_retryable_status(status));
        }
        assert!(!config.is_retryable_status(400));
        assert!(!config.is_retryable_status(401));
        assert!(!config.is_retryable_status(404));
    }

    #[tokio::test]
    async fn test_always_500_makes_n_plus_one_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(4)
            .mount(&server)
            .await;

        let config = fast_retry(3);
        let cap = config.max_delay;
        let transport = BackoffTransport::new().unwrap().with_retry_config(config);
        let request = post(&transport, format!("{}/chat", server.uri()), "payload");

        let started = Instant::now();
        let err = transport
            .execute(request, &CancellationToken::new())
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        match &err {
            Error::RetriesExhausted { retries, source } => {
                assert_eq!(*retries, 3);
                assert!(matches!(**source, Error::Upstream { status: 500, .. }));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert!(err.to_string().starts_with("after 3 retries:"));
        // Waits are 10 + 20 + 40ms; allow generous slack for request round trips.
        assert!(elapsed < cap * 3 + Duration::from_secs(2), "took {:?}", elapsed);
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let transport = BackoffTransport::new().unwrap().with_retry_config(fast_retry(3));
        let request = post(&transport, server.uri(), "payload");
        let response = transport
            .execute(request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "ok");
        // The body was re-armed for every attempt.
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.body == b"payload"));
    }

    #[tokio::test]
    async fn test_non_retryable_status_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = BackoffTransport::new().unwrap().with_retry_config(fast_retry(3));
        let request = post(&transport, server.uri(), "x");
        let err = transport
            .execute(request, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::Upstream { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("expected Upstream, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_sleep() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = RetryConfig {
            initial_delay: Duration::from_secs(30),
            ..RetryConfig::default()
        };
        let transport = BackoffTransport::new().unwrap().with_retry_config(config);
        let request = post(&transport, server.uri(), "x");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = transport.execute(request, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_network_error_is_retried() {
        // Nothing listens on port 9 (discard) on test hosts; connects are refused.
        let transport = BackoffTransport::new().unwrap().with_retry_config(fast_retry(2));
        let request = post(&transport, "http://127.0.0.1:9/".to_string(), "x");
        let err = transport
            .execute(request, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            Error::RetriesExhausted { retries, source } => {
                assert_eq!(retries, 2);
                assert!(source.is_retryable());
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_already_cancelled_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let transport = BackoffTransport::new().unwrap();
        let request = post(&transport, server.uri(), "x");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = transport.execute(request, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
