//! Backlog HTTP client helper
//!
//! Every API exchange goes through [`BacklogHttpClient::send`], which:
//! - takes a slot from the shared rate limiter before each attempt
//! - retries 429 responses up to the rate-limit bound, honoring `Retry-After`
//! - retries timeouts, connection failures and 5xx with exponential backoff
//! - fails immediately on 401/403/404 and other 4xx responses
//!
//! The result is an [`Attempted`] value carrying the outcome together with the
//! number of attempts made.

use bytes::Bytes;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backup::config::RetryPolicy;
use crate::backup::rate_limit::RateLimiter;
use crate::client::retry_formatter::{RetryNotice, RetryReason};
use crate::client::{FetcherError, FetcherResult};
use crate::metrics::{record_retry_backoff, HttpRequestMetrics};
use crate::shutdown::SharedShutdown;

/// Outcome of a request together with how many attempts it took
#[derive(Debug)]
pub struct Attempted<T> {
    /// Final result
    pub outcome: FetcherResult<T>,
    /// Attempts made, including the first (0 when cancelled before sending)
    pub attempts: u32,
}

impl<T> Attempted<T> {
    fn new(outcome: FetcherResult<T>, attempts: u32) -> Self {
        Self { outcome, attempts }
    }

    /// Drop the attempt count
    pub fn into_result(self) -> FetcherResult<T> {
        self.outcome
    }

    /// Transform the success value, keeping the attempt count
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Attempted<U> {
        Attempted {
            outcome: self.outcome.map(f),
            attempts: self.attempts,
        }
    }
}

/// Unified HTTP client for all Backlog API interactions
pub struct BacklogHttpClient {
    client: Client,
    base_url: String,
    api_key: String,
    rate_limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    shutdown: Option<SharedShutdown>,
}

impl BacklogHttpClient {
    /// Create new HTTP client
    ///
    /// # Arguments
    /// * `client` - Shared reqwest client (cheap to clone)
    /// * `base_url` - API base, e.g. "https://example.backlog.com/api/v2"
    /// * `api_key` - Sent as the `apiKey` query parameter on every call
    /// * `rate_limiter` - Run-wide limiter
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            rate_limiter,
            policy: RetryPolicy::default(),
            shutdown: None,
        }
    }

    /// Override retry bounds and delays
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Abort backoff sleeps when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Base URL for endpoints
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Active retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// GET a JSON endpoint and deserialize the body
    pub async fn get_json<T>(&self, endpoint: &str, params: &[(&str, String)]) -> Attempted<T>
    where
        T: DeserializeOwned,
    {
        let Attempted { outcome, attempts } = self.send(endpoint, params).await;
        let outcome = match outcome {
            Ok(response) => response
                .json::<T>()
                .await
                .map_err(|e| FetcherError::Parse(format!("{endpoint}: {e}"))),
            Err(e) => Err(e),
        };
        Attempted::new(outcome, attempts)
    }

    /// GET a binary endpoint
    ///
    /// The body is read inside the retry loop, so a transfer cut short is
    /// retried like a failed request.
    pub async fn get_bytes(&self, endpoint: &str, params: &[(&str, String)]) -> Attempted<Bytes> {
        self.request(endpoint, params, |response| response.bytes()).await
    }

    /// Send a GET with the retry policy applied
    ///
    /// Retries on:
    /// - 429 rate limit responses (separate, larger bound)
    /// - Network errors (timeout, connection refused)
    /// - 5xx server errors
    ///
    /// Does not retry on:
    /// - 401/403 (authentication), 404 (not found), other 4xx
    pub async fn send(&self, endpoint: &str, params: &[(&str, String)]) -> Attempted<Response> {
        self.request(endpoint, params, |response| async move { Ok(response) })
            .await
    }

    /// Retry loop shared by [`send`](Self::send) and [`get_bytes`](Self::get_bytes)
    ///
    /// `read` turns a successful response into the result; its transport
    /// errors count against the transient retry budget.
    async fn request<T, F, Fut>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        read: F,
    ) -> Attempted<T>
    where
        F: Fn(Response) -> Fut,
        Fut: Future<Output = Result<T, reqwest::Error>>,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut query: Vec<(&str, String)> = Vec::with_capacity(params.len() + 1);
        query.push(("apiKey", self.api_key.clone()));
        query.extend(params.iter().cloned());

        let mut attempts = 0u32;
        let mut rate_limit_retries = 0u32;
        let mut transient_retries = 0u32;

        loop {
            if self.shutdown_requested() {
                return Attempted::new(Err(FetcherError::Cancelled), attempts);
            }

            self.rate_limiter.acquire().await;
            attempts += 1;
            let request_metrics = HttpRequestMetrics::start(endpoint, attempts);
            debug!(endpoint, attempt = attempts, "Sending API request");

            let transport_error = match self.client.get(&url).query(&query).send().await {
                Ok(response) => {
                    let status = response.status();
                    request_metrics.record_complete(status.as_u16());

                    let retry_after = parse_retry_after(response.headers());
                    if let Some(reason) = RetryReason::from_status(status, retry_after) {
                        let (used, limit) = if reason.is_rate_limit() {
                            (&mut rate_limit_retries, self.policy.max_rate_limit_retries)
                        } else {
                            (&mut transient_retries, self.policy.max_transient_retries)
                        };
                        if *used >= limit {
                            warn!("{}", RetryNotice::exhausted(endpoint, reason, attempts));
                            let error = if reason.is_rate_limit() {
                                FetcherError::RateLimitExceeded { attempts }
                            } else {
                                FetcherError::TransientNetwork(format!(
                                    "server error {status} from {endpoint}"
                                ))
                            };
                            return Attempted::new(Err(error), attempts);
                        }
                        let delay = if reason.is_rate_limit() {
                            self.policy.rate_limit_backoff(*used, retry_after)
                        } else {
                            self.policy.backoff(*used)
                        };
                        *used += 1;
                        let retry = *used;
                        if !self.retry_after_delay(endpoint, reason, retry, delay).await {
                            return Attempted::new(Err(FetcherError::Cancelled), attempts);
                        }
                        continue;
                    }

                    if status.is_client_error() {
                        let body = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unknown error".to_string());
                        let message = format!("{endpoint}: {}", summarize_body(&body));
                        let error = match status {
                            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                                FetcherError::Authentication(message)
                            }
                            StatusCode::NOT_FOUND => FetcherError::NotFound(message),
                            _ => FetcherError::Http {
                                status: status.as_u16(),
                                message,
                            },
                        };
                        debug!(endpoint, %status, "Non-retryable client error");
                        return Attempted::new(Err(error), attempts);
                    }

                    match read(response).await {
                        Ok(value) => {
                            if attempts > 1 {
                                debug!(endpoint, attempts, "Request succeeded after retries");
                            }
                            return Attempted::new(Ok(value), attempts);
                        }
                        Err(e) => {
                            debug!(endpoint, "Response body was cut short");
                            e
                        }
                    }
                }
                Err(e) => {
                    request_metrics.record_network_error();
                    e
                }
            };

            let reason = RetryReason::from_error(&transport_error);
            let message = redact(&transport_error.to_string(), &self.api_key);
            if transient_retries >= self.policy.max_transient_retries {
                warn!("{}", RetryNotice::exhausted(endpoint, reason, attempts));
                return Attempted::new(Err(FetcherError::TransientNetwork(message)), attempts);
            }
            debug!(endpoint, error = %message, "Transport error");
            let delay = self.policy.backoff(transient_retries);
            transient_retries += 1;
            if !self
                .retry_after_delay(endpoint, reason, transient_retries, delay)
                .await
            {
                return Attempted::new(Err(FetcherError::Cancelled), attempts);
            }
        }
    }

    /// Log the retry, then sleep for `delay` unless shutdown comes first
    ///
    /// Returns `false` when cancelled.
    async fn retry_after_delay(
        &self,
        endpoint: &str,
        reason: RetryReason,
        retry: u32,
        delay: Duration,
    ) -> bool {
        let limit = if reason.is_rate_limit() {
            self.policy.max_rate_limit_retries
        } else {
            self.policy.max_transient_retries
        };
        let notice = RetryNotice {
            endpoint,
            reason,
            retry,
            limit,
            delay,
        };
        warn!("{}", notice.message());
        record_retry_backoff(
            delay,
            if reason.is_rate_limit() { "rate_limit" } else { "transient" },
        );

        match &self.shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = shutdown.wait_for_shutdown() => false,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}

/// Parse a `Retry-After` header given in seconds
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Keep error bodies short enough for a log line
fn summarize_body(body: &str) -> String {
    const LIMIT: usize = 200;
    let trimmed = body.trim();
    if trimmed.chars().count() <= LIMIT {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(LIMIT).collect();
        format!("{head}...")
    }
}

/// reqwest errors embed the full URL, including the `apiKey` parameter
fn redact(message: &str, api_key: &str) -> String {
    if api_key.is_empty() {
        message.to_string()
    } else {
        message.replace(api_key, "***")
    }
}
