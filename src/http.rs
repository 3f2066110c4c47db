//! Outbound HTTP requests.
//!
//! Every call made through an [`HttpFetcher`] produces a [`FetchResult`]:
//! timeouts, transport errors, non-success statuses and undecodable bodies are
//! classified into [`FetchErrorKind`] instead of being raised to the caller.
//! A `404` response is not an error; callers check [`FetchResult::is_not_found`].

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

/// Classification of a failed outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// No response within the request timeout
    Timeout,
    /// Connection, TLS or body transfer failure
    Transport,
    /// 4xx status other than 404
    ClientError,
    /// 5xx status
    ServerError,
    /// The body was not valid JSON
    Decode,
}

/// Error part of a [`FetchResult`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct FetchError {
    /// Failure class
    pub kind: FetchErrorKind,
    /// Human readable detail
    pub message: String,
}

impl FetchError {
    /// Creates an error of the given kind.
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FetchErrorKind::Timeout
        } else if err.is_decode() {
            FetchErrorKind::Decode
        } else {
            FetchErrorKind::Transport
        };
        Self::new(kind, err.to_string())
    }
}

/// A single outbound request description.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Target address without the query string
    pub url: String,
    /// HTTP method
    pub method: Method,
    /// Query parameters, repeated keys allowed
    pub query: Vec<(String, String)>,
    /// Extra request headers
    pub headers: Vec<(String, String)>,
    /// Per-call timeout overriding the fetcher default
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    /// Creates a `GET` request for `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            query: Vec::new(),
            headers: Vec::new(),
            timeout: None,
        }
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Replaces every value of `key` with a single `value`.
    #[must_use]
    pub fn replace_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.retain(|(k, _)| k != key);
        self.query.push((key.to_string(), value.into()));
        self
    }

    /// Returns the first value of a query parameter.
    #[must_use]
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Adds a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result envelope of one outbound call.
///
/// Exactly one of payload or error is present; the target address, method
/// and status (0 when no response arrived) are always carried.
#[derive(Debug, Clone)]
pub struct FetchResult<T = Value> {
    /// Target address
    pub url: String,
    /// HTTP method
    pub method: Method,
    /// Response status, 0 when no response arrived
    pub status: u16,
    /// Payload or classified error
    pub outcome: Result<T, FetchError>,
}

impl<T> FetchResult<T> {
    /// Whether a payload is present.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Whether the resource answered `404 Not Found`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// Transforms the payload, keeping address, method and status.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchResult<U> {
        FetchResult {
            url: self.url,
            method: self.method,
            status: self.status,
            outcome: self.outcome.map(f),
        }
    }

    /// Splits the envelope into the payload or a self-describing failure.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure`] when the call failed.
    pub fn into_payload(self) -> Result<T, FetchFailure> {
        match self.outcome {
            Ok(payload) => Ok(payload),
            Err(error) => Err(FetchFailure {
                url: self.url,
                method: self.method,
                status: self.status,
                error,
            }),
        }
    }

    /// Builds a failed envelope from a failure.
    #[must_use]
    pub fn from_failure(failure: FetchFailure) -> Self {
        Self {
            url: failure.url,
            method: failure.method,
            status: failure.status,
            outcome: Err(failure.error),
        }
    }
}

/// A failed call with its request context.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{method} {url} failed (status {status}): {error}")]
pub struct FetchFailure {
    /// Target address
    pub url: String,
    /// HTTP method
    pub method: Method,
    /// Response status, 0 when no response arrived
    pub status: u16,
    /// Classified error
    pub error: FetchError,
}

impl FetchFailure {
    /// Failure class shortcut.
    #[must_use]
    pub const fn kind(&self) -> FetchErrorKind {
        self.error.kind
    }
}

/// Performs outbound calls. Implementations never panic and never return
/// errors outside the envelope.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Executes one request.
    async fn fetch(&self, request: &FetchRequest) -> FetchResult;
}

/// Timeout and retry policy of [`ReqwestFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Default timeout for requests that do not set their own
    pub timeout: Duration,
    /// Retries after the first attempt for transient failures
    pub max_retries: usize,
    /// Base of the exponential backoff in milliseconds
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::config::DEFAULT_HTTP_TIMEOUT_SECS),
            max_retries: crate::config::DEFAULT_HTTP_MAX_RETRIES,
            initial_backoff_ms: crate::config::HTTP_INITIAL_BACKOFF_MS,
            max_backoff_ms: crate::config::HTTP_MAX_BACKOFF_MS,
        }
    }
}

struct AttemptError {
    status: u16,
    error: FetchError,
}

impl AttemptError {
    // Timeouts are left to the caller, which may retry with a smaller request.
    fn is_transient(&self) -> bool {
        match self.error.kind {
            FetchErrorKind::Transport => true,
            FetchErrorKind::ClientError => self.status == 429,
            FetchErrorKind::ServerError => matches!(self.status, 502..=504),
            FetchErrorKind::Timeout | FetchErrorKind::Decode => false,
        }
    }
}

/// [`HttpFetcher`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    config: FetcherConfig,
}

impl ReqwestFetcher {
    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(config: FetcherConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    async fn attempt(&self, request: &FetchRequest) -> Result<(u16, Value), AttemptError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| AttemptError {
            status: 0,
            error: FetchError::from_reqwest(&e),
        })?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            let body = response.json::<Value>().await.unwrap_or(Value::Null);
            return Ok((status.as_u16(), body));
        }
        if status.is_client_error() || status.is_server_error() {
            let kind = if status.is_server_error() {
                FetchErrorKind::ServerError
            } else {
                FetchErrorKind::ClientError
            };
            return Err(AttemptError {
                status: status.as_u16(),
                error: FetchError::new(kind, format!("unexpected status {status}")),
            });
        }

        let body = response.bytes().await.map_err(|e| AttemptError {
            status: status.as_u16(),
            error: FetchError::from_reqwest(&e),
        })?;
        let payload = serde_json::from_slice::<Value>(&body).map_err(|e| AttemptError {
            status: status.as_u16(),
            error: FetchError::new(FetchErrorKind::Decode, e.to_string()),
        })?;
        Ok((status.as_u16(), payload))
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        let strategy = ExponentialBackoff::from_millis(self.config.initial_backoff_ms)
            .max_delay(Duration::from_millis(self.config.max_backoff_ms))
            .map(jitter)
            .take(self.config.max_retries);

        let result = RetryIf::spawn(
            strategy,
            || self.attempt(request),
            |e: &AttemptError| {
                let retry = e.is_transient();
                if retry {
                    debug!(url = %request.url, status = e.status, error = %e.error, "Retrying request");
                }
                retry
            },
        )
        .await;

        match result {
            Ok((status, payload)) => {
                debug!(url = %request.url, method = %request.method, status, "Request finished");
                FetchResult {
                    url: request.url.clone(),
                    method: request.method.clone(),
                    status,
                    outcome: Ok(payload),
                }
            }
            Err(e) => {
                warn!(
                    url = %request.url,
                    method = %request.method,
                    status = e.status,
                    error = %e.error,
                    "Request failed"
                );
                FetchResult {
                    url: request.url.clone(),
                    method: request.method.clone(),
                    status: e.status,
                    outcome: Err(e.error),
                }
            }
        }
    }
}
