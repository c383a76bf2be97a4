//! # Rate-Limited Transport
//!
//! Outbound HTTP GET with a process-wide admission limit. Every call waits for
//! a permit on a FIFO semaphore, runs under its own deadline, and converts
//! non-success statuses into [`TransportError::HttpStatus`] with the response
//! body attached. Timed-out calls are retried through [`retry_on_timeout`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use metrics::{counter, histogram};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};
use url::Url;

use crate::error::TransportError;
use crate::retry::{RetryPolicy, retry_on_timeout};

/// Default global in-flight cap.
pub const DEFAULT_MAX_CONCURRENT: usize = 35;

const DEFAULT_USER_AGENT: &str = "devsync/0.1";

/// Settings used to build a [`RateLimitedTransport`].
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub max_concurrent: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Credential attached to every request of a connection.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// HTTP basic auth; personal access tokens use an empty username.
    Basic { username: String, token: String },
    Bearer(String),
}

impl Credential {
    /// `Authorization` header value for this credential.
    pub fn header_value(&self) -> Result<HeaderValue, TransportError> {
        let raw = match self {
            Credential::Basic { username, token } => {
                format!("Basic {}", STANDARD.encode(format!("{}:{}", username, token)))
            }
            Credential::Bearer(token) => format!("Bearer {}", token),
        };

        let mut value = HeaderValue::from_str(&raw)
            .map_err(|e| TransportError::InvalidRequest(format!("invalid credential: {}", e)))?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Insert the `Authorization` header into `headers`.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), TransportError> {
        headers.insert(AUTHORIZATION, self.header_value()?);
        Ok(())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("token", &"[REDACTED]")
                .finish(),
            Credential::Bearer(_) => f.debug_tuple("Bearer").field(&"[REDACTED]").finish(),
        }
    }
}

/// A fully read upstream response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Shared HTTP GET primitive with global admission control.
#[derive(Clone)]
pub struct RateLimitedTransport {
    limiter: Arc<Semaphore>,
    client: reqwest::Client,
    insecure_client: reqwest::Client,
    default_timeout: Duration,
    retry: RetryPolicy,
    max_concurrent: usize,
}

impl RateLimitedTransport {
    pub fn new(settings: TransportSettings) -> Result<Self, TransportError> {
        let max_concurrent = settings.max_concurrent.max(1);

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()?;
        let insecure_client = reqwest::Client::builder()
            .user_agent(settings.user_agent)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            limiter: Arc::new(Semaphore::new(max_concurrent)),
            client,
            insecure_client,
            default_timeout: settings.timeout,
            retry: settings.retry,
            max_concurrent,
        })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Permits not currently held by an in-flight call.
    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Issue a GET, retrying on timeout.
    ///
    /// `timeout` falls back to the configured default. The deadline covers
    /// sending the request and reading the body, not the wait for a permit.
    #[instrument(skip(self, params, headers), fields(url = %url))]
    pub async fn get(
        &self,
        url: &str,
        params: &[(String, String)],
        headers: &HeaderMap,
        timeout: Option<Duration>,
        verify_tls: bool,
    ) -> Result<HttpResponse, TransportError> {
        let url = build_url(url, params)?;
        let timeout = timeout.unwrap_or(self.default_timeout);

        retry_on_timeout(self.retry, || {
            self.get_once(url.clone(), headers.clone(), timeout, verify_tls)
        })
        .await
    }

    async fn get_once(
        &self,
        url: Url,
        headers: HeaderMap,
        timeout: Duration,
        verify_tls: bool,
    ) -> Result<HttpResponse, TransportError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| TransportError::InvalidRequest("transport limiter closed".to_string()))?;

        let client = if verify_tls {
            &self.client
        } else {
            &self.insecure_client
        };

        let started = Instant::now();
        let url_text = url.to_string();
        let request = async {
            let response = client.get(url).headers(headers).send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, headers, body))
        };

        let outcome = match tokio::time::timeout(timeout, request).await {
            Err(_) => Err(TransportError::Timeout {
                url: url_text.clone(),
                timeout,
            }),
            Ok(Err(err)) => Err(TransportError::Network(err)),
            Ok(Ok((status, headers, body))) if status.is_success() => Ok(HttpResponse {
                status: status.as_u16(),
                headers,
                body,
            }),
            Ok(Ok((status, _, body))) => Err(TransportError::http_status(
                status.as_u16(),
                body,
                url_text.clone(),
            )),
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        histogram!("devsync_transport_latency_ms").record(elapsed_ms);
        let label = match &outcome {
            Ok(_) => "success",
            Err(err) if err.is_timeout() => "timeout",
            Err(TransportError::HttpStatus { .. }) => "http_status",
            Err(_) => "network",
        };
        counter!("devsync_transport_requests_total", "outcome" => label).increment(1);
        debug!(url = %url_text, outcome = label, elapsed_ms, "Upstream call finished");

        outcome
    }
}

/// Append query parameters to `base`.
pub fn build_url(base: &str, params: &[(String, String)]) -> Result<Url, TransportError> {
    let mut url = Url::parse(base)
        .map_err(|e| TransportError::InvalidRequest(format!("invalid url '{}': {}", base, e)))?;
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }
    Ok(url)
}

/// Build a header map from string pairs.
pub fn header_map<'a, I>(pairs: I) -> Result<HeaderMap, TransportError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("invalid header name: {}", e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidRequest(format!("invalid header value: {}", e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Default headers for a connection: JSON accept plus credential.
pub fn connection_headers(credential: Option<&Credential>) -> Result<HeaderMap, TransportError> {
    let mut headers = header_map([("accept", "application/json")])?;
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    if let Some(credential) = credential {
        credential.apply(&mut headers)?;
    }
    Ok(headers)
}
