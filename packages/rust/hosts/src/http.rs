//! HTTP client shared by repository hosts and the link validator.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};

use prometheus::IntGauge;

use docforge_shared::metrics::NO_RESPONSE;
use docforge_shared::{ClientMetrics, DocforgeError, MetricsRegistry, Result};

/// User-Agent string for every docforge request.
pub const USER_AGENT: &str = concat!("docforge/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// InstrumentedClient
// ---------------------------------------------------------------------------

/// A reqwest client that records request count, in-flight requests and
/// latency in a [`MetricsRegistry`].
///
/// Cloning is cheap and clones share the connection pool and collectors.
#[derive(Debug, Clone)]
pub struct InstrumentedClient {
    client: Client,
    metrics: ClientMetrics,
}

impl InstrumentedClient {
    /// Build an unauthenticated client.
    pub fn new(registry: &MetricsRegistry) -> Result<Self> {
        Self::with_headers(HeaderMap::new(), registry)
    }

    /// Build a client sending `headers` with every request.
    pub fn with_headers(headers: HeaderMap, registry: &MetricsRegistry) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| DocforgeError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            metrics: ClientMetrics::register(registry)?,
        })
    }

    /// Build a client authenticating with a bearer token.
    pub fn with_token(token: Option<&str>, registry: &MetricsRegistry) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| DocforgeError::config(format!("invalid API token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Self::with_headers(headers, registry)
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    pub fn head(&self, url: &str) -> RequestBuilder {
        self.client.head(url)
    }

    /// Send a request built from this client, recording metrics.
    pub async fn send(&self, request: RequestBuilder) -> reqwest::Result<Response> {
        let request = request.build()?;
        let method = request.method().clone();
        let _in_flight = InFlight::enter(&self.metrics.in_flight);
        let started = Instant::now();
        let response = self.client.execute(request).await;
        let code = match &response {
            Ok(response) => response.status().as_u16().to_string(),
            Err(_) => NO_RESPONSE.to_string(),
        };
        self.metrics
            .observe(method.as_str(), &code, started.elapsed());
        response
    }
}

/// Holds the in-flight gauge up until dropped, including on cancellation.
struct InFlight<'a>(&'a IntGauge);

impl<'a> InFlight<'a> {
    fn enter(gauge: &'a IntGauge) -> Self {
        gauge.inc();
        Self(gauge)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

// ---------------------------------------------------------------------------
// Rate limits
// ---------------------------------------------------------------------------

/// API quota as last reported by a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset: Option<DateTime<Utc>>,
}

impl RateLimit {
    /// Read the `x-ratelimit-*` headers, if present.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let number = |name: &str| -> Option<u64> { headers.get(name)?.to_str().ok()?.parse().ok() };
        Some(Self {
            limit: number("x-ratelimit-limit")?,
            remaining: number("x-ratelimit-remaining")?,
            reset: number("x-ratelimit-reset")
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        })
    }
}
