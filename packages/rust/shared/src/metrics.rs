//! Prometheus metrics for outgoing HTTP traffic.
//!
//! Every [`MetricsRegistry`] wraps its own `prometheus::Registry`, so
//! separate runs (and tests) can use separate registries or reset a shared
//! one between builds.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::error::Result;

/// Counter of API requests sent by repository-host clients, by status code and method.
pub const CLIENT_API_REQUESTS_TOTAL: &str = "client_api_requests_total";
/// Gauge of requests currently awaiting a response.
pub const CLIENT_IN_FLIGHT_REQUESTS: &str = "client_in_flight_requests";
/// Histogram of request latencies.
pub const REQUEST_DURATION_SECONDS: &str = "request_duration_seconds";

/// Status label recorded when no response arrived.
pub const NO_RESPONSE: &str = "error";

// ---------------------------------------------------------------------------
// Client metrics
// ---------------------------------------------------------------------------

/// The three HTTP client collectors. Clones share the underlying series.
#[derive(Clone)]
pub struct ClientMetrics {
    pub requests: IntCounterVec,
    pub in_flight: IntGauge,
    pub duration: HistogramVec,
}

impl ClientMetrics {
    fn new() -> Result<Self> {
        Ok(Self {
            requests: IntCounterVec::new(
                Opts::new(CLIENT_API_REQUESTS_TOTAL, "A counter for requests from the wrapped client."),
                &["code", "method"],
            )?,
            in_flight: IntGauge::new(
                CLIENT_IN_FLIGHT_REQUESTS,
                "A gauge of in-flight requests for the wrapped client.",
            )?,
            duration: HistogramVec::new(
                HistogramOpts::new(REQUEST_DURATION_SECONDS, "A histogram of request latencies."),
                &[],
            )?,
        })
    }

    /// The client collectors of `registry`, registered on first use.
    pub fn register(registry: &MetricsRegistry) -> Result<Self> {
        registry.client_metrics()
    }

    /// Record one finished request.
    pub fn observe(&self, method: &str, code: &str, elapsed: Duration) {
        self.requests.with_label_values(&[code, method]).inc();
        self.duration
            .with_label_values(&[])
            .observe(elapsed.as_secs_f64());
    }

    fn reset(&self) {
        self.requests.reset();
        self.in_flight.set(0);
        self.duration.reset();
    }
}

impl fmt::Debug for ClientMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientMetrics")
            .field("in_flight", &self.in_flight.get())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A prometheus registry plus the docforge collectors registered in it.
#[derive(Default)]
pub struct MetricsRegistry {
    registry: Registry,
    client: Mutex<Option<ClientMetrics>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying registry, for exporters.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn client_metrics(&self) -> Result<ClientMetrics> {
        let mut client = self
            .client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(metrics) = client.as_ref() {
            return Ok(metrics.clone());
        }
        let metrics = ClientMetrics::new()?;
        self.registry.register(Box::new(metrics.requests.clone()))?;
        self.registry.register(Box::new(metrics.in_flight.clone()))?;
        self.registry.register(Box::new(metrics.duration.clone()))?;
        *client = Some(metrics.clone());
        Ok(metrics)
    }

    /// Clear every series. Handles stay valid.
    pub fn reset(&self) {
        let client = self
            .client
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(metrics) = client.as_ref() {
            metrics.reset();
        }
    }

    /// Prometheus text exposition of all collectors.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_idempotent() {
        let registry = MetricsRegistry::new();
        let a = ClientMetrics::register(&registry).unwrap();
        let b = ClientMetrics::register(&registry).unwrap();
        a.observe("GET", "200", Duration::from_millis(5));
        b.observe("GET", "200", Duration::from_millis(5));

        assert_eq!(a.requests.with_label_values(&["200", "GET"]).get(), 2);
        assert_eq!(registry.registry().gather().len(), 3);
    }

    #[test]
    fn reset_clears_shared_handles() {
        let registry = MetricsRegistry::new();
        let metrics = ClientMetrics::register(&registry).unwrap();
        metrics.observe("HEAD", "404", Duration::from_millis(20));
        metrics.in_flight.inc();

        registry.reset();

        assert_eq!(metrics.in_flight.get(), 0);
        assert_eq!(metrics.requests.with_label_values(&["404", "HEAD"]).get(), 0);
        assert_eq!(metrics.duration.with_label_values(&[]).get_sample_count(), 0);
    }

    #[test]
    fn render_lists_client_collectors() {
        let registry = MetricsRegistry::new();
        let metrics = ClientMetrics::register(&registry).unwrap();
        metrics.observe("GET", "200", Duration::from_millis(50));

        let text = registry.render().unwrap();
        assert!(text.contains(r#"client_api_requests_total{code="200",method="GET"} 1"#));
        assert!(text.contains("# TYPE client_in_flight_requests gauge"));
        assert!(text.contains("request_duration_seconds_count 1"));
    }
}
