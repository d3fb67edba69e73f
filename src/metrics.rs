//! Plugin Metrics
//!
//! Prometheus counters and latency histograms for the plugin operations,
//! kept in a private registry so tests and embedders do not collide on the
//! global one.

use crate::error::{Error, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Outcome label of a successful operation
pub const OUTCOME_OK: &str = "ok";

/// Metrics of the volume plugin API
#[derive(Clone)]
pub struct PluginMetrics {
    registry: Registry,
    requests: IntCounterVec,
    duration: HistogramVec,
}

impl PluginMetrics {
    /// Create and register the plugin metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new(
                "linstor_volume_requests_total",
                "Volume plugin requests by operation and outcome",
            ),
            &["operation", "outcome"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "linstor_volume_request_duration_seconds",
                "Duration of volume plugin requests",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            requests,
            duration,
        })
    }

    /// Record one finished operation. Failures are labelled by error kind.
    pub fn observe(&self, operation: &str, error: Option<&Error>, elapsed: Duration) {
        let outcome = error.map_or(OUTCOME_OK, |e| e.kind().as_str());
        self.requests
            .with_label_values(&[operation, outcome])
            .inc();
        self.duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    /// Number of recorded requests for an operation and outcome
    pub fn count(&self, operation: &str, outcome: &str) -> u64 {
        self.requests.with_label_values(&[operation, outcome]).get()
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_by_outcome() {
        let metrics = PluginMetrics::new().unwrap();
        let not_managed = Error::NotManaged { name: "web".into() };

        metrics.observe("get", None, Duration::from_millis(3));
        metrics.observe("get", Some(&not_managed), Duration::from_millis(1));
        metrics.observe("get", None, Duration::from_millis(2));

        assert_eq!(metrics.count("get", OUTCOME_OK), 2);
        assert_eq!(metrics.count("get", "ownership"), 1);
        assert_eq!(metrics.count("mount", OUTCOME_OK), 0);
    }

    #[test]
    fn test_render() {
        let metrics = PluginMetrics::new().unwrap();
        metrics.observe("create", None, Duration::from_millis(5));

        let text = metrics.render().unwrap();
        assert!(text.contains("linstor_volume_requests_total{operation=\"create\",outcome=\"ok\"} 1"));
        assert!(text.contains("linstor_volume_request_duration_seconds_count{operation=\"create\"} 1"));
    }
}
