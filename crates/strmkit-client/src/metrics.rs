//! Observability hooks (§6.4). The core calls these at well-defined points;
//! the host may ignore them by leaving the default [`NoopMetrics`] in place.

use std::time::Duration;

/// Counters/histograms the connection, producer, and consumer report to.
/// All methods have default no-op bodies so implementors only override what
/// they care about.
pub trait Metrics: Send + Sync + 'static {
    fn connection_opened(&self, _role: &'static str) {}
    fn connection_closed(&self, _role: &'static str) {}
    fn request_sent(&self, _api_key: i16) {}
    fn request_failed(&self, _api_key: i16) {}
    fn retry_attempted(&self, _api_key: i16, _attempt: u32) {}
    fn circuit_opened(&self, _role: &'static str) {}
    fn circuit_closed(&self, _role: &'static str) {}
    fn request_latency(&self, _api_key: i16, _latency: Duration) {}
    fn records_produced(&self, _topic: &str, _count: usize) {}
    fn records_consumed(&self, _topic: &str, _count: usize) {}
}

/// The default implementation: every hook is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}

/// Forwards every hook to a `tracing::info!`/`debug!` event, useful for local
/// development without wiring up a real metrics backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl Metrics for TracingMetrics {
    fn connection_opened(&self, role: &'static str) {
        tracing::info!(role, "connection opened");
    }

    fn connection_closed(&self, role: &'static str) {
        tracing::info!(role, "connection closed");
    }

    fn request_sent(&self, api_key: i16) {
        tracing::debug!(api_key, "request sent");
    }

    fn request_failed(&self, api_key: i16) {
        tracing::warn!(api_key, "request failed");
    }

    fn retry_attempted(&self, api_key: i16, attempt: u32) {
        tracing::warn!(api_key, attempt, "retrying request");
    }

    fn circuit_opened(&self, role: &'static str) {
        tracing::warn!(role, "circuit breaker opened");
    }

    fn circuit_closed(&self, role: &'static str) {
        tracing::info!(role, "circuit breaker closed");
    }

    fn request_latency(&self, api_key: i16, latency: Duration) {
        tracing::trace!(api_key, ?latency, "request latency");
    }

    fn records_produced(&self, topic: &str, count: usize) {
        tracing::debug!(topic, count, "records produced");
    }

    fn records_consumed(&self, topic: &str, count: usize) {
        tracing::debug!(topic, count, "records consumed");
    }
}
