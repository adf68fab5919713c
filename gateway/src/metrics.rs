//! # Prometheus Metrics
//!
//! Exposes operational metrics for the gateway. Scraped by Prometheus at
//! the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! Counters are deliberately coarse: they count requests, sealed replies,
//! and upstream calls, never anything derived from payload contents. The
//! sealed channel stays sealed, metrics included.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so
//! they do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the gateway.
///
/// Clone-friendly (wraps `Arc` internally via prometheus handles) so it
/// can be shared across request handlers.
#[derive(Clone)]
pub struct GatewayMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Total number of client API requests handled.
    pub requests_total: IntCounter,
    /// Total number of transactions created.
    pub transactions_created_total: IntCounter,
    /// Total number of key exchanges completed.
    pub key_exchanges_total: IntCounter,
    /// Total number of replies that went out sealed.
    pub sealed_replies_total: IntCounter,
    /// Total number of clear error replies (pre-key-exchange failures).
    pub clear_errors_total: IntCounter,
    /// Total number of payments confirmed.
    pub payments_confirmed_total: IntCounter,
    /// Total number of calls made to the upstream processor.
    pub upstream_calls_total: IntCounter,
    /// Histogram of upstream call latency in seconds.
    pub upstream_latency_seconds: Histogram,
}

impl GatewayMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("vela".into()), None)
            .expect("failed to create prometheus registry");

        let requests_total = IntCounter::new(
            "requests_total",
            "Total number of client API requests handled",
        )
        .expect("metric creation");
        registry
            .register(Box::new(requests_total.clone()))
            .expect("metric registration");

        let transactions_created_total = IntCounter::new(
            "transactions_created_total",
            "Total number of payment transactions created",
        )
        .expect("metric creation");
        registry
            .register(Box::new(transactions_created_total.clone()))
            .expect("metric registration");

        let key_exchanges_total = IntCounter::new(
            "key_exchanges_total",
            "Total number of completed key exchanges",
        )
        .expect("metric creation");
        registry
            .register(Box::new(key_exchanges_total.clone()))
            .expect("metric registration");

        let sealed_replies_total = IntCounter::new(
            "sealed_replies_total",
            "Total number of replies sent inside an envelope",
        )
        .expect("metric creation");
        registry
            .register(Box::new(sealed_replies_total.clone()))
            .expect("metric registration");

        let clear_errors_total = IntCounter::new(
            "clear_errors_total",
            "Total number of clear error replies before key exchange",
        )
        .expect("metric creation");
        registry
            .register(Box::new(clear_errors_total.clone()))
            .expect("metric registration");

        let payments_confirmed_total = IntCounter::new(
            "payments_confirmed_total",
            "Total number of payments confirmed by the processor",
        )
        .expect("metric creation");
        registry
            .register(Box::new(payments_confirmed_total.clone()))
            .expect("metric registration");

        let upstream_calls_total = IntCounter::new(
            "upstream_calls_total",
            "Total number of calls made to the upstream processor",
        )
        .expect("metric creation");
        registry
            .register(Box::new(upstream_calls_total.clone()))
            .expect("metric registration");

        let upstream_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "upstream_latency_seconds",
                "Latency of upstream processor calls in seconds",
            )
            .buckets(vec![
                0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(upstream_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            requests_total,
            transactions_created_total,
            key_exchanges_total,
            sealed_replies_total,
            clear_errors_total,
            payments_confirmed_total,
            upstream_calls_total,
            upstream_latency_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<GatewayMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_carries_namespaced_counters() {
        let metrics = GatewayMetrics::new();
        metrics.requests_total.inc();
        metrics.sealed_replies_total.inc();
        metrics.payments_confirmed_total.inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains("vela_requests_total 1"));
        assert!(text.contains("vela_sealed_replies_total 1"));
        assert!(text.contains("vela_payments_confirmed_total 1"));
        assert!(text.contains("vela_upstream_latency_seconds"));
    }

    #[test]
    fn latency_histogram_observes() {
        let metrics = GatewayMetrics::new();
        metrics.upstream_latency_seconds.observe(0.3);
        metrics.upstream_latency_seconds.observe(12.0);

        let text = metrics.encode().unwrap();
        assert!(text.contains("vela_upstream_latency_seconds_count 2"));
    }
}
