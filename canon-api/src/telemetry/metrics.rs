//! Prometheus Metrics Definitions
//!
//! All CANON metrics live in a dedicated registry so scrapes only expose
//! this service's series. Counters are recorded inline by the routes and
//! the middleware; gauges mirroring cache, consumer and feed state are
//! refreshed from [`AppState`] at scrape time.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use canon_core::CacheTier;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, Encoder,
    HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Registry, TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized on first use
pub static METRICS: Lazy<ApiResult<CanonMetrics>> = Lazy::new(CanonMetrics::new);

/// The global metrics, or `None` if registration failed at startup.
pub fn metrics() -> Option<&'static CanonMetrics> {
    METRICS.as_ref().ok()
}

fn registration_failed(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

/// Container for all CANON metrics.
#[derive(Clone)]
pub struct CanonMetrics {
    registry: Registry,

    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: IntCounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Reads through the coherence layer - labels: kind, tier
    pub cache_reads_total: IntCounterVec,

    /// Curation writes, each appending one change event on success
    /// - labels: operation, status
    pub mutations_total: IntCounterVec,

    /// Entries per cache tier - labels: tier
    pub cache_entries: IntGaugeVec,

    /// Invalidations applied since start
    pub cache_invalidations: IntGauge,

    /// Fills rejected by a version floor since start
    pub cache_rejected_fills: IntGauge,

    /// Full flushes since start
    pub cache_flushes: IntGauge,

    /// Keys held behind a version floor
    pub cache_version_floors: IntGauge,

    /// Newest sequence per partition - labels: partition
    pub feed_head: IntGaugeVec,

    /// Events between the feed head and the consumer checkpoint
    /// - labels: partition
    pub consumer_lag: IntGaugeVec,

    /// Cursor expirations the consumer recovered from
    pub consumer_cursor_expirations: IntGauge,
}

impl CanonMetrics {
    /// Create and register all metrics in a fresh registry.
    pub fn new() -> ApiResult<Self> {
        let registry = Registry::new_custom(Some("canon".to_string()), None)
            .map_err(|e| registration_failed("registry", e))?;

        #[cfg(target_os = "linux")]
        registry
            .register(Box::new(
                prometheus::process_collector::ProcessCollector::for_self(),
            ))
            .map_err(|e| registration_failed("process_collector", e))?;

        Ok(Self {
            http_requests_total: register_int_counter_vec_with_registry!(
                "http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"],
                registry
            )
            .map_err(|e| registration_failed("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec_with_registry!(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec(),
                registry
            )
            .map_err(|e| registration_failed("http_request_duration_seconds", e))?,

            cache_reads_total: register_int_counter_vec_with_registry!(
                "cache_reads_total",
                "Reads through the coherence layer by tier that served them",
                &["kind", "tier"],
                registry
            )
            .map_err(|e| registration_failed("cache_reads_total", e))?,

            mutations_total: register_int_counter_vec_with_registry!(
                "mutations_total",
                "Curation writes by operation and outcome",
                &["operation", "status"],
                registry
            )
            .map_err(|e| registration_failed("mutations_total", e))?,

            cache_entries: register_int_gauge_vec_with_registry!(
                "cache_entries",
                "Entries currently held per cache tier",
                &["tier"],
                registry
            )
            .map_err(|e| registration_failed("cache_entries", e))?,

            cache_invalidations: register_int_gauge_with_registry!(
                "cache_invalidations",
                "Invalidations applied since start",
                registry
            )
            .map_err(|e| registration_failed("cache_invalidations", e))?,

            cache_rejected_fills: register_int_gauge_with_registry!(
                "cache_rejected_fills",
                "Store reads rejected for predating an acknowledged change",
                registry
            )
            .map_err(|e| registration_failed("cache_rejected_fills", e))?,

            cache_flushes: register_int_gauge_with_registry!(
                "cache_flushes",
                "Full cache flushes since start",
                registry
            )
            .map_err(|e| registration_failed("cache_flushes", e))?,

            cache_version_floors: register_int_gauge_with_registry!(
                "cache_version_floors",
                "Keys whose acknowledged version the store has not yet served",
                registry
            )
            .map_err(|e| registration_failed("cache_version_floors", e))?,

            feed_head: register_int_gauge_vec_with_registry!(
                "feed_head_sequence",
                "Sequence of the newest event per partition",
                &["partition"],
                registry
            )
            .map_err(|e| registration_failed("feed_head_sequence", e))?,

            consumer_lag: register_int_gauge_vec_with_registry!(
                "consumer_lag_events",
                "Events not yet acknowledged by the invalidation consumer",
                &["partition"],
                registry
            )
            .map_err(|e| registration_failed("consumer_lag_events", e))?,

            consumer_cursor_expirations: register_int_gauge_with_registry!(
                "consumer_cursor_expirations",
                "Cursor expirations the invalidation consumer recovered from",
                registry
            )
            .map_err(|e| registration_failed("consumer_cursor_expirations", e))?,

            registry,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record which tier served a read. `kind` is `entity` or `mapping`.
    pub fn record_cache_read(&self, kind: &str, tier: CacheTier) {
        self.cache_reads_total
            .with_label_values(&[kind, tier.as_str()])
            .inc();
    }

    /// Record a curation write.
    pub fn record_mutation(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.mutations_total
            .with_label_values(&[operation, status])
            .inc();
    }

    /// Copy cache, feed and consumer state into the gauges.
    ///
    /// A component that fails to report keeps its previous values.
    pub async fn refresh(&self, state: &AppState) {
        match state.cache.stats().await {
            Ok(stats) => {
                self.cache_entries
                    .with_label_values(&[CacheTier::Edge.as_str()])
                    .set(clamp(stats.edge.entry_count));
                self.cache_entries
                    .with_label_values(&[CacheTier::Hot.as_str()])
                    .set(clamp(stats.hot.entry_count));
                self.cache_invalidations.set(clamp(stats.invalidations));
                self.cache_rejected_fills.set(clamp(stats.rejected_fills));
                self.cache_flushes.set(clamp(stats.flushes));
                self.cache_version_floors.set(clamp(stats.version_floors));
            }
            Err(e) => tracing::warn!(error = %e, "Failed to read cache stats for metrics"),
        }

        match state.feed.partitions().await {
            Ok(partitions) => {
                for summary in partitions {
                    self.feed_head
                        .with_label_values(&[&summary.partition.to_string()])
                        .set(clamp(summary.head));
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to read feed bounds for metrics"),
        }

        match state.consumer.lags().await {
            Ok(lags) => {
                for lag in lags {
                    self.consumer_lag
                        .with_label_values(&[&lag.partition.to_string()])
                        .set(clamp(lag.lag));
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to read consumer lag for metrics"),
        }

        self.consumer_cursor_expirations
            .set(clamp(state.consumer.metrics().cursor_expirations));
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn encode(&self) -> ApiResult<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ApiError::internal_error(format!("Failed to encode metrics: {}", e)))?;
        Ok(buffer)
    }
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
)]
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let encoded = match METRICS.as_ref() {
        Ok(metrics) => {
            metrics.refresh(&state).await;
            metrics.encode()
        }
        Err(e) => Err(e.clone()),
    };

    match encoded {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            e.into_response()
        }
    }
}
