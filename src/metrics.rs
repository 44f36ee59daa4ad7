//! Prometheus metrics for operational visibility.
//!
//! Labels are limited to event kinds, platforms, error categories and
//! operation names. Device tokens, user ids and message content never appear
//! in a metric.

use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

const LATENCY_BUCKETS: [f64; 10] = [0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// All metrics for the service.
#[derive(Clone)]
pub struct Metrics {
    /// The Prometheus registry containing all metrics.
    pub registry: Registry,

    // === Dispatch Metrics ===
    /// Dispatch calls by event kind and report reason.
    pub dispatches_total: IntCounterVec,

    /// End-to-end dispatch duration by event kind.
    pub dispatch_duration_seconds: HistogramVec,

    /// Raw candidates returned by the directory.
    pub recipients_resolved_total: IntCounter,

    /// Directory lookups served by the degraded fallback scan.
    pub directory_degraded_total: IntCounter,

    // === Push Metrics ===
    /// Accepted pushes by apparent platform.
    pub push_sent_total: IntCounterVec,

    /// Rejected pushes by apparent platform and error category.
    pub push_failed_total: IntCounterVec,

    /// Provider calls by operation (one, batch, topic).
    pub provider_calls_total: IntCounterVec,

    /// Provider call duration by operation.
    pub provider_request_duration_seconds: HistogramVec,

    /// Transport retries by service.
    pub transport_retries_total: IntCounterVec,

    /// OAuth access token refreshes by service.
    pub auth_token_refreshes_total: IntCounterVec,

    // === Server Metrics ===
    /// Timestamp when the server started (Unix seconds).
    pub server_start_time_seconds: Gauge,

    /// Server version information.
    pub server_info: IntGaugeVec,
}

impl Metrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let dispatches_total = IntCounterVec::new(
            Opts::new(
                "proximity_push_dispatches_total",
                "Total number of dispatch calls by event kind and outcome",
            ),
            &["kind", "reason"],
        )?;
        registry.register(Box::new(dispatches_total.clone()))?;

        let dispatch_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "proximity_push_dispatch_duration_seconds",
                "Duration of dispatch calls in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["kind"],
        )?;
        registry.register(Box::new(dispatch_duration_seconds.clone()))?;

        let recipients_resolved_total = IntCounter::with_opts(Opts::new(
            "proximity_push_recipients_resolved_total",
            "Total number of candidate recipients returned by the directory",
        ))?;
        registry.register(Box::new(recipients_resolved_total.clone()))?;

        let directory_degraded_total = IntCounter::with_opts(Opts::new(
            "proximity_push_directory_degraded_total",
            "Total number of directory lookups served by the degraded fallback",
        ))?;
        registry.register(Box::new(directory_degraded_total.clone()))?;

        let push_sent_total = IntCounterVec::new(
            Opts::new(
                "proximity_push_push_sent_total",
                "Total number of pushes accepted by the provider",
            ),
            &["platform"],
        )?;
        registry.register(Box::new(push_sent_total.clone()))?;

        let push_failed_total = IntCounterVec::new(
            Opts::new(
                "proximity_push_push_failed_total",
                "Total number of pushes rejected or abandoned",
            ),
            &["platform", "category"],
        )?;
        registry.register(Box::new(push_failed_total.clone()))?;

        let provider_calls_total = IntCounterVec::new(
            Opts::new(
                "proximity_push_provider_calls_total",
                "Total number of push provider calls by operation",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(provider_calls_total.clone()))?;

        let provider_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "proximity_push_provider_request_duration_seconds",
                "Duration of push provider calls in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["operation"],
        )?;
        registry.register(Box::new(provider_request_duration_seconds.clone()))?;

        let transport_retries_total = IntCounterVec::new(
            Opts::new(
                "proximity_push_transport_retries_total",
                "Total number of transport-level retry attempts",
            ),
            &["service"],
        )?;
        registry.register(Box::new(transport_retries_total.clone()))?;

        let auth_token_refreshes_total = IntCounterVec::new(
            Opts::new(
                "proximity_push_auth_token_refreshes_total",
                "Total number of authentication token refreshes",
            ),
            &["service"],
        )?;
        registry.register(Box::new(auth_token_refreshes_total.clone()))?;

        let server_start_time_seconds = Gauge::with_opts(Opts::new(
            "proximity_push_server_start_time_seconds",
            "Unix timestamp when the server started",
        ))?;
        registry.register(Box::new(server_start_time_seconds.clone()))?;

        let server_info = IntGaugeVec::new(
            Opts::new(
                "proximity_push_server_info",
                "Server version and build information",
            ),
            &["version"],
        )?;
        registry.register(Box::new(server_info.clone()))?;

        Ok(Self {
            registry,
            dispatches_total,
            dispatch_duration_seconds,
            recipients_resolved_total,
            directory_degraded_total,
            push_sent_total,
            push_failed_total,
            provider_calls_total,
            provider_request_duration_seconds,
            transport_retries_total,
            auth_token_refreshes_total,
            server_start_time_seconds,
            server_info,
        })
    }

    /// Initialize server startup metrics.
    pub fn init_server_info(&self, version: &str) {
        self.server_start_time_seconds.set(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        );
        self.server_info.with_label_values(&[version]).set(1);
    }

    /// Record a finished dispatch call.
    pub fn record_dispatch(&self, kind: &str, reason: &str, duration_secs: f64) {
        self.dispatches_total
            .with_label_values(&[kind, reason])
            .inc();
        self.dispatch_duration_seconds
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    /// Record candidates returned by the directory.
    pub fn record_recipients_resolved(&self, count: usize) {
        self.recipients_resolved_total.inc_by(count as u64);
    }

    /// Record a lookup served by the degraded fallback.
    pub fn record_directory_degraded(&self) {
        self.directory_degraded_total.inc();
    }

    /// Record an accepted push.
    pub fn record_push_sent(&self, platform: &str) {
        self.push_sent_total.with_label_values(&[platform]).inc();
    }

    /// Record a rejected or abandoned push.
    pub fn record_push_failed(&self, platform: &str, category: &str) {
        self.push_failed_total
            .with_label_values(&[platform, category])
            .inc();
    }

    /// Record a provider call and its duration.
    pub fn observe_provider_call(&self, operation: &str, duration_secs: f64) {
        self.provider_calls_total
            .with_label_values(&[operation])
            .inc();
        self.provider_request_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Record transport retries.
    pub fn record_transport_retries(&self, service: &str, count: u32) {
        if count > 0 {
            self.transport_retries_total
                .with_label_values(&[service])
                .inc_by(u64::from(count));
        }
    }

    /// Record an auth token refresh.
    pub fn record_auth_token_refresh(&self, service: &str) {
        self.auth_token_refreshes_total
            .with_label_values(&[service])
            .inc();
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.init_server_info("0.1.0");
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_record_dispatch() {
        let metrics = Metrics::new().unwrap();

        metrics.record_dispatch("activity_nearby", "delivered", 0.2);
        metrics.record_dispatch("activity_nearby", "delivered", 0.3);
        metrics.record_dispatch("friend_request", "no_device_token", 0.01);

        assert_eq!(
            metrics
                .dispatches_total
                .with_label_values(&["activity_nearby", "delivered"])
                .get(),
            2
        );
        assert_eq!(
            metrics
                .dispatches_total
                .with_label_values(&["friend_request", "no_device_token"])
                .get(),
            1
        );
    }

    #[test]
    fn test_push_metrics() {
        let metrics = Metrics::new().unwrap();

        metrics.record_push_sent("ios");
        metrics.record_push_sent("android");
        metrics.record_push_failed("android", "unregistered_token");
        metrics.record_push_failed("android", "unregistered_token");

        assert_eq!(metrics.push_sent_total.with_label_values(&["ios"]).get(), 1);
        assert_eq!(
            metrics
                .push_failed_total
                .with_label_values(&["android", "unregistered_token"])
                .get(),
            2
        );
    }

    #[test]
    fn test_provider_and_transport_metrics() {
        let metrics = Metrics::new().unwrap();

        metrics.observe_provider_call("batch", 0.125);
        metrics.record_transport_retries("fcm", 0);
        metrics.record_transport_retries("fcm", 2);
        metrics.record_auth_token_refresh("fcm_oauth");

        assert_eq!(
            metrics
                .provider_calls_total
                .with_label_values(&["batch"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .transport_retries_total
                .with_label_values(&["fcm"])
                .get(),
            2
        );
    }

    #[test]
    fn test_directory_metrics() {
        let metrics = Metrics::new().unwrap();

        metrics.record_recipients_resolved(3);
        metrics.record_recipients_resolved(2);
        metrics.record_directory_degraded();

        assert_eq!(metrics.recipients_resolved_total.get(), 5);
        assert_eq!(metrics.directory_degraded_total.get(), 1);
    }

    #[test]
    fn test_render_text_format() {
        let metrics = Metrics::new().unwrap();
        metrics.record_dispatch("custom", "delivered", 0.05);

        let text = metrics.render().unwrap();
        assert!(text.contains("proximity_push_dispatches_total"));
        assert!(text.contains("kind=\"custom\""));
    }
}
