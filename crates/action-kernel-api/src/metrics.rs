//! Prometheus metrics for the dispatch surface
//!
//! - `action_kernel_dispatches_total` (counter) - dispatches by envelope code
//! - `action_kernel_dispatch_duration_seconds` (histogram) - dispatch latency by outcome
//! - `action_kernel_audit_queue` (gauge) - audit deliveries, retries and drops

use action_kernel_audit::QueueStats;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry};
use std::sync::Arc;

use crate::error::{ServerError, ServerResult};

const NAMESPACE: &str = "action_kernel";

/// Code recorded for successful dispatches
pub const SUCCESS_CODE: &str = "OK";

pub struct DispatchMetrics {
    dispatches_total: CounterVec,
    duration_seconds: HistogramVec,
    audit_queue: IntGaugeVec,
}

impl DispatchMetrics {
    pub fn new(registry: &Registry) -> ServerResult<Self> {
        let dispatches_total = CounterVec::new(
            Opts::new("dispatches_total", "Total number of action dispatches by outcome code").namespace(NAMESPACE),
            &["code"],
        )?;

        let duration_seconds = HistogramVec::new(
            HistogramOpts::new("dispatch_duration_seconds", "Action dispatch duration in seconds")
                .namespace(NAMESPACE)
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["outcome"],
        )?;

        let audit_queue = IntGaugeVec::new(
            Opts::new("audit_queue", "Audit queue delivery counters").namespace(NAMESPACE),
            &["kind"],
        )?;

        registry.register(Box::new(dispatches_total.clone()))?;
        registry.register(Box::new(duration_seconds.clone()))?;
        registry.register(Box::new(audit_queue.clone()))?;

        Ok(Self {
            dispatches_total,
            duration_seconds,
            audit_queue,
        })
    }

    /// Record one dispatch; `code` is `None` on success
    pub fn record_dispatch(&self, code: Option<&str>, duration_secs: f64) {
        let outcome = if code.is_none() { "success" } else { "failure" };
        self.dispatches_total
            .with_label_values(&[code.unwrap_or(SUCCESS_CODE)])
            .inc();
        self.duration_seconds
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    pub fn observe_audit(&self, stats: &QueueStats) {
        let clamp = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        self.audit_queue
            .with_label_values(&["delivered"])
            .set(clamp(stats.delivered()));
        self.audit_queue.with_label_values(&["retried"]).set(clamp(stats.retried()));
        self.audit_queue.with_label_values(&["dropped"]).set(clamp(stats.dropped()));
    }
}

pub struct MetricsRegistry {
    registry: Arc<Registry>,
    dispatch: DispatchMetrics,
}

impl MetricsRegistry {
    pub fn new() -> ServerResult<Self> {
        let registry = Arc::new(Registry::new());
        let dispatch = DispatchMetrics::new(&registry)?;
        Ok(Self { registry, dispatch })
    }

    pub fn dispatch(&self) -> &DispatchMetrics {
        &self.dispatch
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Prometheus text exposition format
    pub fn encode_text(&self) -> ServerResult<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ServerError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_counters() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.dispatch().record_dispatch(None, 0.002);
        metrics.dispatch().record_dispatch(Some("POLICY_DENIED"), 0.001);
        metrics.dispatch().record_dispatch(Some("POLICY_DENIED"), 0.001);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("action_kernel_dispatches_total{code=\"OK\"} 1"));
        assert!(text.contains("action_kernel_dispatches_total{code=\"POLICY_DENIED\"} 2"));
        assert!(text.contains("action_kernel_dispatch_duration_seconds_count{outcome=\"failure\"} 2"));
    }

    #[test]
    fn test_audit_gauges() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.dispatch().observe_audit(&QueueStats::default());

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("action_kernel_audit_queue{kind=\"dropped\"} 0"));
    }
}
