use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{GatewayError, Result};

/// Gateway counters, registered in a registry owned by the running app.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    /// Log records dropped because the writer queue was full.
    pub lost_logs: IntCounter,
    /// Analytics records dropped because the analytics queue was full.
    pub lost_analytics: IntCounter,
    /// Requests refused with 429, labelled by limiter (`acl` or `ip`).
    pub rate_limited: IntCounterVec,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let lost_logs = IntCounter::new(
            "arcgate_lost_logs_total",
            "Log records dropped because the log queue was full",
        )
        .map_err(metric_error)?;
        let lost_analytics = IntCounter::new(
            "arcgate_lost_analytics_total",
            "Analytics records dropped because the analytics queue was full",
        )
        .map_err(metric_error)?;
        let rate_limited = IntCounterVec::new(
            Opts::new(
                "arcgate_rate_limited_total",
                "Requests rejected by the rate limiter",
            ),
            &["limiter"],
        )
        .map_err(metric_error)?;

        registry
            .register(Box::new(lost_logs.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(lost_analytics.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(rate_limited.clone()))
            .map_err(metric_error)?;

        Ok(Self {
            registry,
            lost_logs,
            lost_analytics,
            rate_limited,
        })
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            tracing::error!("[metrics] failed to encode metrics: {}", e);
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

fn metric_error(e: prometheus::Error) -> GatewayError {
    GatewayError::Internal(format!("failed to register metric: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.lost_logs.inc();
        metrics.rate_limited.with_label_values(&["acl"]).inc();
        let text = metrics.render();
        assert!(text.contains("arcgate_lost_logs_total 1"));
        assert!(text.contains("arcgate_lost_analytics_total 0"));
        assert!(text.contains("arcgate_rate_limited_total{limiter=\"acl\"} 1"));
    }
}
