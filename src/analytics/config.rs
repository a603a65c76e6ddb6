use crate::config::GatewayConfig;

/// Analytics recorder settings. The index comes from the gateway config;
/// the flush knobs from `ARC_ANALYTICS_*` variables.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Whether search sessions are recorded at all.
    pub enabled: bool,
    /// Index the sessions are written to.
    pub index: String,
    /// How often buffered records are flushed (seconds).
    pub flush_interval_secs: u64,
    /// Flush early once this many records are buffered.
    pub flush_size: usize,
    /// Bounded queue capacity; the oldest record is dropped when full.
    pub queue_capacity: usize,
    /// Number of hit ids kept as the response snapshot.
    pub hits_snapshot: usize,
}

impl AnalyticsConfig {
    pub fn from_gateway(config: &GatewayConfig) -> Self {
        Self {
            enabled: std::env::var("ARC_ANALYTICS_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            index: config.analytics_index.clone(),
            flush_interval_secs: std::env::var("ARC_ANALYTICS_FLUSH_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            flush_size: std::env::var("ARC_ANALYTICS_FLUSH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1_000),
            queue_capacity: config.queue_capacity,
            hits_snapshot: 10,
        }
    }

    /// Config with analytics disabled (for tests).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            index: ".analytics".to_string(),
            flush_interval_secs: 3600,
            flush_size: 100_000,
            queue_capacity: 16,
            hits_snapshot: 10,
        }
    }
}
