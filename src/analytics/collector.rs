use std::sync::Arc;

use serde_json::json;
use tokio::sync::Notify;

use super::config::AnalyticsConfig;
use super::schema::{Interaction, SearchRecord};
use crate::engine::EngineClient;
use crate::metrics::GatewayMetrics;
use crate::queue::DropOldestQueue;

#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsEvent {
    Search(SearchRecord),
    Interaction(Interaction),
}

/// Central analytics recorder.
///
/// Request handlers push events onto a bounded queue; a background loop
/// drains it on a timer (or once `flush_size` events are waiting) and
/// writes them to the analytics index with one `_bulk` call.
pub struct AnalyticsCollector {
    config: AnalyticsConfig,
    queue: DropOldestQueue<AnalyticsEvent>,
    flush_now: Notify,
    shutdown: Notify,
}

impl AnalyticsCollector {
    pub fn new(config: AnalyticsConfig, metrics: &GatewayMetrics) -> Arc<Self> {
        Arc::new(Self {
            queue: DropOldestQueue::new(config.queue_capacity, metrics.lost_analytics.clone()),
            config,
            flush_now: Notify::new(),
            shutdown: Notify::new(),
        })
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn record_search(&self, record: SearchRecord) {
        self.push(AnalyticsEvent::Search(record));
    }

    pub fn record_interaction(&self, interaction: Interaction) {
        self.push(AnalyticsEvent::Interaction(interaction));
    }

    fn push(&self, event: AnalyticsEvent) {
        if !self.config.enabled {
            return;
        }
        if !self.queue.push(event) {
            tracing::warn!("[analytics] queue full, dropped the oldest event");
        }
        if self.queue.len() >= self.config.flush_size {
            self.flush_now.notify_one();
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Drain the queue into a bulk payload. Searches are written before the
    /// interactions that may refer to them.
    pub fn drain_payload(&self) -> Option<(String, usize)> {
        let events = self.queue.drain();
        if events.is_empty() {
            return None;
        }
        let count = events.len();
        let (searches, interactions): (Vec<_>, Vec<_>) = events
            .into_iter()
            .partition(|e| matches!(e, AnalyticsEvent::Search(_)));
        let mut payload = String::new();
        for event in searches.into_iter().chain(interactions) {
            let (action, doc) = match event {
                AnalyticsEvent::Search(record) => {
                    let doc = match serde_json::to_value(&record) {
                        Ok(doc) => doc,
                        Err(e) => {
                            tracing::error!("[analytics] failed to encode search record: {}", e);
                            continue;
                        }
                    };
                    (
                        json!({ "index": { "_index": self.config.index, "_id": record.search_id } }),
                        doc,
                    )
                }
                AnalyticsEvent::Interaction(interaction) => (
                    json!({
                        "update": {
                            "_index": self.config.index,
                            "_id": interaction.search_id,
                            "retry_on_conflict": 3
                        }
                    }),
                    json!({ "doc": interaction.patch() }),
                ),
            };
            payload.push_str(&action.to_string());
            payload.push('\n');
            payload.push_str(&doc.to_string());
            payload.push('\n');
        }
        Some((payload, count))
    }

    pub async fn flush(&self, engine: &EngineClient) {
        let Some((payload, count)) = self.drain_payload() else {
            return;
        };
        match engine.bulk(payload).await {
            Ok(false) => tracing::debug!("[analytics] Flushed {} events", count),
            Ok(true) => tracing::error!("[analytics] Some of {} events failed to index", count),
            Err(e) => tracing::error!("[analytics] Failed to flush {} events: {}", count, e),
        }
    }

    /// Background flush loop. Should be spawned as a tokio task.
    pub async fn run_flush_loop(self: Arc<Self>, engine: EngineClient) {
        let interval = tokio::time::Duration::from_secs(self.config.flush_interval_secs.max(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush(&engine).await,
                _ = self.flush_now.notified() => self.flush(&engine).await,
                _ = self.shutdown.notified() => {
                    self.flush(&engine).await;
                    tracing::info!("[analytics] Flush loop shutting down");
                    break;
                }
            }
        }
    }

    /// Signal the flush loop to stop after a final flush.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
