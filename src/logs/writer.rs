use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::json;

use super::record::LogRecord;
use super::sink::RollingFileSink;
use crate::engine::EngineClient;
use crate::metrics::GatewayMetrics;
use crate::queue::DropOldestQueue;

/// Daily log index a record is written to.
pub fn log_index_for(base: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", base, at.format("%Y.%m.%d"))
}

/// Non-blocking hand-off from request handlers to the background writer.
#[derive(Clone)]
pub struct LogWriter {
    queue: Arc<DropOldestQueue<LogRecord>>,
}

impl LogWriter {
    pub fn new(capacity: usize, metrics: &GatewayMetrics) -> Self {
        Self {
            queue: Arc::new(DropOldestQueue::new(capacity, metrics.lost_logs.clone())),
        }
    }

    /// Queue a record. Never blocks; the oldest record is dropped when full.
    pub fn submit(&self, record: LogRecord) {
        if !self.queue.push(record) {
            tracing::warn!("[logs] log queue full, dropped the oldest record");
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Stop accepting work; the writer drains what is queued and exits.
    pub fn close(&self) {
        self.queue.close();
    }

    /// Write batches to the rolling file, then bulk-index them. Runs until
    /// [`Self::close`] is called and the queue is drained.
    pub async fn run(
        self,
        sink: RollingFileSink,
        engine: Option<EngineClient>,
        logs_index: String,
    ) {
        let sink = Arc::new(Mutex::new(sink));
        loop {
            let batch = self.queue.next_batch().await;
            if batch.is_empty() {
                break;
            }
            let batch = Arc::new(batch);

            let file_sink = sink.clone();
            let file_batch = batch.clone();
            let written = tokio::task::spawn_blocking(move || {
                file_sink
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .write(&file_batch)
            })
            .await;
            match written {
                Ok(Ok(())) => tracing::debug!("[logs] wrote {} records", batch.len()),
                Ok(Err(e)) => tracing::error!("[logs] failed to write log file: {}", e),
                Err(e) => tracing::error!("[logs] log file writer panicked: {}", e),
            }

            if let Some(engine) = &engine {
                index_batch(engine, &logs_index, &batch).await;
            }
        }
        tracing::debug!("[logs] writer stopped");
    }
}

async fn index_batch(engine: &EngineClient, logs_index: &str, batch: &[LogRecord]) {
    let mut payload = String::new();
    for record in batch {
        let action = json!({
            "index": {
                "_index": log_index_for(logs_index, record.timestamp),
                "_id": record.id,
            }
        });
        match serde_json::to_string(record) {
            Ok(doc) => {
                payload.push_str(&action.to_string());
                payload.push('\n');
                payload.push_str(&doc);
                payload.push('\n');
            }
            Err(e) => tracing::error!("[logs] failed to encode record {}: {}", record.id, e),
        }
    }
    if payload.is_empty() {
        return;
    }
    match engine.bulk(payload).await {
        Ok(false) => tracing::debug!("[logs] indexed {} records", batch.len()),
        Ok(true) => tracing::error!("[logs] some of {} records failed to index", batch.len()),
        Err(e) => tracing::error!("[logs] failed to index {} records: {}", batch.len(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::record::{LoggedRequest, LoggedResponse};
    use chrono::TimeZone;
    use std::time::Duration;

    fn record(id: &str) -> LogRecord {
        LogRecord {
            id: id.into(),
            indices: vec![],
            category: "cat".into(),
            acl: "cat".into(),
            request: LoggedRequest::default(),
            response: LoggedResponse::default(),
            timestamp: Utc::now(),
            request_changes: None,
            response_changes: None,
        }
    }

    #[test]
    fn test_daily_index_name() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(log_index_for(".logs", at), ".logs-2024.03.09");
    }

    #[tokio::test]
    async fn test_writer_drains_queue_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("es.json");
        let metrics = GatewayMetrics::new().unwrap();
        let writer = LogWriter::new(16, &metrics);
        writer.submit(record("a"));
        writer.submit(record("b"));
        writer.close();
        let sink = RollingFileSink::new(&path, 1 << 20, Duration::from_secs(3600));
        writer.clone().run(sink, None, ".logs".into()).await;
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(writer.pending(), 0);
    }

    #[test]
    fn test_full_queue_counts_lost_logs() {
        let metrics = GatewayMetrics::new().unwrap();
        let writer = LogWriter::new(1, &metrics);
        writer.submit(record("a"));
        writer.submit(record("b"));
        assert_eq!(metrics.lost_logs.get(), 1);
        assert_eq!(writer.pending(), 1);
    }
}
