use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;

use super::record::LogRecord;
use crate::error::Result;

/// Newline-delimited JSON log file, rolled over when it grows past
/// `max_bytes` or has been open longer than `max_age`. Rolled files get a
/// timestamp suffix next to the live file.
pub struct RollingFileSink {
    path: PathBuf,
    max_bytes: u64,
    max_age: Duration,
    file: Option<File>,
    size: u64,
    opened_at: SystemTime,
}

impl RollingFileSink {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            max_age,
            file: None,
            size: 0,
            opened_at: SystemTime::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self) -> Result<&mut File> {
        let file = match self.file.take() {
            Some(f) => f,
            None => {
                if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    fs::create_dir_all(dir)?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?;
                let meta = file.metadata()?;
                self.size = meta.len();
                self.opened_at = meta
                    .created()
                    .or_else(|_| meta.modified())
                    .unwrap_or_else(|_| SystemTime::now());
                file
            }
        };
        Ok(self.file.insert(file))
    }

    fn needs_roll(&self) -> bool {
        if self.size == 0 {
            return false;
        }
        let too_old = self
            .opened_at
            .elapsed()
            .map(|age| age >= self.max_age)
            .unwrap_or(false);
        self.size >= self.max_bytes || too_old
    }

    /// Move the live file aside. The next write starts a fresh one.
    pub fn roll(&mut self) -> Result<Option<PathBuf>> {
        self.file = None;
        if !self.path.exists() {
            return Ok(None);
        }
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let rolled = PathBuf::from(format!("{}.{}", self.path.display(), stamp));
        fs::rename(&self.path, &rolled)?;
        self.size = 0;
        self.opened_at = SystemTime::now();
        Ok(Some(rolled))
    }

    /// Append records, rolling first when the live file is full or stale.
    /// A failed roll is logged and writing continues on the current file.
    pub fn write(&mut self, records: &[LogRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.open()?;
        if self.needs_roll() {
            match self.roll() {
                Ok(Some(rolled)) => tracing::debug!("[logs] rolled log file to {}", rolled.display()),
                Ok(None) => {}
                Err(e) => tracing::error!("[logs] failed to roll {}: {}", self.path.display(), e),
            }
        }
        let mut buf = Vec::with_capacity(records.len() * 512);
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }
        let file = self.open()?;
        file.write_all(&buf)?;
        file.flush()?;
        self.size += buf.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::record::{LoggedRequest, LoggedResponse};

    fn record(id: &str) -> LogRecord {
        LogRecord {
            id: id.into(),
            indices: vec!["books".into()],
            category: "search".into(),
            acl: "search".into(),
            request: LoggedRequest::default(),
            response: LoggedResponse::default(),
            timestamp: Utc::now(),
            request_changes: None,
            response_changes: None,
        }
    }

    #[test]
    fn test_appends_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log/arc/es.json");
        let mut sink = RollingFileSink::new(&path, 1 << 20, Duration::from_secs(3600));
        sink.write(&[record("1"), record("2")]).unwrap();
        sink.write(&[record("3")]).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let ids: Vec<String> = text
            .lines()
            .map(|l| serde_json::from_str::<LogRecord>(l).unwrap().id)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_rolls_on_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("es.json");
        let mut sink = RollingFileSink::new(&path, 10, Duration::from_secs(3600));
        sink.write(&[record("1")]).unwrap();
        sink.write(&[record("2")]).unwrap();
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 2);
        let live = fs::read_to_string(&path).unwrap();
        assert_eq!(live.lines().count(), 1);
        assert!(live.contains("\"id\":\"2\""));
    }
}
