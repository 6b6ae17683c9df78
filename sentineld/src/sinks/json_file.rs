//! Append-only newline-delimited JSON sink, rotated to `<path>.old` once
//! it crosses `max_bytes` (single generation kept, matching the other
//! ndjson writers in this daemon).

use super::Sink;
use crate::alert::Alert;
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

pub struct JsonFileSink {
    path: PathBuf,
    max_bytes: u64,
    written: Mutex<u64>,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let written = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            max_bytes,
            written: Mutex::new(written),
        })
    }

    fn rotate_if_needed(&self, written: &mut u64) -> std::io::Result<()> {
        if *written < self.max_bytes {
            return Ok(());
        }
        let old_path = self.path.with_extension("ndjson.old");
        std::fs::rename(&self.path, old_path)?;
        *written = 0;
        Ok(())
    }
}

#[async_trait]
impl Sink for JsonFileSink {
    fn name(&self) -> &'static str {
        "json_file"
    }

    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        let line = serde_json::to_string(alert)?;
        let mut written = self.written.lock().unwrap();
        self.rotate_if_needed(&mut written)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        *written += line.len() as u64 + 1;
        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        let file = std::fs::OpenOptions::new().append(true).open(&self.path)?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentineld_common::Severity;

    fn sample_alert(pid: u32) -> Alert {
        Alert {
            timestamp: 0,
            severity: Severity::Warning,
            kind: crate::alert::AlertKind::Spike,
            pid,
            syscall_nr: None,
            observed: None,
            expected: None,
            stddev: None,
            z_score: None,
            message: "test".into(),
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_alert() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("alerts.ndjson"), 1_000_000).unwrap();
        sink.send(&sample_alert(1)).await.unwrap();
        sink.send(&sample_alert(2)).await.unwrap();
        let contents = std::fs::read_to_string(dir.path().join("alerts.ndjson")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn rotates_to_old_once_over_the_size_cap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.ndjson");
        let sink = JsonFileSink::new(&path, 10).unwrap();
        sink.send(&sample_alert(1)).await.unwrap();
        sink.send(&sample_alert(2)).await.unwrap();
        assert!(dir.path().join("alerts.ndjson.old").exists());
        assert!(path.exists());
    }
}
