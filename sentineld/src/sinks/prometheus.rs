//! Prometheus sink: instead of pushing, it accumulates counters that the
//! `/metrics/prometheus` HTTP route (see `crate::api`) scrapes on demand.
//! `send` itself never fails - there is nothing external to fail against.

use super::Sink;
use crate::alert::Alert;
use async_trait::async_trait;
use sentineld_common::Severity;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct PrometheusSink {
    by_severity: [AtomicU64; 5],
}

impl PrometheusSink {
    pub fn new() -> Self {
        Self {
            by_severity: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn index(severity: Severity) -> usize {
        match severity {
            Severity::Debug => 0,
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    /// Renders the accumulated counters in the Prometheus text exposition
    /// format.
    pub fn render(&self) -> String {
        let labels = ["debug", "info", "warning", "high", "critical"];
        let mut out = String::from("# HELP sentineld_alerts_total Alerts emitted by severity\n");
        out.push_str("# TYPE sentineld_alerts_total counter\n");
        for (i, label) in labels.iter().enumerate() {
            let count = self.by_severity[i].load(Ordering::Relaxed);
            out.push_str(&format!("sentineld_alerts_total{{severity=\"{label}\"}} {count}\n"));
        }
        out
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for PrometheusSink {
    fn name(&self) -> &'static str {
        "prometheus"
    }

    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        self.by_severity[Self::index(alert.severity)].fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertKind;

    #[tokio::test]
    async fn render_reflects_accumulated_counts() {
        let sink = PrometheusSink::new();
        let alert = Alert {
            timestamp: 0,
            severity: Severity::Critical,
            kind: AlertKind::Spike,
            pid: 1,
            syscall_nr: None,
            observed: None,
            expected: None,
            stddev: None,
            z_score: None,
            message: "x".into(),
        };
        sink.send(&alert).await.unwrap();
        sink.send(&alert).await.unwrap();
        let rendered = sink.render();
        assert!(rendered.contains("severity=\"critical\"} 2"));
    }
}
