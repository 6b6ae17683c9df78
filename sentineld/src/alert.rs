//! The `Alert` type shared by the anomaly detector and the correlation
//! engine, plus the token-bucket queue that admits them toward the
//! [`crate::sinks`] fan-out.

use sentineld_common::Severity;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    Spike,
    NewSyscall,
    Correlation,
    Other,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Spike => "spike",
            AlertKind::NewSyscall => "new_syscall",
            AlertKind::Correlation => "correlation",
            AlertKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp: u64,
    pub severity: Severity,
    pub kind: AlertKind,
    pub pid: u32,
    pub syscall_nr: Option<u32>,
    pub observed: Option<u64>,
    pub expected: Option<f64>,
    pub stddev: Option<f64>,
    pub z_score: Option<f64>,
    pub message: String,
}

impl Alert {
    pub fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Token-bucket rate limiter guarding the alert fan-out. Capacity `burst`,
/// refilled at `alerts_per_minute / 60` tokens per second. Alerts that
/// arrive with no token available are dropped, not queued.
pub struct AlertQueue {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: std::time::Instant,
    dropped: u64,
}

impl AlertQueue {
    pub fn new(burst: u32, alerts_per_minute: u32) -> Self {
        Self {
            capacity: burst as f64,
            tokens: burst as f64,
            refill_per_sec: alerts_per_minute as f64 / 60.0,
            last_refill: std::time::Instant::now(),
            dropped: 0,
        }
    }

    fn refill(&mut self) {
        let now = std::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
    }

    /// Attempts to admit `alert`. Returns it back on success (ownership
    /// passes to whatever the caller does with it next - typically the
    /// Alert Router); returns `None` if the bucket is exhausted, in which
    /// case the alert's owned fields are simply dropped here.
    pub fn admit(&mut self, alert: Alert) -> Option<Alert> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Some(alert)
        } else {
            self.dropped += 1;
            None
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
