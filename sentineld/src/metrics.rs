use sentineld_common::Severity;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;

const SEVERITY_SLOTS: usize = 5;

/// Global metrics for the daemon. Counters live on the hot path, so every
/// field is atomic; `rollup()` derives the one windowed gauge
/// (`events_per_sec`) from a per-second counter once a second.
pub struct Metrics {
    pub start_time: SystemTime,
    events_total: AtomicU64,
    events_this_sec: AtomicU64,
    events_per_sec: AtomicU64,
    rb_overflows: AtomicU64,
    total_alerts: AtomicU64,
    alerts_by_severity: [AtomicU64; SEVERITY_SLOTS],
    alerts_dropped: AtomicU64,
    total_matches: AtomicU64,
    matches_by_severity: [AtomicU64; SEVERITY_SLOTS],
    processes_terminated: AtomicU64,
    correlation_alerts: AtomicU64,
    sink_failures: AtomicU64,
    baselines_tracked: AtomicUsize,
    learning_mode: AtomicBool,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: SystemTime::now(),
            events_total: AtomicU64::new(0),
            events_this_sec: AtomicU64::new(0),
            events_per_sec: AtomicU64::new(0),
            rb_overflows: AtomicU64::new(0),
            total_alerts: AtomicU64::new(0),
            alerts_by_severity: std::array::from_fn(|_| AtomicU64::new(0)),
            alerts_dropped: AtomicU64::new(0),
            total_matches: AtomicU64::new(0),
            matches_by_severity: std::array::from_fn(|_| AtomicU64::new(0)),
            processes_terminated: AtomicU64::new(0),
            correlation_alerts: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            baselines_tracked: AtomicUsize::new(0),
            learning_mode: AtomicBool::new(true),
        }
    }

    fn severity_index(severity: Severity) -> usize {
        match severity {
            Severity::Debug => 0,
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    pub fn inc_event(&self) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        self.events_this_sec.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_total(&self) -> u64 {
        self.events_total.load(Ordering::Relaxed)
    }

    /// Called once a second from the scrape tick.
    pub fn rollup(&self) {
        let per_sec = self.events_this_sec.swap(0, Ordering::Relaxed);
        self.events_per_sec.store(per_sec, Ordering::Relaxed);
    }

    pub fn events_per_sec(&self) -> u64 {
        self.events_per_sec.load(Ordering::Relaxed)
    }

    pub fn inc_rb_overflow(&self) {
        self.rb_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rb_overflows(&self, n: u64) {
        if n > 0 {
            self.rb_overflows.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn rb_overflows(&self) -> u64 {
        self.rb_overflows.load(Ordering::Relaxed)
    }

    pub fn inc_alert(&self, severity: Severity) {
        self.total_alerts.fetch_add(1, Ordering::Relaxed);
        self.alerts_by_severity[Self::severity_index(severity)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_alerts(&self) -> u64 {
        self.total_alerts.load(Ordering::Relaxed)
    }

    pub fn alerts_by_severity(&self) -> [u64; SEVERITY_SLOTS] {
        std::array::from_fn(|i| self.alerts_by_severity[i].load(Ordering::Relaxed))
    }

    pub fn inc_alerts_dropped(&self) {
        self.alerts_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn alerts_dropped(&self) -> u64 {
        self.alerts_dropped.load(Ordering::Relaxed)
    }

    pub fn inc_match(&self, severity: Severity) {
        self.total_matches.fetch_add(1, Ordering::Relaxed);
        self.matches_by_severity[Self::severity_index(severity)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_matches(&self) -> u64 {
        self.total_matches.load(Ordering::Relaxed)
    }

    pub fn matches_by_severity(&self) -> [u64; SEVERITY_SLOTS] {
        std::array::from_fn(|i| self.matches_by_severity[i].load(Ordering::Relaxed))
    }

    pub fn inc_processes_terminated(&self) {
        self.processes_terminated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processes_terminated(&self) -> u64 {
        self.processes_terminated.load(Ordering::Relaxed)
    }

    pub fn inc_correlation_alert(&self) {
        self.correlation_alerts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn correlation_alerts(&self) -> u64 {
        self.correlation_alerts.load(Ordering::Relaxed)
    }

    pub fn inc_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    pub fn set_baselines_tracked(&self, count: usize) {
        self.baselines_tracked.store(count, Ordering::Relaxed);
    }

    pub fn baselines_tracked(&self) -> usize {
        self.baselines_tracked.load(Ordering::Relaxed)
    }

    pub fn set_learning_mode(&self, learning: bool) {
        self.learning_mode.store(learning, Ordering::Relaxed);
    }

    pub fn learning_mode(&self) -> bool {
        self.learning_mode.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().map(|d| d.as_secs()).unwrap_or(0)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
