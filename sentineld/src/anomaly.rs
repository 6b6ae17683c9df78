//! Z-score anomaly detection over the Baseline Store, driven once per
//! scrape tick from the kernel statistics map.

use crate::alert::{Alert, AlertKind};
use crate::baseline::BaselineStore;
use sentineld_common::Severity;

const EPSILON: f64 = 1e-9;

pub struct AnomalyDetector {
    threshold_sigma: f64,
}

impl AnomalyDetector {
    pub fn new(threshold_sigma: f64) -> Self {
        Self { threshold_sigma }
    }

    /// Evaluates one scraped `(pid, syscall_nr, observed_count)` reading
    /// against the baseline store. Returns `None` when no alert is
    /// warranted (empty baseline + zero observation, or z below threshold).
    pub fn evaluate(
        &self,
        baselines: &BaselineStore,
        pid: u32,
        syscall_nr: u32,
        observed: u64,
    ) -> Option<Alert> {
        let stats = baselines.get((pid, syscall_nr))?;
        let stddev = stats.stddev();

        let (z_score, kind) = if stddev == 0.0 {
            if stats.mean == 0.0 && observed > 0 {
                // "new syscall" variant: synthetic high z-score.
                (self.threshold_sigma * 3.0 + 1.0, AlertKind::NewSyscall)
            } else {
                return None;
            }
        } else {
            let z = (observed as f64 - stats.mean) / stddev.max(EPSILON);
            (z, AlertKind::Spike)
        };

        if z_score < self.threshold_sigma {
            return None;
        }

        let severity = severity_for_z(z_score, self.threshold_sigma);
        let message = match kind {
            AlertKind::NewSyscall => format!(
                "pid {pid} issued syscall {syscall_nr} never seen in baseline ({observed} times this tick)"
            ),
            _ => format!(
                "pid {pid} syscall {syscall_nr}: observed {observed}, expected {:.2} +/- {:.2} (z={:.2})",
                stats.mean, stddev, z_score
            ),
        };

        Some(Alert {
            timestamp: Alert::now_secs(),
            severity,
            kind,
            pid,
            syscall_nr: Some(syscall_nr),
            observed: Some(observed),
            expected: Some(stats.mean),
            stddev: Some(stddev),
            z_score: Some(z_score),
            message,
        })
    }
}

fn severity_for_z(z: f64, threshold: f64) -> Severity {
    if z >= threshold * 3.0 {
        Severity::Critical
    } else if z >= threshold * 2.0 {
        Severity::High
    } else {
        Severity::Warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_baseline_with_zero_observed_has_no_alert() {
        let baselines = BaselineStore::new("/tmp/unused", Duration::from_secs(0));
        let detector = AnomalyDetector::new(3.0);
        assert!(detector.evaluate(&baselines, 1, 0, 0).is_none());
    }

    #[test]
    fn empty_baseline_with_nonzero_observed_has_no_alert_either() {
        // No baseline entry at all (never observed) - nothing to compare
        // against, so no "new syscall" alert fires; that variant only
        // applies once a baseline key exists with mean == 0.
        let baselines = BaselineStore::new("/tmp/unused", Duration::from_secs(0));
        let detector = AnomalyDetector::new(3.0);
        assert!(detector.evaluate(&baselines, 1, 99, 5).is_none());
    }

    #[test]
    fn zero_stddev_observed_equals_mean_has_no_alert() {
        let mut baselines = BaselineStore::new("/tmp/unused", Duration::from_secs(0));
        baselines.update((1, 1), 10);
        let detector = AnomalyDetector::new(3.0);
        assert!(detector.evaluate(&baselines, 1, 1, 10).is_none());
    }

    #[test]
    fn zero_stddev_new_activity_is_new_syscall_anomaly() {
        // mean == 0 after a single zero observation, then nonzero shows up.
        let mut baselines = BaselineStore::new("/tmp/unused", Duration::from_secs(0));
        baselines.update((1, 2), 0);
        let detector = AnomalyDetector::new(3.0);
        let alert = detector.evaluate(&baselines, 1, 2, 5).unwrap();
        assert_eq!(alert.kind, AlertKind::NewSyscall);
        assert_eq!(alert.severity, Severity::Critical);
    }

    #[test]
    fn scenario_anomaly_spike_z_approx_40_is_critical() {
        // Baseline for (pid=999, write) with mean=100, stddev=10, count=500.
        // Welford-construct an equivalent baseline via load-shaped insertion
        // is awkward; instead verify the detector's arithmetic directly by
        // seeding a baseline whose mean/stddev match those figures closely
        // enough through repeated updates around the target mean.
        let mut baselines = BaselineStore::new("/tmp/unused", Duration::from_secs(0));
        // Feed two values straddling the mean by 1 stddev to get a known
        // mean=100 with a controllable spread, then assert the z-score
        // directly from stats rather than trying to hit stddev=10 exactly.
        for v in [90u64, 110] {
            baselines.update((999, 1), v);
        }
        let stats = baselines.get((999, 1)).unwrap();
        assert_eq!(stats.mean, 100.0);
        let detector = AnomalyDetector::new(3.0);
        let observed = (stats.mean + stats.stddev() * 40.0) as u64;
        let alert = detector.evaluate(&baselines, 999, 1, observed).unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.z_score.unwrap() >= 39.0);
    }
}
