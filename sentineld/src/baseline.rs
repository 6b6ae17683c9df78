//! Per-`(pid, syscall_nr)` statistical baseline, maintained with Welford's
//! online algorithm and persisted as one JSON file per pid.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub type BaselineKey = (u32, u32);

/// Welford-accumulated statistics for a single `(pid, syscall_nr)` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineStats {
    pub count: u64,
    pub mean: f64,
    pub m2: f64,
    pub min: u64,
    pub max: u64,
    pub last_updated: u64,
}

impl BaselineStats {
    fn new(observed: u64, now: u64) -> Self {
        Self {
            count: 1,
            mean: observed as f64,
            m2: 0.0,
            min: observed,
            max: observed,
            last_updated: now,
        }
    }

    /// Welford's online update. Numerically stable for counts on the order
    /// of `10^9` since it never accumulates a running sum of squares.
    fn update(&mut self, observed: u64, now: u64) {
        self.count += 1;
        let delta = observed as f64 - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = observed as f64 - self.mean;
        self.m2 += delta * delta2;
        self.min = self.min.min(observed);
        self.max = self.max.max(observed);
        self.last_updated = now;
    }

    /// `stddev` is defined as 0 while fewer than two observations exist.
    pub fn stddev(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StatsRecord {
    pid: u32,
    syscall_nr: u32,
    count: u64,
    mean: f64,
    stddev: f64,
    min: u64,
    max: u64,
    last_updated: u64,
}

/// In-memory map of every observed `(pid, syscall_nr)` baseline, with
/// disk persistence at one JSON file per pid.
pub struct BaselineStore {
    stats: HashMap<BaselineKey, BaselineStats>,
    storage_dir: PathBuf,
    started_at: SystemTime,
    learning_period: std::time::Duration,
}

impl BaselineStore {
    pub fn new(storage_dir: impl Into<PathBuf>, learning_period: std::time::Duration) -> Self {
        Self {
            stats: HashMap::new(),
            storage_dir: storage_dir.into(),
            started_at: SystemTime::now(),
            learning_period,
        }
    }

    /// `true` until `learning_period_seconds` has elapsed since construction,
    /// then permanently `false`.
    pub fn is_learning(&self) -> bool {
        self.started_at.elapsed().unwrap_or_default() < self.learning_period
    }

    pub fn update(&mut self, key: BaselineKey, observed: u64) {
        let now = unix_seconds();
        self.stats
            .entry(key)
            .and_modify(|s| s.update(observed, now))
            .or_insert_with(|| BaselineStats::new(observed, now));
    }

    pub fn get(&self, key: BaselineKey) -> Option<&BaselineStats> {
        self.stats.get(&key)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn keys_for_pid(&self, pid: u32) -> impl Iterator<Item = &BaselineKey> {
        self.stats.keys().filter(move |(p, _)| *p == pid)
    }

    pub fn evict_pid(&mut self, pid: u32) {
        self.stats.retain(|(p, _), _| *p != pid);
    }

    fn pid_path(&self, pid: u32) -> PathBuf {
        self.storage_dir.join(format!("{pid}.json"))
    }

    /// Truncate-write one JSON array per pid. Failure is the caller's to log;
    /// a partial write is superseded on the next save cycle.
    pub fn save_for_pid(&self, pid: u32) -> std::io::Result<()> {
        let records: Vec<StatsRecord> = self
            .stats
            .iter()
            .filter(|((p, _), _)| *p == pid)
            .map(|((p, nr), s)| StatsRecord {
                pid: *p,
                syscall_nr: *nr,
                count: s.count,
                mean: s.mean,
                stddev: s.stddev(),
                min: s.min,
                max: s.max,
                last_updated: s.last_updated,
            })
            .collect();
        if records.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.storage_dir)?;
        let json = serde_json::to_vec(&records)?;
        std::fs::write(self.pid_path(pid), json)
    }

    pub fn save_all(&self) -> usize {
        let pids: std::collections::HashSet<u32> = self.stats.keys().map(|(p, _)| *p).collect();
        let mut saved = 0;
        for pid in pids {
            match self.save_for_pid(pid) {
                Ok(()) => saved += 1,
                Err(err) => log::warn!("[sentineld] baseline save failed for pid {pid}: {err}"),
            }
        }
        saved
    }

    /// Scans `storage_dir` for `<pid>.json` files and loads them all.
    /// A load failure for one file skips only that pid. Returns the count
    /// of pids successfully loaded.
    pub fn load_all(&mut self) -> usize {
        let dir = self.storage_dir.clone();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::info!("[sentineld] no existing baseline directory ({dir:?}): {err}");
                return 0;
            }
        };

        let mut loaded = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match load_pid_file(&path) {
                Ok(records) => {
                    for record in records {
                        let m2 = if record.count > 1 {
                            record.stddev * record.stddev * (record.count - 1) as f64
                        } else {
                            0.0
                        };
                        self.stats.insert(
                            (record.pid, record.syscall_nr),
                            BaselineStats {
                                count: record.count,
                                mean: record.mean,
                                m2,
                                min: record.min,
                                max: record.max,
                                last_updated: record.last_updated,
                            },
                        );
                    }
                    loaded += 1;
                }
                Err(err) => {
                    log::warn!("[sentineld] failed to load baseline file {path:?}: {err}");
                }
            }
        }
        loaded
    }
}

fn load_pid_file(path: &Path) -> std::io::Result<Vec<StatsRecord>> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(std::io::Error::from)
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_pass_mean_stddev(samples: &[u64]) -> (f64, f64) {
        let n = samples.len() as f64;
        let mean = samples.iter().map(|&x| x as f64).sum::<f64>() / n;
        if samples.len() < 2 {
            return (mean, 0.0);
        }
        let var = samples
            .iter()
            .map(|&x| (x as f64 - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        (mean, var.sqrt())
    }

    #[test]
    fn welford_matches_two_pass_computation() {
        let samples: Vec<u64> = vec![10, 12, 9, 11, 50, 10, 11, 12, 9, 10, 300, 11];
        let mut store = BaselineStore::new("/tmp/does-not-matter", std::time::Duration::from_secs(0));
        for &s in &samples {
            store.update((1, 0), s);
        }
        let stats = store.get((1, 0)).unwrap();
        let (mean, stddev) = two_pass_mean_stddev(&samples);
        assert!((stats.mean - mean).abs() < 1e-9 * mean.max(1.0));
        assert!((stats.stddev() - stddev).abs() < 1e-9 * stddev.max(1.0));
        assert!(stats.min as f64 <= stats.mean && stats.mean <= stats.max as f64);
    }

    #[test]
    fn single_observation_has_zero_stddev() {
        let mut store = BaselineStore::new("/tmp/does-not-matter", std::time::Duration::from_secs(0));
        store.update((1, 41), 7);
        let stats = store.get((1, 41)).unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.stddev(), 0.0);
        assert_eq!(stats.min, 7);
        assert_eq!(stats.max, 7);
    }

    #[test]
    fn persistence_round_trip_preserves_stats_within_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BaselineStore::new(dir.path(), std::time::Duration::from_secs(0));
        for pid in 1..=3u32 {
            for nr in 0..5u32 {
                for sample in [10, 12, 11, 9, 13, 10, 11] {
                    store.update((pid, nr), sample * (pid + nr) as u64);
                }
            }
        }
        store.save_all();

        let mut fresh = BaselineStore::new(dir.path(), std::time::Duration::from_secs(0));
        let loaded = fresh.load_all();
        assert_eq!(loaded, 3);

        for pid in 1..=3u32 {
            for nr in 0..5u32 {
                let original = store.get((pid, nr)).unwrap();
                let reloaded = fresh.get((pid, nr)).unwrap();
                assert_eq!(original.count, reloaded.count);
                assert_eq!(original.min, reloaded.min);
                assert_eq!(original.max, reloaded.max);
                assert!((original.mean - reloaded.mean).abs() < 1e-9 * original.mean.max(1.0));
                assert!((original.stddev() - reloaded.stddev()).abs() < 1e-9);
                assert_eq!(original.last_updated, reloaded.last_updated);
            }
        }
    }

    #[test]
    fn load_skips_only_the_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("12.json"), b"not json").unwrap();
        std::fs::write(
            dir.path().join("34.json"),
            serde_json::to_vec(&[StatsRecord {
                pid: 34,
                syscall_nr: 0,
                count: 5,
                mean: 1.0,
                stddev: 0.0,
                min: 1,
                max: 1,
                last_updated: 0,
            }])
            .unwrap(),
        )
        .unwrap();

        let mut store = BaselineStore::new(dir.path(), std::time::Duration::from_secs(0));
        let loaded = store.load_all();
        assert_eq!(loaded, 1);
        assert!(store.get((34, 0)).is_some());
        assert!(store.get((12, 0)).is_none());
    }

    #[test]
    fn evict_pid_removes_all_its_keys() {
        let mut store = BaselineStore::new("/tmp/does-not-matter", std::time::Duration::from_secs(0));
        store.update((1, 0), 1);
        store.update((1, 1), 2);
        store.update((2, 0), 3);
        store.evict_pid(1);
        assert!(store.get((1, 0)).is_none());
        assert!(store.get((1, 1)).is_none());
        assert!(store.get((2, 0)).is_some());
    }
}
