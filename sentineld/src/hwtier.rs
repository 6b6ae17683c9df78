//! Pre-startup hardware-tier probe: a thin, routine step that sizes the
//! event channel and scrape-tick batch to the host's resources. It never
//! changes which Grimoire patterns are loaded - the hot-tier pattern
//! database is always loaded in full, per the cache-residency invariant.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Minimal,
    Standard,
    Full,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct HardwareProfile {
    pub cpus: usize,
    pub total_memory_mb: u64,
    pub tier: Tier,
    pub event_channel_capacity: usize,
    pub scrape_batch_hint: usize,
}

impl HardwareProfile {
    /// Probes the host once at startup. Never fails: an unreadable CPU
    /// count or memory figure just falls back to the most conservative
    /// tier rather than aborting startup over a cosmetic sizing decision.
    pub fn probe() -> Self {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let total_memory_mb = read_total_memory_mb().unwrap_or(0);
        Self::from_resources(cpus, total_memory_mb)
    }

    fn from_resources(cpus: usize, total_memory_mb: u64) -> Self {
        let tier = if cpus >= 8 && total_memory_mb >= 8192 {
            Tier::Full
        } else if cpus >= 2 && total_memory_mb >= 2048 {
            Tier::Standard
        } else {
            Tier::Minimal
        };
        let (event_channel_capacity, scrape_batch_hint) = match tier {
            Tier::Minimal => (1_024, 256),
            Tier::Standard => (8_192, 1_024),
            Tier::Full => (65_536, 8_192),
        };
        Self {
            cpus,
            total_memory_mb,
            tier,
            event_channel_capacity,
            scrape_batch_hint,
        }
    }
}

fn read_total_memory_mb() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}
