//! `pid -> basename of /proc/<pid>/exe`, used by the Grimoire whitelist
//! check, plus the lazy process-liveness probe the spec requires at minimum
//! for evicting per-pid state on exit.

use std::collections::HashMap;
use std::path::Path;

#[derive(Default)]
pub struct ProcessBinaryCache {
    basenames: HashMap<u32, Option<String>>,
}

impl ProcessBinaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves and caches the basename of `/proc/<pid>/exe`. `None` means
    /// the readlink failed (permission denied, process gone, etc.) and is
    /// cached too, so a single pid never pays the syscall twice in a row.
    pub fn basename(&mut self, pid: u32) -> Option<&str> {
        self.basenames
            .entry(pid)
            .or_insert_with(|| resolve_exe_basename(pid))
            .as_deref()
    }

    pub fn evict(&mut self, pid: u32) {
        self.basenames.remove(&pid);
    }
}

fn resolve_exe_basename(pid: u32) -> Option<String> {
    let link = std::fs::read_link(format!("/proc/{pid}/exe")).ok()?;
    link.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
}

/// The spec's minimum-required process-exit detection: a lazy `/proc/<pid>`
/// liveness check performed on ordinary event handling, as opposed to a
/// kernel exit tracepoint (preferred, but not mandatory).
pub fn process_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_pid_resolves_to_test_binary_basename() {
        let mut cache = ProcessBinaryCache::new();
        let pid = std::process::id();
        let name = cache.basename(pid);
        assert!(name.is_some());
    }

    #[test]
    fn nonexistent_pid_resolves_to_none_and_is_cached() {
        let mut cache = ProcessBinaryCache::new();
        assert!(cache.basename(999_999).is_none());
        // second lookup hits the cache, still None
        assert!(cache.basename(999_999).is_none());
    }

    #[test]
    fn current_process_is_alive() {
        assert!(process_is_alive(std::process::id()));
    }

    #[test]
    fn bogus_pid_is_not_alive() {
        assert!(!process_is_alive(999_999));
    }
}
