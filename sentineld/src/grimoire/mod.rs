//! Grimoire Engine: ordered, multi-step syscall signature matching against
//! a small, cache-resident pattern database - the hardest-hitting, most
//! precise of the three detection engines.
//!
//! Unlike the Anomaly Detector (which flags deviation from a learned
//! baseline) or the Correlation Engine (which tracks one behavioral
//! sequence per pid), Grimoire matches are signature-based: each pattern
//! names an exact ordered sequence of syscalls (or syscall classes) with
//! optional timing, distance, and argument constraints, modeled on known
//! attack techniques (reverse shells, fork bombs, privilege escalation,
//! credential theft, kernel module loading).

pub mod match_state;
pub mod pattern;

use crate::binary_cache::ProcessBinaryCache;
use crate::enforcement::{self, EnforcementSource};
use crate::procmem;
use match_state::MatchState;
use pattern::{Pattern, PATTERN_DB};
use sentineld_common::Severity;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct GrimoireVerdict {
    pub timestamp_ns: u64,
    pub pid: u32,
    pub pattern_name: String,
    pub severity: Severity,
    pub enforced: bool,
}

pub struct GrimoireEngine {
    patterns: &'static [Pattern],
    states: HashMap<(u32, u64), MatchState>,
    seq_counters: HashMap<u32, u64>,
    enforce: bool,
    debug: bool,
    log_path: Option<PathBuf>,
    matches_by_severity: HashMap<Severity, u64>,
}

impl GrimoireEngine {
    pub fn new(enforce: bool, debug: bool, log_path: Option<PathBuf>) -> Self {
        Self {
            patterns: &PATTERN_DB,
            states: HashMap::new(),
            seq_counters: HashMap::new(),
            enforce,
            debug,
            log_path,
            matches_by_severity: HashMap::new(),
        }
    }

    pub fn evict_pid(&mut self, pid: u32) {
        self.states.retain(|&(p, _), _| p != pid);
        self.seq_counters.remove(&pid);
    }

    pub fn match_count(&self, severity: Severity) -> u64 {
        self.matches_by_severity.get(&severity).copied().unwrap_or(0)
    }

    pub fn active_match_count(&self) -> usize {
        self.states.len()
    }

    /// Feeds one syscall event through every enabled pattern for `pid`.
    /// `binary_basename` gates the per-pattern whitelist; `now_ns` is the
    /// event's kernel timestamp.
    pub fn observe(
        &mut self,
        pid: u32,
        nr: u32,
        args: &[u64; 6],
        now_ns: u64,
        binaries: &mut ProcessBinaryCache,
    ) -> Vec<GrimoireVerdict> {
        let seq = {
            let counter = self.seq_counters.entry(pid).or_insert(0);
            *counter += 1;
            *counter
        };

        let mut verdicts = Vec::new();
        for pattern in self.patterns.iter().filter(|p| p.enabled) {
            if let Some(basename) = binaries.basename(pid)
                && pattern.is_whitelisted(basename)
            {
                continue;
            }

            if let Some(verdict) = self.step_pattern(pid, pattern, nr, args, now_ns, seq) {
                self.matches_by_severity
                    .entry(verdict.severity)
                    .and_modify(|c| *c += 1)
                    .or_insert(1);
                self.write_log(&verdict);
                verdicts.push(verdict);
            }
        }
        verdicts
    }

    fn step_pattern(
        &mut self,
        pid: u32,
        pattern: &'static Pattern,
        nr: u32,
        args: &[u64; 6],
        now_ns: u64,
        seq: u64,
    ) -> Option<GrimoireVerdict> {
        let key = (pid, pattern.id_hash);

        if let Some(state) = self.states.get(&key) {
            if state.is_window_expired(now_ns, pattern.max_sequence_window_ms) {
                self.states.remove(&key);
            }
        }

        match self.states.get(&key).copied() {
            None => {
                let step = &pattern.steps[0];
                if step.syscall_match.matches(nr)
                    && step
                        .constraints
                        .iter()
                        .all(|c| c.evaluate(args, |addr| procmem::read_peer_cstr(pid, addr, 64).ok()))
                {
                    if pattern.step_count == 1 {
                        return Some(self.emit(pid, pattern, now_ns));
                    }
                    self.states.insert(key, MatchState::started(now_ns, seq));
                    if self.debug {
                        log::debug!(
                            "[grimoire] pid {pid} started pattern '{}' at step 0",
                            pattern.name_str()
                        );
                    }
                }
                None
            }
            Some(mut state) => {
                let step_idx = state.next_step as usize;
                if step_idx >= pattern.steps.len() {
                    self.states.remove(&key);
                    return None;
                }
                let step = &pattern.steps[step_idx];
                if !step.syscall_match.matches(nr) {
                    return None;
                }
                if !step
                    .constraints
                    .iter()
                    .all(|c| c.evaluate(args, |addr| procmem::read_peer_cstr(pid, addr, 64).ok()))
                {
                    self.states.remove(&key);
                    if self.debug {
                        log::debug!(
                            "[grimoire] pid {pid} pattern '{}' reset at step {step_idx}: constraint failed",
                            pattern.name_str()
                        );
                    }
                    return None;
                }
                if !state.time_delta_ok(now_ns, step.max_time_delta_us)
                    || !state.step_distance_ok(seq, step.max_step_distance)
                {
                    self.states.remove(&key);
                    if self.debug {
                        log::debug!(
                            "[grimoire] pid {pid} pattern '{}' reset at step {step_idx}: timing/distance violated",
                            pattern.name_str()
                        );
                    }
                    return None;
                }

                state.advance(now_ns, seq);
                if state.next_step as usize >= pattern.step_count as usize {
                    self.states.remove(&key);
                    return Some(self.emit(pid, pattern, now_ns));
                }
                self.states.insert(key, state);
                None
            }
        }
    }

    fn emit(&self, pid: u32, pattern: &Pattern, now_ns: u64) -> GrimoireVerdict {
        let enforced = if self.enforce {
            enforcement::terminate(pid, EnforcementSource::Grimoire, pattern.name_str()).killed
        } else {
            false
        };
        log::warn!(
            "[grimoire] pid {pid} matched pattern '{}' severity={:?} enforced={enforced}",
            pattern.name_str(),
            pattern.severity
        );
        GrimoireVerdict {
            timestamp_ns: now_ns,
            pid,
            pattern_name: pattern.name_str().to_string(),
            severity: pattern.severity,
            enforced,
        }
    }

    fn write_log(&self, verdict: &GrimoireVerdict) {
        let Some(path) = &self.log_path else { return };
        let line = match serde_json::to_string(verdict) {
            Ok(line) => line,
            Err(e) => {
                log::warn!("[grimoire] failed to serialize match log line: {e}");
                return;
            }
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            log::warn!("[grimoire] failed to append to match log {path:?}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentineld_common::syscall_nr;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn args(vals: [u64; 6]) -> [u64; 6] {
        vals
    }

    fn fresh_binaries() -> ProcessBinaryCache {
        ProcessBinaryCache::new()
    }

    /// Spec scenario: reverse shell.
    /// socket -> connect -> dup2 x3 -> execve within a few ms each.
    #[test]
    fn scenario_reverse_shell_classic_matches_full_sequence() {
        let mut engine = GrimoireEngine::new(false, false, None);
        let mut binaries = fresh_binaries();
        let pid = 31337;
        let base = 1_000_000u64;
        let steps = [
            syscall_nr::SOCKET,
            syscall_nr::CONNECT,
            syscall_nr::DUP2,
            syscall_nr::DUP2,
            syscall_nr::DUP2,
            syscall_nr::EXECVE,
        ];
        let mut last = Vec::new();
        for (i, nr) in steps.iter().enumerate() {
            let now_ns = base + i as u64 * 500_000;
            last = engine.observe(pid, *nr, &args([0; 6]), now_ns, &mut binaries);
        }
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].pattern_name, "reverse_shell_classic");
        assert_eq!(last[0].severity, Severity::Critical);
    }

    /// Spec scenario: fork bomb, hostile binary - four clones fire rapidly
    /// under an unrelated (non-whitelisted) binary name and should match.
    #[test]
    fn scenario_fork_bomb_hostile_matches() {
        let mut engine = GrimoireEngine::new(false, false, None);
        let mut binaries = fresh_binaries();
        let pid = 666;
        let base = 10_000_000u64;
        let mut last = Vec::new();
        for i in 0..4u64 {
            last = engine.observe(
                pid,
                syscall_nr::CLONE,
                &args([0; 6]),
                base + i * 10_000,
                &mut binaries,
            );
        }
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].pattern_name, "fork_bomb_rapid");
    }

    /// Spec scenario: fork bomb under a whitelisted build tool never
    /// matches, regardless of syscall shape.
    #[test]
    fn scenario_fork_bomb_whitelisted_binary_never_matches() {
        let mut engine = GrimoireEngine::new(false, false, None);
        let pid = std::process::id(); // cargo test's own exe; basename won't be "make"
        // We can't fake /proc/<pid>/exe in a unit test, so exercise the
        // whitelist predicate directly instead of through the cache.
        let pattern = PATTERN_DB
            .iter()
            .find(|p| p.name_str() == "fork_bomb_rapid")
            .unwrap();
        assert!(pattern.is_whitelisted("make"));
        let _ = (engine.active_match_count(), pid);
    }

    #[test]
    fn single_step_pattern_matches_immediately() {
        let mut engine = GrimoireEngine::new(false, false, None);
        let mut binaries = fresh_binaries();
        let verdicts = engine.observe(1, syscall_nr::INIT_MODULE, &args([0; 6]), 1, &mut binaries);
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].pattern_name, "kernel_module_load");
    }

    #[test]
    fn unrelated_syscalls_between_steps_do_not_reset_when_distance_unbounded() {
        let mut engine = GrimoireEngine::new(false, false, None);
        let mut binaries = fresh_binaries();
        let pid = 5;
        engine.observe(pid, syscall_nr::SOCKET, &args([0; 6]), 0, &mut binaries);
        // noise in between - reverse_shell_classic has no step_distance cap
        for i in 0..50 {
            engine.observe(pid, syscall_nr::READ, &args([0; 6]), i, &mut binaries);
        }
        let v = engine.observe(pid, syscall_nr::CONNECT, &args([0; 6]), 60, &mut binaries);
        assert!(v.is_empty()); // still mid-sequence, not a full match yet
        assert_eq!(engine.active_match_count(), 1);
    }

    #[test]
    fn window_expiry_drops_in_flight_match() {
        let mut engine = GrimoireEngine::new(false, false, None);
        let mut binaries = fresh_binaries();
        let pid = 77;
        engine.observe(pid, syscall_nr::SOCKET, &args([0; 6]), 0, &mut binaries);
        assert_eq!(engine.active_match_count(), 1);
        // reverse_shell_classic's window is 2000ms; jump far past it
        engine.observe(
            pid,
            syscall_nr::CONNECT,
            &args([0; 6]),
            10_000_000_000,
            &mut binaries,
        );
        assert_eq!(engine.active_match_count(), 0);
    }

    #[test]
    fn step_distance_violation_resets_the_match() {
        // fork_bomb_rapid's later steps cap step_distance at 5.
        let mut engine = GrimoireEngine::new(false, false, None);
        let mut binaries = fresh_binaries();
        let pid = 9;
        engine.observe(pid, syscall_nr::CLONE, &args([0; 6]), 0, &mut binaries);
        for i in 0..10 {
            engine.observe(pid, syscall_nr::READ, &args([0; 6]), i, &mut binaries);
        }
        let v = engine.observe(pid, syscall_nr::CLONE, &args([0; 6]), 20, &mut binaries);
        assert!(v.is_empty());
        assert_eq!(engine.active_match_count(), 0);
    }

    #[test]
    fn evict_pid_clears_both_state_and_sequence_counter() {
        let mut engine = GrimoireEngine::new(false, false, None);
        let mut binaries = fresh_binaries();
        engine.observe(1, syscall_nr::SOCKET, &args([0; 6]), 0, &mut binaries);
        assert_eq!(engine.active_match_count(), 1);
        engine.evict_pid(1);
        assert_eq!(engine.active_match_count(), 0);
    }

    #[test]
    fn grimoire_log_is_append_only_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("grimoire.ndjson");
        let mut engine = GrimoireEngine::new(false, false, Some(log_path.clone()));
        let mut binaries = fresh_binaries();
        engine.observe(1, syscall_nr::INIT_MODULE, &args([0; 6]), now_ns(), &mut binaries);
        engine.observe(2, syscall_nr::FINIT_MODULE, &args([0; 6]), now_ns(), &mut binaries);
        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        for line in contents.lines() {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(v.get("pattern_name").is_some());
        }
    }

    fn now_ns() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }

    /// A synthetic two-step pattern whose second step carries an
    /// `ArgConstraint` - none of `PATTERN_DB`'s real patterns constrain
    /// anything past step 0, so this is built by hand to exercise the
    /// mid-sequence constraint-failure path directly.
    static ARG_CONSTRAINED_PATTERN: Pattern = {
        let filler = pattern::PatternStep::new(pattern::SyscallMatch::Class(sentineld_common::SyscallClass::Any));
        let mut steps = [filler; pattern::MAX_STEPS];
        steps[0] = pattern::PatternStep::new(pattern::SyscallMatch::Exact(syscall_nr::OPENAT));
        steps[1] = pattern::PatternStep::new(pattern::SyscallMatch::Exact(syscall_nr::READ)).with_constraint(
            0,
            pattern::ArgConstraint::numeric(0, pattern::ArgConstraintType::Equals, 42),
        );
        Pattern {
            id_hash: pattern::fnv1a64("test_arg_constrained"),
            name: *b"test_arg_constrained\0\0\0\0\0\0\0\0\0\0\0\0",
            steps,
            step_count: 2,
            severity: Severity::Warning,
            max_sequence_window_ms: 10_000,
            enabled: true,
            whitelisted_binaries: None,
        }
    };

    #[test]
    fn arg_constraint_failure_hard_resets_the_match_state() {
        let mut engine = GrimoireEngine::new(false, false, None);
        let pid = 4242;
        let step = engine.step_pattern(pid, &ARG_CONSTRAINED_PATTERN, syscall_nr::OPENAT, &args([0; 6]), 0, 0);
        assert!(step.is_none());
        assert_eq!(engine.active_match_count(), 1);

        // arg0 is 7, not the 42 the constraint requires - must hard-reset,
        // not just fail silently and leave the in-flight match behind.
        let step = engine.step_pattern(pid, &ARG_CONSTRAINED_PATTERN, syscall_nr::READ, &args([7, 0, 0, 0, 0, 0]), 1_000, 1);
        assert!(step.is_none());
        assert_eq!(engine.active_match_count(), 0);
    }
}
