//! Enforcement: the one effect either engine can have on the outside
//! world beyond raising an alert - killing the offending process.
//!
//! Both the Grimoire engine's `grimoire_enforce` option and the
//! Correlation Engine's `auto_terminate` option route through here so the
//! safety checks (never kill init, never kill ourselves, never kill a
//! process we just spawned) are enforced exactly once, in exactly one
//! place.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

mod safety;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementSource {
    Grimoire,
    Correlation,
}

#[derive(Debug, Clone)]
pub struct EnforcementOutcome {
    pub pid: u32,
    pub source: EnforcementSource,
    pub killed: bool,
    pub reason: String,
}

/// Attempts to SIGKILL `pid`, first running [`safety::SafetyGuard`]. Never
/// panics: a refused or failed kill is logged and reported back as
/// `killed: false`, not propagated as an error that would stop the event
/// loop.
pub fn terminate(pid: u32, source: EnforcementSource, trigger: &str) -> EnforcementOutcome {
    if let Err(reason) = safety::SafetyGuard::is_safe_to_kill(pid) {
        log::warn!("[enforcement] refusing to kill pid {pid} ({trigger}): {reason}");
        return EnforcementOutcome {
            pid,
            source,
            killed: false,
            reason,
        };
    }

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => {
            log::warn!("[enforcement] killed pid {pid} ({source:?}): {trigger}");
            EnforcementOutcome {
                pid,
                source,
                killed: true,
                reason: trigger.to_string(),
            }
        }
        Err(errno) => {
            let reason = format!("kill({pid}, SIGKILL) failed: {errno}");
            log::warn!("[enforcement] {reason}");
            EnforcementOutcome {
                pid,
                source,
                killed: false,
                reason,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_to_kill_init() {
        let outcome = terminate(1, EnforcementSource::Grimoire, "test");
        assert!(!outcome.killed);
    }

    #[test]
    fn refuses_to_kill_self() {
        let pid = std::process::id();
        let outcome = terminate(pid, EnforcementSource::Correlation, "test");
        assert!(!outcome.killed);
    }

    #[test]
    fn killing_nonexistent_pid_reports_failure_not_panic() {
        let outcome = terminate(999_999, EnforcementSource::Grimoire, "test");
        assert!(!outcome.killed);
    }
}
