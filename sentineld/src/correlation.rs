//! Correlation Engine: per-pid finite-state tracking of the
//! recon -> read -> exfiltrate sequence that a single anomalous syscall
//! can never reveal on its own.
//!
//! Stage machine: `Idle -> NetworkOpened -> FileRead -> DataSent`. Each
//! forward transition adds to a running `sequence_score`; a full traversal
//! to `DataSent` with score over threshold produces a critical alert and,
//! if `auto_terminate` is enabled, kills the process.

use crate::alert::{Alert, AlertKind};
use sentineld_common::{Severity, syscall_nr};
use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    NetworkOpened,
    FileRead,
    DataSent,
}

const SENSITIVE_PATH_FRAGMENTS: &[&str] = &[
    ".ssh/", "id_rsa", "id_ed25519", ".aws/credentials", ".gnupg/", "/etc/shadow", ".netrc",
    "credentials.json", ".kube/config",
];

pub fn path_is_sensitive(path: &str) -> bool {
    SENSITIVE_PATH_FRAGMENTS.iter().any(|frag| path.contains(frag))
}

/// RFC1918 / loopback / link-local destinations are not exfiltration
/// targets by themselves; only a read-then-send to a *public* address
/// scores as suspicious.
pub fn is_public_address(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => !(v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()),
        IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00),
    }
}

#[derive(Debug, Clone)]
struct RecentRead {
    path: String,
    fd: i64,
    bytes_read: u64,
    read_at_ms: u64,
    is_sensitive: bool,
}

#[derive(Debug, Clone, Default)]
struct ProcessState {
    stage: Stage,
    open_sockets: HashMap<i64, bool>, // fd -> is_public
    recent_reads: Vec<RecentRead>,
    sequence_score: u32,
    sequence_start_ms: u64,
    last_event_ms: u64,
}

impl ProcessState {
    fn any_recent_read_sensitive(&self) -> bool {
        self.recent_reads.iter().any(|r| r.is_sensitive)
    }

    fn total_sensitive_bytes_read(&self) -> u64 {
        self.recent_reads.iter().filter(|r| r.is_sensitive).map(|r| r.bytes_read).sum()
    }
}

impl Default for Stage {
    fn default() -> Self {
        Stage::Idle
    }
}

pub struct CorrelationEngine {
    threshold: u32,
    timeout_ms: u64,
    min_exfil_bytes: u64,
    auto_terminate: bool,
    states: HashMap<u32, ProcessState>,
}

#[derive(Debug, Clone)]
pub struct CorrelationOutcome {
    pub alert: Option<Alert>,
    pub terminate: bool,
}

impl CorrelationOutcome {
    fn none() -> Self {
        Self { alert: None, terminate: false }
    }
}

impl CorrelationEngine {
    pub fn new(threshold: u32, timeout_ms: u64, min_exfil_bytes: u64, auto_terminate: bool) -> Self {
        Self {
            threshold,
            timeout_ms,
            min_exfil_bytes,
            auto_terminate,
            states: HashMap::new(),
        }
    }

    pub fn evict_pid(&mut self, pid: u32) {
        self.states.remove(&pid);
    }

    pub fn active_pids(&self) -> usize {
        self.states.len()
    }

    /// Feeds one syscall event through the state machine for its pid.
    /// `now_ms` is the event's timestamp converted to milliseconds;
    /// `peer_addr` is filled in for `connect`/`sendto`-family syscalls when
    /// resolvable, `path` for file-opening syscalls.
    pub fn observe(
        &mut self,
        pid: u32,
        nr: u32,
        fd: i64,
        now_ms: u64,
        peer_addr: Option<IpAddr>,
        path: Option<&str>,
        byte_count: u64,
    ) -> CorrelationOutcome {
        let state = self.states.entry(pid).or_default();

        if state.stage != Stage::Idle && now_ms.saturating_sub(state.last_event_ms) > self.timeout_ms {
            *state = ProcessState::default();
        }
        state.last_event_ms = now_ms;

        match nr {
            n if n == syscall_nr::SOCKET => {
                if state.stage == Stage::Idle {
                    state.stage = Stage::NetworkOpened;
                    state.sequence_start_ms = now_ms;
                    state.sequence_score += 10;
                }
                CorrelationOutcome::none()
            }
            n if n == syscall_nr::CONNECT => {
                let public = peer_addr.map(is_public_address).unwrap_or(false);
                state.open_sockets.insert(fd, public);
                if public && state.stage == Stage::NetworkOpened {
                    state.sequence_score += 15;
                }
                CorrelationOutcome::none()
            }
            n if n == syscall_nr::OPEN || n == syscall_nr::OPENAT => {
                let sensitive = path.map(path_is_sensitive).unwrap_or(false);
                state.recent_reads.push(RecentRead {
                    path: path.unwrap_or_default().to_string(),
                    fd,
                    bytes_read: 0,
                    read_at_ms: now_ms,
                    is_sensitive: sensitive,
                });
                if sensitive {
                    if state.stage == Stage::NetworkOpened {
                        state.stage = Stage::FileRead;
                    }
                    state.sequence_score += 25;
                    let alert = if state.stage == Stage::FileRead {
                        Some(self.warning_alert(pid, "opened a sensitive path after opening a network socket"))
                    } else {
                        None
                    };
                    return CorrelationOutcome { alert, terminate: false };
                }
                CorrelationOutcome::none()
            }
            n if n == syscall_nr::READ => {
                let mut matched_sensitive = false;
                if let Some(entry) = state.recent_reads.iter_mut().rev().find(|r| r.fd == fd) {
                    entry.bytes_read = entry.bytes_read.saturating_add(byte_count);
                    matched_sensitive = entry.is_sensitive;
                }
                if state.stage == Stage::FileRead && matched_sensitive {
                    state.sequence_score += 20;
                }
                CorrelationOutcome::none()
            }
            n if n == syscall_nr::SENDTO || n == syscall_nr::SENDMSG || n == syscall_nr::WRITE => {
                let fd_is_open_socket = state.open_sockets.contains_key(&fd);
                if fd_is_open_socket && (state.stage == Stage::FileRead || state.stage == Stage::DataSent) {
                    if state.stage == Stage::FileRead && state.any_recent_read_sensitive() {
                        state.stage = Stage::DataSent;
                        state.sequence_score += 30;
                    }
                    if state.stage == Stage::DataSent {
                        let total_sensitive = state.total_sensitive_bytes_read();
                        if byte_count >= self.min_exfil_bytes || byte_count >= total_sensitive / 2 {
                            state.sequence_score += 50;
                        }
                    }
                }
                if state.stage == Stage::DataSent && state.sequence_score >= self.threshold {
                    let elapsed = now_ms.saturating_sub(state.sequence_start_ms);
                    let alert = self.critical_alert(pid, state.sequence_score, elapsed);
                    let terminate = self.auto_terminate;
                    *state = ProcessState::default();
                    return CorrelationOutcome { alert: Some(alert), terminate };
                }
                CorrelationOutcome::none()
            }
            n if n == syscall_nr::CLOSE => {
                state.open_sockets.remove(&fd);
                state.recent_reads.retain(|r| r.fd != fd);
                CorrelationOutcome::none()
            }
            _ => CorrelationOutcome::none(),
        }
    }

    fn warning_alert(&self, pid: u32, message: &str) -> Alert {
        Alert {
            timestamp: Alert::now_secs(),
            severity: Severity::Warning,
            kind: AlertKind::Correlation,
            pid,
            syscall_nr: None,
            observed: None,
            expected: None,
            stddev: None,
            z_score: None,
            message: format!("pid {pid}: {message}"),
        }
    }

    fn critical_alert(&self, pid: u32, score: u32, elapsed_ms: u64) -> Alert {
        Alert {
            timestamp: Alert::now_secs(),
            severity: Severity::Critical,
            kind: AlertKind::Correlation,
            pid,
            syscall_nr: None,
            observed: Some(score as u64),
            expected: None,
            stddev: None,
            z_score: None,
            message: format!(
                "pid {pid}: completed exfiltration sequence (score {score}) in {elapsed_ms}ms"
            ),
        }
    }
}
