//! Wire-format types shared between the kernel-side event producer and this
//! daemon's userspace consumer. Everything here is `repr(C)` and
//! `bytemuck::Pod` so it can be read directly out of ring-buffer bytes
//! without a deserialization pass on the hot path.
#![cfg_attr(not(feature = "user"), no_std)]

use bytemuck::{Pod, Zeroable};

/// A single syscall-entry record as produced by the kernel tracepoint and
/// consumed exactly once by the userspace dispatcher.
///
/// Field order and widths are the wire contract: `syscall_nr`, `pid`,
/// `timestamp_ns`, then six `u64` argument slots, followed by 8 bytes
/// reserved for future use. The reserved tail pads the record to the
/// specified 72-byte record size and must be zeroed by the producer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub struct SyscallEvent {
    pub syscall_nr: u32,
    pub pid: u32,
    pub timestamp_ns: u64,
    pub args: [u64; 6],
    pub _reserved: u64,
}

pub const SYSCALL_EVENT_SIZE: usize = core::mem::size_of::<SyscallEvent>();

impl SyscallEvent {
    pub const fn zeroed() -> Self {
        Self {
            syscall_nr: 0,
            pid: 0,
            timestamp_ns: 0,
            args: [0; 6],
            _reserved: 0,
        }
    }
}

/// Well-known Linux syscall numbers (x86_64) referenced by the Grimoire
/// pattern database and the correlation engine. Kept as plain constants
/// rather than an enum so pattern authors can match on the raw `syscall_nr`
/// the kernel hands us without a fallible conversion.
pub mod syscall_nr {
    pub const READ: u32 = 0;
    pub const WRITE: u32 = 1;
    pub const OPEN: u32 = 2;
    pub const CLOSE: u32 = 3;
    pub const SOCKET: u32 = 41;
    pub const CONNECT: u32 = 42;
    pub const ACCEPT: u32 = 43;
    pub const SENDTO: u32 = 44;
    pub const RECVFROM: u32 = 45;
    pub const SENDMSG: u32 = 46;
    pub const RECVMSG: u32 = 47;
    pub const BIND: u32 = 49;
    pub const LISTEN: u32 = 50;
    pub const CLONE: u32 = 56;
    pub const FORK: u32 = 57;
    pub const VFORK: u32 = 58;
    pub const EXECVE: u32 = 59;
    pub const DUP2: u32 = 33;
    pub const SETUID: u32 = 105;
    pub const SETGID: u32 = 106;
    pub const PTRACE: u32 = 101;
    pub const OPENAT: u32 = 257;
    pub const INIT_MODULE: u32 = 175;
    pub const FINIT_MODULE: u32 = 313;
}

/// A closed, extensible-by-edit enum of syscall behavior categories. Pattern
/// steps key off class membership instead of exact syscall numbers when a
/// whole family of syscalls is behaviorally equivalent for matching purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub enum SyscallClass {
    Any,
    Network,
    FileRead,
    FileWrite,
    ProcessCreate,
    Privilege,
    Ipc,
    KernelModule,
    Debug,
}

impl SyscallClass {
    /// Pure membership test: is `nr` a member of this class?
    pub fn contains(&self, nr: u32) -> bool {
        use syscall_nr::*;
        match self {
            SyscallClass::Any => true,
            SyscallClass::Network => matches!(
                nr,
                SOCKET | CONNECT | BIND | LISTEN | ACCEPT | SENDTO | RECVFROM | SENDMSG | RECVMSG
            ),
            SyscallClass::FileRead => matches!(nr, READ | OPEN | OPENAT),
            SyscallClass::FileWrite => matches!(nr, WRITE | OPEN | OPENAT),
            SyscallClass::ProcessCreate => matches!(nr, FORK | VFORK | CLONE | EXECVE),
            SyscallClass::Privilege => matches!(nr, SETUID | SETGID),
            SyscallClass::Ipc => false,
            SyscallClass::KernelModule => matches!(nr, INIT_MODULE | FINIT_MODULE),
            SyscallClass::Debug => matches!(nr, PTRACE),
        }
    }
}

/// Alert / verdict severity, ordered least to most urgent. `Ord` derives in
/// declaration order, which is relied upon when mapping z-score bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "user", serde(rename_all = "lowercase"))]
pub enum Severity {
    Debug,
    Info,
    Warning,
    High,
    Critical,
}

impl Severity {
    /// Numeric severity as used by the syslog sink's PRI computation and
    /// the auditd sink's `severity=` field.
    pub fn syslog_numeric(&self) -> u8 {
        match self {
            Severity::Debug => 7,
            Severity::Info => 6,
            Severity::Warning => 4,
            Severity::High => 3,
            Severity::Critical => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_event_layout_matches_wire_contract() {
        assert_eq!(SYSCALL_EVENT_SIZE, 72);
        assert_eq!(core::mem::align_of::<SyscallEvent>(), 8);
    }

    #[test]
    fn network_class_membership() {
        assert!(SyscallClass::Network.contains(syscall_nr::SOCKET));
        assert!(SyscallClass::Network.contains(syscall_nr::CONNECT));
        assert!(!SyscallClass::Network.contains(syscall_nr::READ));
    }

    #[test]
    fn process_create_class_membership() {
        assert!(SyscallClass::ProcessCreate.contains(syscall_nr::CLONE));
        assert!(SyscallClass::ProcessCreate.contains(syscall_nr::EXECVE));
        assert!(!SyscallClass::ProcessCreate.contains(syscall_nr::WRITE));
    }

    #[test]
    fn severity_ordering_is_ascending_urgency() {
        assert!(Severity::Warning < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert!(Severity::Debug < Severity::Info);
    }

    #[cfg(feature = "user")]
    #[test]
    fn syscall_event_json_roundtrip() {
        let ev = SyscallEvent {
            syscall_nr: syscall_nr::SOCKET,
            pid: 1234,
            timestamp_ns: 1_000_000,
            args: [1, 2, 3, 4, 5, 6],
            _reserved: 0,
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: SyscallEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }
}
