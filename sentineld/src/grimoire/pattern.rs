//! The Grimoire pattern data model and its compile-time, cache-resident
//! pattern database (hot tier). Every type here is sized to keep a single
//! pattern at or under 1.5 KiB and the whole database at or under 8 KiB,
//! per the cache-residency invariant - so field layouts favor sentinel
//! values (`0` = unconstrained, `Any` = inactive) over `Option<T>` wrappers
//! that would otherwise add a discriminant to every slot.

use sentineld_common::{Severity, SyscallClass, syscall_nr};

/// Either a specific syscall number or a behavior class. Replaces the
/// `Option<u32>` + `Option<SyscallClass>` pair the data model describes,
/// since exactly one of the two is ever meaningful for a given step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallMatch {
    Exact(u32),
    Class(SyscallClass),
}

impl SyscallMatch {
    pub fn matches(&self, nr: u32) -> bool {
        match self {
            SyscallMatch::Exact(expect) => *expect == nr,
            SyscallMatch::Class(class) => class.contains(nr),
        }
    }
}

/// `same_process` is the only relationship currently enforced; the other
/// two are reserved (see spec Open Questions) pending a parent-child graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRelationship {
    SameProcess,
    ChildProcess,
    ProcessTree,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgConstraintType {
    Any,
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    BitmaskSet,
    BitmaskClear,
    StrEquals,
    StrPrefix,
    StrSuffix,
    StrContains,
}

impl ArgConstraintType {
    fn is_string(&self) -> bool {
        matches!(
            self,
            ArgConstraintType::StrEquals
                | ArgConstraintType::StrPrefix
                | ArgConstraintType::StrSuffix
                | ArgConstraintType::StrContains
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ArgConstraintValue {
    Num(u64),
    /// NUL-padded, used only by the `str_*` constraint types.
    Str([u8; 64]),
}

#[derive(Debug, Clone, Copy)]
pub struct ArgConstraint {
    pub arg_index: u8,
    pub constraint_type: ArgConstraintType,
    pub value: ArgConstraintValue,
}

impl ArgConstraint {
    pub const INACTIVE: ArgConstraint = ArgConstraint {
        arg_index: 0,
        constraint_type: ArgConstraintType::Any,
        value: ArgConstraintValue::Num(0),
    };

    pub const fn numeric(arg_index: u8, constraint_type: ArgConstraintType, value: u64) -> Self {
        Self {
            arg_index,
            constraint_type,
            value: ArgConstraintValue::Num(value),
        }
    }

    pub const fn string(arg_index: u8, constraint_type: ArgConstraintType, s: &str) -> Self {
        let mut bytes = [0u8; 64];
        let src = s.as_bytes();
        let mut i = 0;
        while i < src.len() && i < 64 {
            bytes[i] = src[i];
            i += 1;
        }
        Self {
            arg_index,
            constraint_type,
            value: ArgConstraintValue::Str(bytes),
        }
    }

    fn is_active(&self) -> bool {
        !matches!(self.constraint_type, ArgConstraintType::Any)
    }

    /// Evaluates this constraint against raw argument words plus, when the
    /// constraint is a `str_*` one, a resolver for reading the pointee
    /// string out of the target process's address space. Any read failure
    /// evaluates to `false` - never a panic, never a crash.
    pub fn evaluate(&self, args: &[u64; 6], read_str: impl FnOnce(u64) -> Option<String>) -> bool {
        if !self.is_active() {
            return true;
        }
        let idx = self.arg_index as usize;
        if idx >= 6 {
            return false;
        }
        let raw = args[idx];

        if self.constraint_type.is_string() {
            let ArgConstraintValue::Str(pattern) = self.value else {
                return false;
            };
            let nul = pattern.iter().position(|&b| b == 0).unwrap_or(64);
            let pattern = std::str::from_utf8(&pattern[..nul]).unwrap_or("");
            let Some(actual) = read_str(raw) else {
                return false;
            };
            return match self.constraint_type {
                ArgConstraintType::StrEquals => actual == pattern,
                ArgConstraintType::StrPrefix => actual.starts_with(pattern),
                ArgConstraintType::StrSuffix => actual.ends_with(pattern),
                ArgConstraintType::StrContains => actual.contains(pattern),
                _ => unreachable!(),
            };
        }

        let ArgConstraintValue::Num(value) = self.value else {
            return false;
        };
        match self.constraint_type {
            ArgConstraintType::Equals => raw == value,
            ArgConstraintType::NotEquals => raw != value,
            ArgConstraintType::GreaterThan => raw > value,
            ArgConstraintType::LessThan => raw < value,
            ArgConstraintType::BitmaskSet => raw & value == value,
            ArgConstraintType::BitmaskClear => raw & value == 0,
            ArgConstraintType::Any => true,
            _ => unreachable!(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PatternStep {
    pub syscall_match: SyscallMatch,
    pub process_relationship: ProcessRelationship,
    /// Microseconds since the previous step; `0` means unconstrained.
    pub max_time_delta_us: u64,
    /// Syscalls-issued-by-this-pid distance since the previous step; `0`
    /// means unconstrained.
    pub max_step_distance: u64,
    pub constraints: [ArgConstraint; 2],
}

impl PatternStep {
    pub const fn new(syscall_match: SyscallMatch) -> Self {
        Self {
            syscall_match,
            process_relationship: ProcessRelationship::SameProcess,
            max_time_delta_us: 0,
            max_step_distance: 0,
            constraints: [ArgConstraint::INACTIVE; 2],
        }
    }

    pub const fn with_time_delta(mut self, us: u64) -> Self {
        self.max_time_delta_us = us;
        self
    }

    pub const fn with_step_distance(mut self, n: u64) -> Self {
        self.max_step_distance = n;
        self
    }

    pub const fn with_constraint(mut self, slot: usize, constraint: ArgConstraint) -> Self {
        self.constraints[slot] = constraint;
        self
    }
}

pub const MAX_STEPS: usize = 6;

#[derive(Debug, Clone, Copy)]
pub struct Pattern {
    pub id_hash: u64,
    pub name: [u8; 32],
    pub steps: [PatternStep; MAX_STEPS],
    pub step_count: u8,
    pub severity: Severity,
    pub max_sequence_window_ms: u64,
    pub enabled: bool,
    pub whitelisted_binaries: Option<&'static [&'static str]>,
}

impl Pattern {
    pub fn name_str(&self) -> &str {
        let nul = self.name.iter().position(|&b| b == 0).unwrap_or(32);
        std::str::from_utf8(&self.name[..nul]).unwrap_or("")
    }

    pub fn is_whitelisted(&self, binary_basename: &str) -> bool {
        self.whitelisted_binaries
            .is_some_and(|list| list.contains(&binary_basename))
    }
}

/// FNV-1a, computed at compile time. The plaintext pattern name is kept
/// only so humans reading a log line can make sense of `id_hash`; live
/// matching keys off the hash alone.
pub const fn fnv1a64(s: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let bytes = s.as_bytes();
    let mut hash = OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(PRIME);
        i += 1;
    }
    hash
}

const fn padded_name(s: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && i < 32 {
        out[i] = bytes[i];
        i += 1;
    }
    out
}

const fn pad_steps(steps: &[PatternStep]) -> [PatternStep; MAX_STEPS] {
    let filler = PatternStep::new(SyscallMatch::Class(SyscallClass::Any));
    let mut out = [filler; MAX_STEPS];
    let mut i = 0;
    while i < steps.len() && i < MAX_STEPS {
        out[i] = steps[i];
        i += 1;
    }
    out
}

macro_rules! pattern {
    (
        name: $name:literal,
        steps: [$($step:expr),+ $(,)?],
        severity: $severity:expr,
        window_ms: $window:expr,
        whitelist: $whitelist:expr $(,)?
    ) => {
        Pattern {
            id_hash: fnv1a64($name),
            name: padded_name($name),
            steps: pad_steps(&[$($step),+]),
            step_count: { let s: &[PatternStep] = &[$($step),+]; s.len() as u8 },
            severity: $severity,
            max_sequence_window_ms: $window,
            enabled: true,
            whitelisted_binaries: $whitelist,
        }
    };
}

const SSH_KEY_PATHS: &str = ".ssh/id_rsa";

/// The hot-tier pattern database. Six patterns, kept well under the 8 KiB
/// cache-residency budget (see `grimoire::tests::pattern_cache_residency`).
pub const PATTERN_DB: [Pattern; 6] = [
    pattern! {
        name: "reverse_shell_classic",
        steps: [
            PatternStep::new(SyscallMatch::Exact(syscall_nr::SOCKET)),
            PatternStep::new(SyscallMatch::Exact(syscall_nr::CONNECT)).with_time_delta(5_000_000),
            PatternStep::new(SyscallMatch::Exact(syscall_nr::DUP2)).with_time_delta(5_000_000),
            PatternStep::new(SyscallMatch::Exact(syscall_nr::DUP2)).with_time_delta(5_000_000),
            PatternStep::new(SyscallMatch::Exact(syscall_nr::DUP2)).with_time_delta(5_000_000),
            PatternStep::new(SyscallMatch::Exact(syscall_nr::EXECVE)).with_time_delta(5_000_000),
        ],
        severity: Severity::Critical,
        window_ms: 2_000,
        whitelist: None,
    },
    pattern! {
        name: "fork_bomb_rapid",
        steps: [
            PatternStep::new(SyscallMatch::Exact(syscall_nr::CLONE)),
            PatternStep::new(SyscallMatch::Exact(syscall_nr::CLONE)).with_step_distance(5),
            PatternStep::new(SyscallMatch::Exact(syscall_nr::CLONE)).with_step_distance(5),
            PatternStep::new(SyscallMatch::Exact(syscall_nr::CLONE)).with_step_distance(5),
        ],
        severity: Severity::Critical,
        window_ms: 400,
        whitelist: Some(&["make", "gcc", "cargo", "cc1", "ninja", "node"]),
    },
    pattern! {
        name: "privilege_escalation_after_exec",
        steps: [
            PatternStep::new(SyscallMatch::Exact(syscall_nr::EXECVE)),
            PatternStep::new(SyscallMatch::Class(SyscallClass::Privilege)).with_time_delta(1_000_000),
        ],
        severity: Severity::High,
        window_ms: 3_000,
        whitelist: Some(&["sudo", "su", "login", "sshd"]),
    },
    pattern! {
        name: "credential_theft_ssh_key",
        steps: [
            PatternStep::new(SyscallMatch::Exact(syscall_nr::OPENAT))
                .with_constraint(0, ArgConstraint::string(1, ArgConstraintType::StrContains, SSH_KEY_PATHS)),
            PatternStep::new(SyscallMatch::Exact(syscall_nr::READ)).with_time_delta(2_000_000),
        ],
        severity: Severity::High,
        window_ms: 5_000,
        whitelist: Some(&["ssh", "ssh-agent", "git"]),
    },
    pattern! {
        name: "kernel_module_load",
        steps: [
            PatternStep::new(SyscallMatch::Class(SyscallClass::KernelModule)),
        ],
        severity: Severity::Critical,
        window_ms: 1_000,
        whitelist: Some(&["modprobe", "insmod", "depmod", "kmod"]),
    },
    pattern! {
        name: "debugger_attach",
        steps: [
            PatternStep::new(SyscallMatch::Class(SyscallClass::Debug)),
        ],
        severity: Severity::Warning,
        window_ms: 1_000,
        whitelist: Some(&["gdb", "strace", "ltrace", "lldb"]),
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_cache_residency() {
        assert!(
            std::mem::size_of::<Pattern>() <= 1536,
            "pattern size {} exceeds 1536 bytes",
            std::mem::size_of::<Pattern>()
        );
        assert!(
            std::mem::size_of::<[Pattern; 6]>() <= 8192,
            "pattern db size {} exceeds 8192 bytes",
            std::mem::size_of::<[Pattern; 6]>()
        );
    }

    #[test]
    fn fnv1a_is_stable_and_distinguishes_names() {
        assert_eq!(fnv1a64("reverse_shell_classic"), fnv1a64("reverse_shell_classic"));
        assert_ne!(fnv1a64("reverse_shell_classic"), fnv1a64("fork_bomb_rapid"));
    }

    #[test]
    fn every_pattern_name_fits_and_round_trips() {
        for pattern in PATTERN_DB.iter() {
            assert!(!pattern.name_str().is_empty());
            assert_eq!(fnv1a64(pattern.name_str()), pattern.id_hash);
        }
    }

    #[test]
    fn fork_bomb_whitelists_make() {
        let pattern = PATTERN_DB.iter().find(|p| p.name_str() == "fork_bomb_rapid").unwrap();
        assert!(pattern.is_whitelisted("make"));
        assert!(!pattern.is_whitelisted("evil"));
    }

    #[test]
    fn numeric_constraint_equals() {
        let c = ArgConstraint::numeric(0, ArgConstraintType::Equals, 42);
        let mut args = [0u64; 6];
        args[0] = 42;
        assert!(c.evaluate(&args, |_| None));
        args[0] = 43;
        assert!(!c.evaluate(&args, |_| None));
    }

    #[test]
    fn string_constraint_reads_through_resolver() {
        let c = ArgConstraint::string(1, ArgConstraintType::StrContains, "id_rsa");
        let args = [0u64; 6];
        assert!(c.evaluate(&args, |_| Some("/home/alice/.ssh/id_rsa".to_string())));
        assert!(!c.evaluate(&args, |_| Some("/etc/hosts".to_string())));
    }

    #[test]
    fn string_constraint_read_failure_is_false_not_panic() {
        let c = ArgConstraint::string(1, ArgConstraintType::StrContains, "id_rsa");
        let args = [0u64; 6];
        assert!(!c.evaluate(&args, |_| None));
    }

    #[test]
    fn inactive_constraint_always_true() {
        let c = ArgConstraint::INACTIVE;
        let args = [0u64; 6];
        assert!(c.evaluate(&args, |_| None));
    }
}
