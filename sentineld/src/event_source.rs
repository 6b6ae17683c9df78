//! The Controller's one source of [`SyscallEvent`]s: a precompiled eBPF
//! object loaded at startup and attached to the raw syscall entry
//! tracepoint, feeding a kernel ring buffer that this daemon polls.
//!
//! Authoring the kernel-side program itself is out of scope here - this
//! module only loads, attaches, and drains what's already compiled,
//! exactly the way the upstream collector this codebase is descended
//! from does it (see `read_bpf_bytes`/`init_ebpf` in git history for the
//! perf-buffer-era equivalent).

use crate::grimoire::pattern::{Pattern, SyscallMatch, PATTERN_DB};
use aya::maps::{HashMap as AyaHashMap, MapData, RingBuf};
use aya::programs::TracePoint;
use aya::{Ebpf, EbpfLoader};
use sentineld_common::{syscall_nr, SyscallEvent, SYSCALL_EVENT_SIZE};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

const RING_BUF_MAP_NAME: &str = "EVENTS";
const TRACEPOINT_PROGRAM_NAME: &str = "sentineld";
const MONITORED_SYSCALLS_MAP_NAME: &str = "MONITORED_SYSCALLS";

/// Distinguishes "a map this daemon depends on wasn't in the loaded
/// object" from other attach failures, so `main` can exit with a
/// different code for each.
#[derive(Debug)]
pub struct MapNotFoundError(pub &'static str);

impl fmt::Display for MapNotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "required map '{}' not found", self.0)
    }
}

impl std::error::Error for MapNotFoundError {}

pub struct EventSource {
    _bpf: Ebpf,
    ring: RingBuf<MapData>,
    lost: u64,
}

impl EventSource {
    /// Finds the first existing path in `candidates`, loads it as an eBPF
    /// object, attaches its `sys_enter` tracepoint program, and takes
    /// ownership of the `EVENTS` ring buffer map.
    pub fn attach(candidates: &[String], attach_pid: Option<u32>) -> anyhow::Result<Self> {
        let object_path = locate_bpf_object(candidates).ok_or_else(|| {
            anyhow::anyhow!(
                "no eBPF object found in any candidate path: {}",
                candidates.join(", ")
            )
        })?;
        let bytes = std::fs::read(&object_path)?;

        let mut loader = EbpfLoader::new();
        if let Some(pid) = attach_pid {
            loader.set_global("ATTACH_PID", &pid, true);
        }
        let mut bpf = loader.load(&bytes)?;

        let program: &mut TracePoint = bpf
            .program_mut(TRACEPOINT_PROGRAM_NAME)
            .ok_or_else(|| anyhow::anyhow!("{TRACEPOINT_PROGRAM_NAME} program not found in {object_path:?}"))?
            .try_into()?;
        program.load()?;
        program.attach("raw_syscalls", "sys_enter")?;

        let events_map = bpf.take_map(RING_BUF_MAP_NAME).ok_or(MapNotFoundError(RING_BUF_MAP_NAME))?;
        let ring = RingBuf::try_from(events_map)?;

        populate_monitored_syscalls(&mut bpf);

        log::info!("[sentineld] attached to {object_path:?}, polling ring buffer '{RING_BUF_MAP_NAME}'");
        Ok(Self { _bpf: bpf, ring, lost: 0 })
    }

    /// Drains every currently-available record without blocking. Intended
    /// to be called from the >=10Hz poll tick. A record that fails to
    /// decode (short or corrupt) is dropped and counted rather than
    /// passed on or treated as fatal; see [`Self::take_lost`].
    pub fn drain(&mut self, mut on_event: impl FnMut(SyscallEvent)) -> usize {
        let mut count = 0;
        while let Some(item) = self.ring.next() {
            match decode_event(&item) {
                Some(event) => {
                    on_event(event);
                    count += 1;
                }
                None => self.lost += 1,
            }
        }
        count
    }

    /// Returns and resets the count of records dropped since the last call,
    /// for the scrape tick to fold into the loss counter spec §9 notes the
    /// ring buffer exposes but leaves unsurfaced by any particular sink.
    pub fn take_lost(&mut self) -> u64 {
        std::mem::take(&mut self.lost)
    }
}

/// Writes the set of syscall numbers [`monitored_syscalls`] derives from
/// the active pattern database into the kernel-side `MONITORED_SYSCALLS`
/// map, so the eBPF program can filter the syscalls it forwards down to
/// what the loaded patterns actually use. Absence of the map (an object
/// built without the filter) is logged and otherwise ignored - every
/// syscall simply keeps flowing unfiltered.
fn populate_monitored_syscalls(bpf: &mut Ebpf) {
    let Some(map) = bpf.take_map(MONITORED_SYSCALLS_MAP_NAME) else {
        log::debug!("[sentineld] {MONITORED_SYSCALLS_MAP_NAME} map not present, skipping syscall filter");
        return;
    };
    let mut map: AyaHashMap<_, u32, u8> = match AyaHashMap::try_from(map) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("[sentineld] {MONITORED_SYSCALLS_MAP_NAME} has an unexpected layout: {e}");
            return;
        }
    };
    let syscalls = monitored_syscalls(&PATTERN_DB);
    for nr in &syscalls {
        if let Err(e) = map.insert(nr, 1u8, 0) {
            log::warn!("[sentineld] failed to insert syscall {nr} into {MONITORED_SYSCALLS_MAP_NAME}: {e}");
        }
    }
    log::info!("[sentineld] populated {MONITORED_SYSCALLS_MAP_NAME} with {} syscall(s)", syscalls.len());
}

fn locate_bpf_object(candidates: &[String]) -> Option<PathBuf> {
    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

fn decode_event(bytes: &[u8]) -> Option<SyscallEvent> {
    if bytes.len() < SYSCALL_EVENT_SIZE {
        return None;
    }
    bytemuck::try_pod_read_unaligned(&bytes[..SYSCALL_EVENT_SIZE]).ok()
}

/// Every syscall number referenced, directly or via class membership, by
/// an enabled pattern - the set a kernel-side filter would only need to
/// forward, reducing ring buffer pressure when the whole database is a
/// small, known set of techniques.
pub fn monitored_syscalls(patterns: &[Pattern]) -> BTreeSet<u32> {
    const ALL_KNOWN: &[u32] = &[
        syscall_nr::READ,
        syscall_nr::WRITE,
        syscall_nr::OPEN,
        syscall_nr::CLOSE,
        syscall_nr::SOCKET,
        syscall_nr::CONNECT,
        syscall_nr::ACCEPT,
        syscall_nr::SENDTO,
        syscall_nr::RECVFROM,
        syscall_nr::SENDMSG,
        syscall_nr::RECVMSG,
        syscall_nr::BIND,
        syscall_nr::LISTEN,
        syscall_nr::CLONE,
        syscall_nr::FORK,
        syscall_nr::VFORK,
        syscall_nr::EXECVE,
        syscall_nr::DUP2,
        syscall_nr::SETUID,
        syscall_nr::SETGID,
        syscall_nr::PTRACE,
        syscall_nr::OPENAT,
        syscall_nr::INIT_MODULE,
        syscall_nr::FINIT_MODULE,
    ];

    let mut out = BTreeSet::new();
    for pattern in patterns.iter().filter(|p| p.enabled) {
        for step in pattern.steps.iter().take(pattern.step_count as usize) {
            match step.syscall_match {
                SyscallMatch::Exact(nr) => {
                    out.insert(nr);
                }
                SyscallMatch::Class(class) => {
                    for &nr in ALL_KNOWN {
                        if class.contains(nr) {
                            out.insert(nr);
                        }
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grimoire::pattern::PATTERN_DB;

    #[test]
    fn locate_picks_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.o");
        let present = dir.path().join("present.o");
        std::fs::write(&present, b"not a real object").unwrap();
        let candidates = vec![
            missing.to_string_lossy().into_owned(),
            present.to_string_lossy().into_owned(),
        ];
        let found = locate_bpf_object(&candidates).unwrap();
        assert_eq!(found, present);
    }

    #[test]
    fn locate_returns_none_when_nothing_exists() {
        let candidates = vec!["/definitely/not/a/real/path.o".to_string()];
        assert!(locate_bpf_object(&candidates).is_none());
    }

    #[test]
    fn decode_event_round_trips_through_bytemuck() {
        let event = SyscallEvent {
            syscall_nr: syscall_nr::EXECVE,
            pid: 42,
            timestamp_ns: 123,
            args: [1, 2, 3, 4, 5, 6],
            _reserved: 0,
        };
        let bytes = bytemuck::bytes_of(&event);
        let decoded = decode_event(bytes).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn decode_event_rejects_truncated_records() {
        assert!(decode_event(&[0u8; 4]).is_none());
    }

    #[test]
    fn monitored_syscalls_covers_every_enabled_pattern_step() {
        let set = monitored_syscalls(&PATTERN_DB);
        assert!(set.contains(&syscall_nr::SOCKET));
        assert!(set.contains(&syscall_nr::EXECVE));
        assert!(set.contains(&syscall_nr::INIT_MODULE));
        assert!(set.contains(&syscall_nr::PTRACE));
    }
}
