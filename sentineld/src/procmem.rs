//! Cross-address-space string reads, used by Grimoire argument constraints
//! to inspect e.g. a path pointer passed to `openat`.
//!
//! Any failure - bad address, permission denied, process already gone - is
//! folded into [`ReadError`] and must never propagate as a panic. The
//! matcher treats every `Err` as "constraint false", never as a crash.

use nix::sys::uio::{RemoteIoVec, process_vm_readv};
use nix::unistd::Pid;
use std::io::IoSliceMut;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    BadAddress,
    PermissionDenied,
    NoSuchProcess,
    Unexpected,
}

/// Reads up to `max_len` bytes (capped at 64, the largest string constraint
/// this engine supports) from `pid`'s address space at `addr` via the
/// scatter-gather cross-address-space read syscall. Bounded, fault-tolerant:
/// any kernel error comes back as `Err`, never a panic.
pub fn read_peer_string(pid: u32, addr: u64, max_len: usize) -> Result<Vec<u8>, ReadError> {
    let len = max_len.min(64);
    if addr == 0 || len == 0 {
        return Err(ReadError::BadAddress);
    }

    let mut buf = vec![0u8; len];
    let local = [IoSliceMut::new(&mut buf)];
    let remote = [RemoteIoVec {
        base: addr as usize,
        len,
    }];

    match process_vm_readv(Pid::from_raw(pid as i32), &local, &remote) {
        Ok(n) => {
            buf.truncate(n);
            Ok(buf)
        }
        Err(nix::errno::Errno::EFAULT) => Err(ReadError::BadAddress),
        Err(nix::errno::Errno::EPERM) => Err(ReadError::PermissionDenied),
        Err(nix::errno::Errno::ESRCH) => Err(ReadError::NoSuchProcess),
        Err(_) => Err(ReadError::Unexpected),
    }
}

/// Reads a NUL-terminated string (or up to `max_len` bytes if no NUL is
/// found) for use against the `str_*` argument constraint types.
pub fn read_peer_cstr(pid: u32, addr: u64, max_len: usize) -> Result<String, ReadError> {
    let bytes = read_peer_string(pid, addr, max_len)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_address_is_bad_address() {
        let result = read_peer_string(std::process::id(), 0, 16);
        assert_eq!(result.unwrap_err(), ReadError::BadAddress);
    }

    #[test]
    fn nonexistent_process_is_no_such_process_or_bad_address() {
        // A pid that (almost certainly) does not exist.
        let result = read_peer_string(u32::MAX - 1, 0x1000, 16);
        assert!(result.is_err());
    }

    #[test]
    fn reads_own_memory_successfully() {
        let marker: [u8; 8] = *b"sentnlds";
        let addr = marker.as_ptr() as u64;
        let result = read_peer_string(std::process::id(), addr, 8).unwrap();
        assert_eq!(&result[..], b"sentnlds");
    }

    #[test]
    fn cstr_reader_stops_at_nul() {
        let marker: [u8; 8] = *b"abc\0xyz\0";
        let addr = marker.as_ptr() as u64;
        let s = read_peer_cstr(std::process::id(), addr, 8).unwrap();
        assert_eq!(s, "abc");
    }
}
