//! Sink for forwarding alerts into the Linux audit subsystem's user-space
//! socket, in the `key=value` line shape auditd's own records use.

use super::Sink;
use crate::alert::Alert;
use async_trait::async_trait;
use std::os::unix::net::UnixDatagram;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct AuditdSink {
    socket: Mutex<UnixDatagram>,
    seq: AtomicU64,
}

impl AuditdSink {
    pub fn connect(socket_path: &str) -> anyhow::Result<Self> {
        let socket = UnixDatagram::unbound()?;
        socket.connect(socket_path)?;
        Ok(Self {
            socket: Mutex::new(socket),
            seq: AtomicU64::new(1),
        })
    }

    /// Mirrors the `type=USER_AVC msg=audit(<ts>.000:<seq>): zig_sentinel ...`
    /// shape auditd's own USER_AVC records use, so downstream `ausearch`/`aureport`
    /// tooling parses this line the same way.
    fn format(&self, alert: &Alert) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "type=USER_AVC msg=audit({}.000:{}): zig_sentinel anomaly_type={} severity={} pid={} syscall={} z_score={}\n",
            alert.timestamp,
            seq,
            alert.kind.as_str(),
            alert.severity.as_str(),
            alert.pid,
            alert.syscall_nr.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
            alert.z_score.map(|z| format!("{z:.2}")).unwrap_or_else(|| "-".to_string()),
        )
    }
}

#[async_trait]
impl Sink for AuditdSink {
    fn name(&self) -> &'static str {
        "auditd"
    }

    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        let line = self.format(alert);
        let socket = self.socket.lock().unwrap();
        socket.send(line.as_bytes())?;
        Ok(())
    }
}
