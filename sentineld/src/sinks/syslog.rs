//! RFC 5424-ish syslog sink, written over `/dev/log` via `SOCK_DGRAM`.

use super::Sink;
use crate::alert::Alert;
use async_trait::async_trait;
use std::os::unix::net::UnixDatagram;
use std::sync::Mutex;

const FACILITY_SECURITY: u8 = 4; // security/authorization messages

pub struct SyslogSink {
    socket: Mutex<UnixDatagram>,
    hostname: String,
}

impl SyslogSink {
    pub fn connect(socket_path: &str) -> anyhow::Result<Self> {
        let socket = UnixDatagram::unbound()?;
        socket.connect(socket_path)?;
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        Ok(Self {
            socket: Mutex::new(socket),
            hostname,
        })
    }

    fn format(&self, alert: &Alert) -> String {
        let pri = FACILITY_SECURITY as u32 * 8 + alert.severity.syslog_numeric() as u32;
        format!(
            "<{pri}>1 - {} sentineld {} - - pid={} kind={:?} severity={} {}",
            self.hostname, alert.pid, alert.pid, alert.kind, alert.severity.as_str(), alert.message
        )
    }
}

#[async_trait]
impl Sink for SyslogSink {
    fn name(&self) -> &'static str {
        "syslog"
    }

    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        let line = self.format(alert);
        let socket = self.socket.lock().unwrap();
        socket.send(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentineld_common::Severity;

    fn sample_alert() -> Alert {
        Alert {
            timestamp: 0,
            severity: Severity::Critical,
            kind: crate::alert::AlertKind::Spike,
            pid: 42,
            syscall_nr: Some(1),
            observed: None,
            expected: None,
            stddev: None,
            z_score: None,
            message: "test message".into(),
        }
    }

    #[test]
    fn pri_encodes_facility_and_severity() {
        let sink = SyslogSink {
            socket: Mutex::new(UnixDatagram::unbound().unwrap()),
            hostname: "testhost".into(),
        };
        let line = sink.format(&sample_alert());
        // facility 4 * 8 + critical(2) = 34
        assert!(line.starts_with("<34>1"));
        assert!(line.contains("testhost"));
        assert!(line.contains("test message"));
    }
}
