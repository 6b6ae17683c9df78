//! Alert Router: fan-out from the single internal [`crate::alert::Alert`]
//! stream to whichever external sinks are configured. Each sink is
//! isolated - one sink erroring or timing out never blocks or drops the
//! alert for the others.

pub mod auditd;
pub mod json_file;
pub mod prometheus;
pub mod syslog;
pub mod webhook;

use crate::alert::Alert;
use crate::metrics::Metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Per-sink delivery timeout, applied uniformly so one wedged sink
/// (a blocked socket, a stalled HTTP connection) can't stall the router.
pub const SINK_TIMEOUT: Duration = Duration::from_secs(2);

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, alert: &Alert) -> anyhow::Result<()>;

    /// Forces any buffered data out to durable storage. Default is a no-op;
    /// sinks that buffer (e.g. file writers) override it.
    async fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Releases any held resources (sockets, file handles) on shutdown.
    /// Default is a no-op; most sinks here open per-send and have nothing
    /// to hold open.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct AlertRouter {
    sinks: Vec<Box<dyn Sink>>,
    metrics: Arc<Metrics>,
}

impl AlertRouter {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            sinks: Vec::new(),
            metrics,
        }
    }

    pub fn register(&mut self, sink: Box<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Dispatches to every registered sink concurrently. A sink that
    /// errors or exceeds [`SINK_TIMEOUT`] is logged and counted, never
    /// propagated to the caller or allowed to affect its siblings.
    pub async fn dispatch(&self, alert: &Alert) {
        self.metrics.inc_alert(alert.severity);
        for sink in &self.sinks {
            match tokio::time::timeout(SINK_TIMEOUT, sink.send(alert)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::warn!("[sentineld] sink '{}' failed: {err}", sink.name());
                    self.metrics.inc_sink_failure();
                }
                Err(_) => {
                    log::warn!("[sentineld] sink '{}' timed out after {SINK_TIMEOUT:?}", sink.name());
                    self.metrics.inc_sink_failure();
                }
            }
        }
    }

    /// Best-effort flush and close on shutdown, bounded by [`SINK_TIMEOUT`]
    /// per sink regardless of how many sinks are registered. A sink that
    /// errors or times out on either call is logged and counted, never
    /// allowed to block its siblings.
    pub async fn flush(&self) {
        for sink in &self.sinks {
            match tokio::time::timeout(SINK_TIMEOUT, sink.flush()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::warn!("[sentineld] sink '{}' failed to flush: {err}", sink.name());
                    self.metrics.inc_sink_failure();
                }
                Err(_) => {
                    log::warn!("[sentineld] sink '{}' timed out flushing after {SINK_TIMEOUT:?}", sink.name());
                    self.metrics.inc_sink_failure();
                }
            }
            match tokio::time::timeout(SINK_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::warn!("[sentineld] sink '{}' failed to close: {err}", sink.name());
                    self.metrics.inc_sink_failure();
                }
                Err(_) => {
                    log::warn!("[sentineld] sink '{}' timed out closing after {SINK_TIMEOUT:?}", sink.name());
                    self.metrics.inc_sink_failure();
                }
            }
        }
    }
}
