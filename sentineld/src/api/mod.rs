//! The daemon's small HTTP surface: a health check, the JSON and
//! Prometheus metrics views, a status summary, and recent alert history.
//! Everything enforcement- or configuration-related stays on the CLI;
//! nothing here accepts a write.

use crate::alert::Alert;
use crate::metrics::Metrics;
use crate::sinks::prometheus::PrometheusSink;
use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

const ALERT_HISTORY_CAPACITY: usize = 256;

pub struct AppState {
    pub metrics: Arc<Metrics>,
    pub prometheus: Arc<PrometheusSink>,
    pub recent_alerts: RwLock<VecDeque<Alert>>,
}

impl AppState {
    pub fn new(metrics: Arc<Metrics>, prometheus: Arc<PrometheusSink>) -> Self {
        Self {
            metrics,
            prometheus,
            recent_alerts: RwLock::new(VecDeque::with_capacity(ALERT_HISTORY_CAPACITY)),
        }
    }

    pub async fn record_alert(&self, alert: Alert) {
        let mut history = self.recent_alerts.write().await;
        if history.len() == ALERT_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(alert);
    }
}

pub fn all_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_json))
        .route("/metrics/prometheus", get(metrics_prometheus))
        .route("/status", get(status))
        .route("/alerts", get(alerts))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct MetricsSnapshot {
    uptime_seconds: u64,
    events_total: u64,
    events_per_sec: u64,
    rb_overflows: u64,
    total_alerts: u64,
    alerts_dropped: u64,
    total_matches: u64,
    processes_terminated: u64,
    correlation_alerts: u64,
    sink_failures: u64,
    baselines_tracked: usize,
    learning_mode: bool,
}

async fn metrics_json(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let m = &state.metrics;
    Json(MetricsSnapshot {
        uptime_seconds: m.uptime_seconds(),
        events_total: m.events_total(),
        events_per_sec: m.events_per_sec(),
        rb_overflows: m.rb_overflows(),
        total_alerts: m.total_alerts(),
        alerts_dropped: m.alerts_dropped(),
        total_matches: m.total_matches(),
        processes_terminated: m.processes_terminated(),
        correlation_alerts: m.correlation_alerts(),
        sink_failures: m.sink_failures(),
        baselines_tracked: m.baselines_tracked(),
        learning_mode: m.learning_mode(),
    })
}

async fn metrics_prometheus(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut body = state.prometheus.render();
    body.push_str("# HELP sentineld_ring_buffer_overflows_total Records dropped from the kernel ring buffer\n");
    body.push_str("# TYPE sentineld_ring_buffer_overflows_total counter\n");
    body.push_str(&format!(
        "sentineld_ring_buffer_overflows_total {}\n",
        state.metrics.rb_overflows()
    ));
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[derive(Serialize)]
struct Status {
    uptime_seconds: u64,
    learning_mode: bool,
    baselines_tracked: usize,
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(Status {
        uptime_seconds: state.metrics.uptime_seconds(),
        learning_mode: state.metrics.learning_mode(),
        baselines_tracked: state.metrics.baselines_tracked(),
    })
}

async fn alerts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let history = state.recent_alerts.read().await;
    Json(history.iter().cloned().collect::<Vec<_>>())
}
