use anyhow::Context;
use caps::{CapSet, Capability};
use clap::Parser;
use log::{info, warn};
use sentineld::alert::{Alert, AlertKind, AlertQueue};
use sentineld::anomaly::AnomalyDetector;
use sentineld::api::{AppState, all_routes};
use sentineld::baseline::BaselineStore;
use sentineld::binary_cache::{self, ProcessBinaryCache};
use sentineld::config::Config;
use sentineld::correlation::CorrelationEngine;
use sentineld::enforcement::{self, EnforcementSource};
use sentineld::event_source::EventSource;
use sentineld::grimoire::GrimoireEngine;
use sentineld::hwtier::HardwareProfile;
use sentineld::metrics::Metrics;
use sentineld::procmem;
use sentineld::sinks::{AlertRouter, Sink};
use sentineld_common::{SyscallEvent, syscall_nr};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Host-based behavioral intrusion detection and enforcement daemon.
#[derive(Parser, Debug, Default)]
#[command(name = "sentineld")]
#[command(about = "Host-based behavioral intrusion detection and enforcement daemon")]
struct Args {
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run for this many seconds, then exit cleanly. 0 runs until a signal.
    #[arg(long)]
    duration_seconds: Option<u64>,
    /// Trace only this pid (and its descendants).
    #[arg(long)]
    attach_pid: Option<u32>,

    #[arg(long)]
    learning_period_seconds: Option<u64>,
    #[arg(long)]
    no_learning: bool,
    #[arg(long)]
    baseline_path: Option<String>,
    #[arg(long)]
    no_load_baselines: bool,
    #[arg(long)]
    detection_threshold_sigma: Option<f64>,
    #[arg(long)]
    no_detection: bool,

    #[arg(long)]
    enable_correlation: Option<bool>,
    #[arg(long)]
    correlation_threshold: Option<u32>,
    #[arg(long)]
    correlation_timeout_ms: Option<u64>,
    #[arg(long)]
    min_exfil_bytes: Option<u64>,
    #[arg(long)]
    auto_terminate: bool,

    #[arg(long)]
    enable_grimoire: Option<bool>,
    #[arg(long)]
    grimoire_enforce: bool,
    #[arg(long)]
    grimoire_debug: bool,

    /// Validate config and environment, then exit without attaching to
    /// the kernel or enforcing anything.
    #[arg(long)]
    dry_run: bool,
    /// Print the resolved hardware tier and attach summary as JSON, then exit.
    #[arg(long)]
    probe_only: bool,
}

fn apply_overrides(mut config: Config, args: &Args) -> Config {
    if let Some(v) = args.duration_seconds {
        config.runtime.duration_seconds = v;
    }
    if let Some(v) = args.attach_pid {
        config.runtime.attach_pid = Some(v);
    }
    if args.dry_run {
        config.runtime.dry_run = true;
    }
    if let Some(v) = args.learning_period_seconds {
        config.baseline.learning_period_seconds = v;
    }
    if args.no_learning {
        config.baseline.learning_period_seconds = 0;
    }
    if let Some(v) = &args.baseline_path {
        config.baseline.baseline_path = v.clone();
    }
    if args.no_load_baselines {
        config.baseline.no_load_baselines = true;
    }
    if let Some(v) = args.detection_threshold_sigma {
        config.baseline.detection_threshold_sigma = v;
    }
    if args.no_detection {
        config.baseline.no_detection = true;
    }
    if let Some(v) = args.enable_correlation {
        config.correlation.enable_correlation = v;
    }
    if let Some(v) = args.correlation_threshold {
        config.correlation.correlation_threshold = v;
    }
    if let Some(v) = args.correlation_timeout_ms {
        config.correlation.correlation_timeout_ms = v;
    }
    if let Some(v) = args.min_exfil_bytes {
        config.correlation.min_exfil_bytes = v;
    }
    if args.auto_terminate {
        config.correlation.auto_terminate = true;
    }
    if let Some(v) = args.enable_grimoire {
        config.grimoire.enable_grimoire = v;
    }
    if args.grimoire_enforce {
        config.grimoire.grimoire_enforce = true;
    }
    if args.grimoire_debug {
        config.grimoire.grimoire_debug = true;
    }
    config
}

/// Minimum required kernel floor: ring buffer maps and BTF tracepoints
/// both need a 5.8+ kernel.
const MIN_KERNEL_MAJOR: u32 = 5;
const MIN_KERNEL_MINOR: u32 = 8;

fn ensure_environment() -> anyhow::Result<()> {
    let effective = caps::read(None, CapSet::Effective).context("failed to read process capabilities")?;
    if !effective.contains(&Capability::CAP_BPF) && !effective.contains(&Capability::CAP_SYS_ADMIN) {
        anyhow::bail!("missing CAP_BPF/CAP_SYS_ADMIN - run as root or grant the capability");
    }

    let version = std::fs::read_to_string("/proc/sys/kernel/osrelease").context("failed to read kernel version")?;
    let (major, minor) = parse_kernel_version(&version).context("unparseable kernel version")?;
    if (major, minor) < (MIN_KERNEL_MAJOR, MIN_KERNEL_MINOR) {
        anyhow::bail!("kernel {major}.{minor} is older than the required {MIN_KERNEL_MAJOR}.{MIN_KERNEL_MINOR}");
    }
    Ok(())
}

fn parse_kernel_version(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.split(|c: char| !c.is_ascii_digit()).next()?.parse().ok()?;
    Some((major, minor))
}

fn build_sinks(config: &Config, prometheus: Arc<sentineld::sinks::prometheus::PrometheusSink>) -> Vec<Box<dyn Sink>> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();
    if config.sinks.syslog {
        match sentineld::sinks::syslog::SyslogSink::connect("/dev/log") {
            Ok(sink) => sinks.push(Box::new(sink)),
            Err(e) => warn!("[sentineld] syslog sink disabled: {e}"),
        }
    }
    if config.sinks.json_file {
        match sentineld::sinks::json_file::JsonFileSink::new(&config.sinks.json_file_path, config.sinks.json_file_max_bytes) {
            Ok(sink) => sinks.push(Box::new(sink)),
            Err(e) => warn!("[sentineld] json_file sink disabled: {e}"),
        }
    }
    if config.sinks.auditd {
        let path = config.sinks.auditd_socket_path.as_deref().unwrap_or("/var/run/audispd_events");
        match sentineld::sinks::auditd::AuditdSink::connect(path) {
            Ok(sink) => sinks.push(Box::new(sink)),
            Err(e) => warn!("[sentineld] auditd sink disabled: {e}"),
        }
    }
    if config.sinks.prometheus {
        sinks.push(Box::new(PrometheusSinkHandle(prometheus)));
    }
    if let Some(url) = &config.sinks.webhook_url {
        sinks.push(Box::new(sentineld::sinks::webhook::WebhookSink::new(url.clone())));
    }
    sinks
}

/// Adapts the shared `Arc<PrometheusSink>` (also read by the HTTP route)
/// into the router's owned `Box<dyn Sink>` slot.
struct PrometheusSinkHandle(Arc<sentineld::sinks::prometheus::PrometheusSink>);

#[async_trait::async_trait]
impl Sink for PrometheusSinkHandle {
    fn name(&self) -> &'static str {
        "prometheus"
    }
    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        self.0.send(alert).await
    }
}

fn peer_sockaddr_ipv4(pid: u32, addr: u64) -> Option<IpAddr> {
    const AF_INET: u16 = 2;
    let bytes = procmem::read_peer_string(pid, addr, 16).ok()?;
    if bytes.len() < 8 {
        return None;
    }
    let family = u16::from_ne_bytes([bytes[0], bytes[1]]);
    if family != AF_INET {
        return None;
    }
    Some(IpAddr::V4(Ipv4Addr::new(bytes[4], bytes[5], bytes[6], bytes[7])))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(path) = &args.config {
        // SAFETY: single-threaded at this point in startup, before the
        // tokio runtime has spawned any other task that reads env vars.
        unsafe {
            std::env::set_var("SENTINELD_CONFIG", path);
        }
    }
    let config = apply_overrides(Config::load(), &args);

    let hw_profile = HardwareProfile::probe();
    info!(
        "[sentineld] hardware tier: {:?} ({} cpus, {} MiB) -> event_channel={} scrape_batch_hint={}",
        hw_profile.tier, hw_profile.cpus, hw_profile.total_memory_mb,
        hw_profile.event_channel_capacity, hw_profile.scrape_batch_hint
    );

    if args.probe_only {
        println!("{}", serde_json::to_string_pretty(&hw_profile)?);
        return Ok(());
    }

    if let Err(e) = ensure_environment() {
        warn!("[sentineld] environment check failed: {e:#}");
        if !config.runtime.dry_run {
            std::process::exit(1);
        }
    }

    if config.runtime.dry_run {
        info!("[sentineld] dry-run: configuration and environment look valid, exiting");
        return Ok(());
    }

    let metrics = Arc::new(Metrics::new());
    let prometheus_sink = Arc::new(sentineld::sinks::prometheus::PrometheusSink::new());
    let app_state = Arc::new(AppState::new(metrics.clone(), prometheus_sink.clone()));

    let mut router = AlertRouter::new(metrics.clone());
    for sink in build_sinks(&config, prometheus_sink.clone()) {
        router.register(sink);
    }
    info!("[sentineld] alert router has {} sink(s)", router.sink_count());

    let mut baselines = BaselineStore::new(
        config.baseline.baseline_path.clone(),
        Duration::from_secs(config.baseline.learning_period_seconds),
    );
    if !config.baseline.no_load_baselines {
        let loaded = baselines.load_all();
        info!("[sentineld] loaded baselines for {loaded} pid(s)");
    }
    let anomaly_detector = AnomalyDetector::new(config.baseline.detection_threshold_sigma);
    let mut alert_queue = AlertQueue::new(config.baseline.alert_burst, config.baseline.alerts_per_minute);

    let mut correlation = CorrelationEngine::new(
        config.correlation.correlation_threshold,
        config.correlation.correlation_timeout_ms,
        config.correlation.min_exfil_bytes,
        config.correlation.auto_terminate,
    );

    let mut grimoire = GrimoireEngine::new(
        config.grimoire.grimoire_enforce,
        config.grimoire.grimoire_debug,
        config.grimoire.grimoire_log_path.clone().map(PathBuf::from),
    );

    let mut binaries = ProcessBinaryCache::new();
    let mut tick_counts: HashMap<(u32, u32), u64> = HashMap::new();

    let mut event_source = match EventSource::attach(&config.runtime.bpf_object_paths, config.runtime.attach_pid) {
        Ok(source) => source,
        Err(e) => {
            if e.downcast_ref::<sentineld::event_source::MapNotFoundError>().is_some() {
                warn!("[sentineld] failed to locate required maps: {e:#}");
                std::process::exit(3);
            } else {
                warn!("[sentineld] failed to attach event source: {e:#}");
                std::process::exit(2);
            }
        }
    };

    let http = tokio::spawn({
        let state = app_state.clone();
        async move {
            let listener = match tokio::net::TcpListener::bind("127.0.0.1:9977").await {
                Ok(l) => l,
                Err(e) => {
                    warn!("[sentineld] HTTP listener disabled: {e}");
                    return;
                }
            };
            if let Err(e) = axum::serve(listener, all_routes(state)).await {
                warn!("[sentineld] HTTP server stopped: {e}");
            }
        }
    });

    let mut poll_tick = tokio::time::interval(Duration::from_millis(100));
    let mut scrape_tick = tokio::time::interval(Duration::from_secs(1));
    let mut persist_tick = tokio::time::interval(Duration::from_secs(config.baseline.persist_interval_seconds.max(1)));
    persist_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown_deadline = if config.runtime.duration_seconds > 0 {
        Some(tokio::time::sleep(Duration::from_secs(config.runtime.duration_seconds)))
    } else {
        None
    };
    tokio::pin!(shutdown_deadline);

    info!("[sentineld] running");
    loop {
        tokio::select! {
            _ = poll_tick.tick() => {
                // The ring buffer yields synchronously; events are buffered
                // here and then walked with `.await` per event so that each
                // one runs through both engines and the full sink fan-out
                // to completion before the next is handled - the single-
                // threaded cooperative model the controller promises.
                let mut batch = Vec::new();
                event_source.drain(|event: SyscallEvent| batch.push(event));

                for event in batch {
                    metrics.inc_event();
                    if !binary_cache::process_is_alive(event.pid) {
                        baselines.evict_pid(event.pid);
                        correlation.evict_pid(event.pid);
                        grimoire.evict_pid(event.pid);
                        binaries.evict(event.pid);
                        continue;
                    }

                    *tick_counts.entry((event.pid, event.syscall_nr)).or_insert(0) += 1;

                    if config.correlation.enable_correlation {
                        let peer_addr = if event.syscall_nr == syscall_nr::CONNECT {
                            peer_sockaddr_ipv4(event.pid, event.args[1])
                        } else {
                            None
                        };
                        let path = if event.syscall_nr == syscall_nr::OPEN || event.syscall_nr == syscall_nr::OPENAT {
                            let addr_arg = if event.syscall_nr == syscall_nr::OPENAT { event.args[1] } else { event.args[0] };
                            procmem::read_peer_cstr(event.pid, addr_arg, 64).ok()
                        } else {
                            None
                        };
                        let outcome = correlation.observe(
                            event.pid,
                            event.syscall_nr,
                            event.args[0] as i64,
                            event.timestamp_ns / 1_000_000,
                            peer_addr,
                            path.as_deref(),
                            event.args[2],
                        );
                        if let Some(alert) = outcome.alert {
                            metrics.inc_correlation_alert();
                            dispatch_alert(&router, &app_state, &metrics, &mut alert_queue, alert).await;
                        }
                        if outcome.terminate {
                            let outcome = enforcement::terminate(event.pid, EnforcementSource::Correlation, "exfiltration sequence completed");
                            if outcome.killed {
                                metrics.inc_processes_terminated();
                            }
                        }
                    }

                    if config.grimoire.enable_grimoire {
                        let verdicts = grimoire.observe(event.pid, event.syscall_nr, &event.args, event.timestamp_ns, &mut binaries);
                        for verdict in verdicts {
                            metrics.inc_match(verdict.severity);
                            if verdict.enforced {
                                metrics.inc_processes_terminated();
                            }
                            let alert = Alert {
                                timestamp: Alert::now_secs(),
                                severity: verdict.severity,
                                kind: AlertKind::Other,
                                pid: verdict.pid,
                                syscall_nr: Some(event.syscall_nr),
                                observed: None,
                                expected: None,
                                stddev: None,
                                z_score: None,
                                message: format!("grimoire pattern '{}' matched (enforced={})", verdict.pattern_name, verdict.enforced),
                            };
                            dispatch_alert(&router, &app_state, &metrics, &mut alert_queue, alert).await;
                        }
                    }
                }
            }
            _ = scrape_tick.tick() => {
                metrics.rollup();
                metrics.add_rb_overflows(event_source.take_lost());
                metrics.set_learning_mode(baselines.is_learning());
                metrics.set_baselines_tracked(baselines.len());

                if !config.baseline.no_detection && !baselines.is_learning() {
                    let spikes: Vec<Alert> = tick_counts
                        .iter()
                        .filter_map(|(&(pid, nr), &count)| anomaly_detector.evaluate(&baselines, pid, nr, count))
                        .collect();
                    for alert in spikes {
                        dispatch_alert(&router, &app_state, &metrics, &mut alert_queue, alert).await;
                    }
                }
                for (&(pid, nr), &count) in tick_counts.iter() {
                    baselines.update((pid, nr), count);
                }
                tick_counts.clear();
            }
            _ = persist_tick.tick() => {
                let saved = baselines.save_all();
                log::debug!("[sentineld] periodic baseline persist: {saved} pid(s)");
            }
            _ = async { if let Some(sleep) = shutdown_deadline.as_mut().as_pin_mut() { sleep.await } else { std::future::pending().await } }, if shutdown_deadline.is_some() => {
                info!("[sentineld] duration elapsed, shutting down");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("[sentineld] received shutdown signal");
                break;
            }
        }
    }

    let saved = baselines.save_all();
    info!("[sentineld] persisted baselines for {saved} pid(s)");
    router.flush().await;
    http.abort();
    Ok(())
}

/// Admits `alert` through the token bucket and, if accepted, records it in
/// the HTTP alert history and fans it out to every sink - all awaited
/// in place, so the event that produced it is handled to completion
/// before the poller moves on to the next one.
async fn dispatch_alert(router: &AlertRouter, state: &AppState, metrics: &Metrics, queue: &mut AlertQueue, alert: Alert) {
    let Some(alert) = queue.admit(alert) else {
        metrics.inc_alerts_dropped();
        return;
    };
    state.record_alert(alert.clone()).await;
    router.dispatch(&alert).await;
}
