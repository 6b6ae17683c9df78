//! Layered configuration: TOML file (path overridable via
//! `SENTINELD_CONFIG`) with per-field serde defaults, later overridden by
//! explicit CLI flags in `main.rs`. A missing or unparseable file falls
//! back to `Config::default()` rather than failing startup.

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/sentineld/sentineld.toml";
const ENV_CONFIG_PATH: &str = "SENTINELD_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub baseline: BaselineConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub grimoire: GrimoireConfig,
    #[serde(default)]
    pub sinks: SinksConfig,
}

impl Config {
    /// Loads from `SENTINELD_CONFIG` (or the default path if unset). A
    /// missing file or parse failure silently yields `Config::default()` -
    /// the daemon always has somewhere to start from.
    pub fn load() -> Self {
        let path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = PathBuf::from(path);
        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Run for this many seconds, then exit cleanly; `0` means run until
    /// a shutdown signal arrives.
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: u64,
    /// Trace only this pid (and its descendants), rather than the whole host.
    #[serde(default)]
    pub attach_pid: Option<u32>,
    #[serde(default = "default_events_rate_cap")]
    pub events_rate_cap: u64,
    /// Candidate paths the controller searches, in order, for the
    /// precompiled eBPF object to load.
    #[serde(default = "default_bpf_object_paths")]
    pub bpf_object_paths: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            duration_seconds: default_duration_seconds(),
            attach_pid: None,
            events_rate_cap: default_events_rate_cap(),
            bpf_object_paths: default_bpf_object_paths(),
            dry_run: false,
        }
    }
}

fn default_duration_seconds() -> u64 {
    0
}
fn default_events_rate_cap() -> u64 {
    100_000
}
fn default_bpf_object_paths() -> Vec<String> {
    vec![
        "/usr/lib/sentineld/sentineld.bpf.o".to_string(),
        "/etc/sentineld/sentineld.bpf.o".to_string(),
        "./sentineld.bpf.o".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct BaselineConfig {
    #[serde(default = "default_learning_period_seconds")]
    pub learning_period_seconds: u64,
    #[serde(default)]
    pub no_learning: bool,
    #[serde(default = "default_baseline_path")]
    pub baseline_path: String,
    #[serde(default)]
    pub no_load_baselines: bool,
    #[serde(default = "default_detection_threshold_sigma")]
    pub detection_threshold_sigma: f64,
    #[serde(default)]
    pub no_detection: bool,
    #[serde(default = "default_persist_interval_seconds")]
    pub persist_interval_seconds: u64,
    #[serde(default = "default_alert_burst")]
    pub alert_burst: u32,
    #[serde(default = "default_alerts_per_minute")]
    pub alerts_per_minute: u32,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            learning_period_seconds: default_learning_period_seconds(),
            no_learning: false,
            baseline_path: default_baseline_path(),
            no_load_baselines: false,
            detection_threshold_sigma: default_detection_threshold_sigma(),
            no_detection: false,
            persist_interval_seconds: default_persist_interval_seconds(),
            alert_burst: default_alert_burst(),
            alerts_per_minute: default_alerts_per_minute(),
        }
    }
}

fn default_learning_period_seconds() -> u64 {
    3600
}
fn default_baseline_path() -> String {
    "/var/lib/sentineld/baselines".to_string()
}
fn default_detection_threshold_sigma() -> f64 {
    3.0
}
fn default_persist_interval_seconds() -> u64 {
    60
}
fn default_alert_burst() -> u32 {
    10
}
fn default_alerts_per_minute() -> u32 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorrelationConfig {
    #[serde(default = "default_correlation_enabled")]
    pub enable_correlation: bool,
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: u32,
    #[serde(default = "default_correlation_timeout_ms")]
    pub correlation_timeout_ms: u64,
    #[serde(default = "default_min_exfil_bytes")]
    pub min_exfil_bytes: u64,
    #[serde(default)]
    pub auto_terminate: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            enable_correlation: default_correlation_enabled(),
            correlation_threshold: default_correlation_threshold(),
            correlation_timeout_ms: default_correlation_timeout_ms(),
            min_exfil_bytes: default_min_exfil_bytes(),
            auto_terminate: false,
        }
    }
}

fn default_correlation_enabled() -> bool {
    true
}
fn default_correlation_threshold() -> u32 {
    100
}
fn default_correlation_timeout_ms() -> u64 {
    5_000
}
fn default_min_exfil_bytes() -> u64 {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct GrimoireConfig {
    #[serde(default = "default_grimoire_enabled")]
    pub enable_grimoire: bool,
    #[serde(default)]
    pub grimoire_enforce: bool,
    #[serde(default)]
    pub grimoire_debug: bool,
    #[serde(default)]
    pub grimoire_log_path: Option<String>,
}

impl Default for GrimoireConfig {
    fn default() -> Self {
        Self {
            enable_grimoire: default_grimoire_enabled(),
            grimoire_enforce: false,
            grimoire_debug: false,
            grimoire_log_path: None,
        }
    }
}

fn default_grimoire_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SinksConfig {
    #[serde(default)]
    pub syslog: bool,
    #[serde(default = "default_json_file_enabled")]
    pub json_file: bool,
    #[serde(default = "default_json_file_path")]
    pub json_file_path: String,
    #[serde(default = "default_json_file_max_bytes")]
    pub json_file_max_bytes: u64,
    #[serde(default)]
    pub auditd: bool,
    #[serde(default)]
    pub auditd_socket_path: Option<String>,
    #[serde(default)]
    pub prometheus: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_json_file_enabled() -> bool {
    true
}
fn default_json_file_path() -> String {
    "/var/log/sentineld/alerts.ndjson".to_string()
}
fn default_json_file_max_bytes() -> u64 {
    50 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_config_defaults() {
        let toml = r#"[runtime]
duration_seconds = 0
[baseline]
detection_threshold_sigma = 4.0
[correlation]
auto_terminate = true
[grimoire]
grimoire_enforce = true
[sinks]
prometheus = true
"#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.baseline.detection_threshold_sigma, 4.0);
        assert!(cfg.correlation.auto_terminate);
        assert!(cfg.grimoire.grimoire_enforce);
        assert!(cfg.sinks.prometheus);
        assert!(cfg.sinks.json_file); // untouched section still gets its default
        assert_eq!(cfg.baseline.learning_period_seconds, 3600);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        unsafe {
            std::env::set_var(ENV_CONFIG_PATH, "/nonexistent/path/sentineld.toml");
        }
        let cfg = Config::load();
        assert_eq!(cfg.baseline.detection_threshold_sigma, 3.0);
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
    }

    #[test]
    fn env_override_points_at_a_real_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[correlation]\nauto_terminate = true").unwrap();
        unsafe {
            std::env::set_var(ENV_CONFIG_PATH, file.path());
        }
        let cfg = Config::load();
        assert!(cfg.correlation.auto_terminate);
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
    }

    #[test]
    fn malformed_file_falls_back_to_defaults_rather_than_panicking() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this is not valid toml {{{{").unwrap();
        unsafe {
            std::env::set_var(ENV_CONFIG_PATH, file.path());
        }
        let cfg = Config::load();
        assert_eq!(cfg.correlation.correlation_threshold, 100);
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
    }
}
