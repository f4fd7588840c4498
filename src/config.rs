//! Configuration module for the ping monitor.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Monitor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Path to the SQLite device database (default: "device_database.db")
    pub db_path: PathBuf,
    /// Directory generated reports are written to (default: "Reports")
    pub reports_dir: PathBuf,
    /// Log file the tracing subscriber appends to (default: "ping.log")
    pub log_file: PathBuf,
    /// Probes per device in a sweep (default: 4)
    pub probe_count: u32,
    /// Pause after each probe (default: 1s)
    pub probe_interval: Duration,
    /// Timeout handed to the ping primitive (default: 4s)
    pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("device_database.db"),
            reports_dir: PathBuf::from("Reports"),
            log_file: PathBuf::from("ping.log"),
            probe_count: 4,
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(4),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PING_MONITOR_DB_PATH`: Database file path (default: "device_database.db")
    /// - `PING_MONITOR_REPORTS_DIR`: Report directory (default: "Reports")
    /// - `PING_MONITOR_LOG_FILE`: Log file path (default: "ping.log")
    /// - `PING_MONITOR_PROBE_COUNT`: Probes per device (default: 4)
    /// - `PING_MONITOR_PROBE_INTERVAL`: Seconds between probes (default: 1.0)
    /// - `PING_MONITOR_PROBE_TIMEOUT`: Seconds before a probe gives up (default: 4.0)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(path) = lookup("PING_MONITOR_DB_PATH") {
            cfg.db_path = PathBuf::from(path);
        }

        if let Some(dir) = lookup("PING_MONITOR_REPORTS_DIR") {
            cfg.reports_dir = PathBuf::from(dir);
        }

        if let Some(file) = lookup("PING_MONITOR_LOG_FILE") {
            cfg.log_file = PathBuf::from(file);
        }

        if let Some(count_str) = lookup("PING_MONITOR_PROBE_COUNT") {
            match count_str.parse::<u32>() {
                Ok(count) if count > 0 => cfg.probe_count = count,
                _ => {}
            }
        }

        if let Some(secs) = lookup("PING_MONITOR_PROBE_INTERVAL").and_then(|s| parse_secs(&s)) {
            cfg.probe_interval = secs;
        }

        if let Some(secs) = lookup("PING_MONITOR_PROBE_TIMEOUT").and_then(|s| parse_secs(&s)) {
            if !secs.is_zero() {
                cfg.probe_timeout = secs;
            }
        }

        cfg
    }
}

/// Parse a non-negative number of seconds, e.g. "0.5".
pub fn parse_secs(s: &str) -> Option<Duration> {
    let secs: f64 = s.trim().parse().ok()?;
    if secs >= 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}
