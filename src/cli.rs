//! Command line interface.
//!
//! Owns everything the operator sees: argument parsing, confirmation for
//! destructive commands, progress output and summary rendering.

use clap::{Args, Parser, Subcommand};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{parse_secs, MonitorConfig};
use crate::db::{DbError, Device, Store};
use crate::probe::{Pinger, ProbeResult, ProbeRunner, STANDALONE_PROBE_COUNT};
use crate::report::{
    format_line, read_report, tally, write_report, ReportDestination, ReportError, LINE_TIME_FORMAT,
};
use crate::scheduler::{
    spawn_full_sweep, spawn_selected, Orchestrator, Summary, SweepError, SweepHandle, SweepOptions, SweepProgress,
};

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Store(#[from] DbError),
    #[error(transparent)]
    Sweep(#[from] SweepError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("JSON output failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("No device named {0}")]
    UnknownDevice(String),
    #[error("Refusing to remove {0} without --yes")]
    Unconfirmed(String),
}

#[derive(Parser, Debug)]
#[command(name = "ping-monitor", version, about = "Ping configured devices and write text reports")]
pub struct Cli {
    /// SQLite device database
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,
    /// Directory for generated reports
    #[arg(long, global = true)]
    pub reports_dir: Option<PathBuf>,
    /// Log file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Apply command line overrides on top of the environment config.
    pub fn apply(&self, mut cfg: MonitorConfig) -> MonitorConfig {
        if let Some(db) = &self.db {
            cfg.db_path = db.clone();
        }
        if let Some(dir) = &self.reports_dir {
            cfg.reports_dir = dir.clone();
        }
        if let Some(file) = &self.log_file {
            cfg.log_file = file.clone();
        }
        cfg
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage the device list
    #[command(subcommand)]
    Device(DeviceCommand),
    /// Ping devices and write a report
    #[command(subcommand)]
    Report(ReportCommand),
    /// Ping an address that is not in the device list
    Ping {
        address: String,
        #[arg(short = 'c', long, default_value_t = STANDALONE_PROBE_COUNT, value_parser = clap::value_parser!(u32).range(1..))]
        count: u32,
        /// Seconds to wait after each probe
        #[arg(short, long, value_parser = parse_interval)]
        interval: Option<Duration>,
        /// Append the results to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DeviceCommand {
    /// Add a device
    Add {
        name: String,
        address: String,
        /// Keep the device out of full sweeps
        #[arg(long)]
        disabled: bool,
    },
    /// Change a device's name, address or status
    Update {
        name: String,
        #[arg(long)]
        new_name: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
    /// Remove a device
    Remove {
        name: String,
        /// Confirm the removal
        #[arg(long)]
        yes: bool,
    },
    /// List all devices
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one device
    Show { name: String },
    /// Enable every device
    EnableAll,
    /// Disable every device
    DisableAll,
}

#[derive(Subcommand, Debug)]
pub enum ReportCommand {
    /// Ping every enabled device and write one combined report
    Full {
        #[command(flatten)]
        probe: ProbeArgs,
        #[arg(long)]
        json: bool,
    },
    /// Ping one device by name
    Device {
        name: String,
        #[command(flatten)]
        probe: ProbeArgs,
        /// Append to this file instead of a new timestamped report
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Summarize an existing report file per address
    Show { path: PathBuf },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ProbeArgs {
    /// Probes per device
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u32).range(1..))]
    pub count: Option<u32>,
    /// Seconds to wait after each probe
    #[arg(short, long, value_parser = parse_interval)]
    pub interval: Option<Duration>,
}

impl ProbeArgs {
    fn options(&self, cfg: &MonitorConfig) -> SweepOptions {
        SweepOptions {
            probe_count: self.count.unwrap_or(cfg.probe_count),
            interval: self.interval.unwrap_or(cfg.probe_interval),
        }
    }
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    parse_secs(s).ok_or_else(|| format!("invalid interval '{}': expected non-negative seconds", s))
}

/// Run one command and return what should be printed on stdout.
pub async fn execute<P: Pinger>(
    command: Command,
    cfg: &MonitorConfig,
    store: Store,
    pinger: Arc<P>,
) -> Result<String, CliError> {
    let orchestrator = Orchestrator::new(
        store.clone(),
        ProbeRunner::new(pinger),
        ReportDestination::generated(&cfg.reports_dir),
    );

    match command {
        Command::Device(cmd) => device_command(cmd, &store),
        Command::Report(ReportCommand::Full { probe, json }) => {
            let summary = drive(spawn_full_sweep(orchestrator, probe.options(cfg))).await?;
            if json {
                Ok(serde_json::to_string_pretty(&summary)?)
            } else {
                Ok(render_full(&summary))
            }
        }
        Command::Report(ReportCommand::Device { name, probe, output, json }) => {
            let orchestrator = match output {
                Some(path) => orchestrator.with_destination(ReportDestination::Path(path)),
                None => orchestrator,
            };
            let summary = drive(spawn_selected(orchestrator, name.clone(), probe.options(cfg)))
                .await?
                .ok_or(CliError::UnknownDevice(name.clone()))?;
            if json {
                Ok(serde_json::to_string_pretty(&summary)?)
            } else {
                Ok(render_selected(&name, &summary))
            }
        }
        Command::Report(ReportCommand::Show { path }) => {
            let lines = read_report(&path)?;
            let mut out = format!("{}: {} probes", path.display(), lines.len());
            for t in tally(&lines) {
                let avg = t.avg_rtt_ms.map_or_else(|| "-".to_string(), |ms| format!("{:.3} MS", ms));
                let _ = write!(out, "\n{}: {}/{} replies, avg {}", t.address, t.responses, t.attempts, avg);
            }
            Ok(out)
        }
        Command::Ping { address, count, interval, output } => {
            let run = orchestrator
                .probe_address(&address, count, interval.unwrap_or(cfg.probe_interval))
                .await;
            let mut out: String = run.results.iter().map(|r| format_line(r) + "\n").collect();
            let _ = write!(out, "{} of {} probes answered", run.responses(), run.results.len());
            if let Some(path) = output {
                let path = write_report(&run.results, &ReportDestination::Path(path))?;
                let _ = write!(out, "\nResults appended to {}", path.display());
            }
            Ok(out)
        }
    }
}

/// What a Ctrl-C during a sweep should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// Ask the sweep to stop at the next probe boundary.
    Stop,
    /// A stop was already requested; leave without waiting.
    Abort,
}

#[derive(Debug, Default)]
struct InterruptState {
    stopping: bool,
}

impl InterruptState {
    fn on_signal(&mut self) -> Interrupt {
        if self.stopping {
            Interrupt::Abort
        } else {
            self.stopping = true;
            Interrupt::Stop
        }
    }
}

/// Exit status after a second Ctrl-C, as a shell reports SIGINT.
const ABORT_EXIT_CODE: i32 = 130;

/// Drain progress to stderr until the sweep ends. The first Ctrl-C asks the
/// sweep to stop, a second one exits at once.
async fn drive<T>(mut handle: SweepHandle<T>) -> Result<T, SweepError> {
    let stopper = handle.stopper();
    let mut interrupts = InterruptState::default();

    loop {
        tokio::select! {
            event = handle.progress.recv() => match event {
                Some(event) => eprintln!("{}", describe(&event)),
                None => break,
            },
            Ok(()) = tokio::signal::ctrl_c() => match interrupts.on_signal() {
                Interrupt::Stop => {
                    eprintln!("Stopping after the current probe... (Ctrl-C again to quit)");
                    stopper.stop();
                }
                Interrupt::Abort => {
                    tracing::warn!("Sweep aborted by a second interrupt");
                    eprintln!("Aborted.");
                    std::process::exit(ABORT_EXIT_CODE);
                }
            },
        }
    }

    handle.join().await
}

fn describe(event: &SweepProgress) -> String {
    match event {
        SweepProgress::DeviceStarted { name, address } => format!("Pinging {} ({})...", name, address),
        SweepProgress::DeviceSkipped { name } => format!("Skipping {} (disabled)", name),
        SweepProgress::DeviceFinished { name, responses, failures } => {
            format!("{}: {} replies, {} without response", name, responses, failures)
        }
        SweepProgress::ReportWritten { path } => format!("Report written to {}", path.display()),
    }
}

fn find(store: &Store, name: &str) -> Result<Device, CliError> {
    store
        .find_by_name(name)?
        .ok_or_else(|| CliError::UnknownDevice(name.to_string()))
}

fn device_command(cmd: DeviceCommand, store: &Store) -> Result<String, CliError> {
    match cmd {
        DeviceCommand::Add { name, address, disabled } => {
            let id = store.add(&name, &address, !disabled)?;
            Ok(format!("Added {} ({}) with id {}", name, address, id))
        }
        DeviceCommand::Update { name, new_name, address, enable, disable } => {
            let current = find(store, &name)?;
            let enabled = if enable {
                true
            } else if disable {
                false
            } else {
                current.enabled
            };
            let new_name = new_name.unwrap_or_else(|| current.name.clone());
            let address = address.unwrap_or_else(|| current.address.clone());

            store.update(current.id, &new_name, &address, enabled)?;
            tracing::info!(
                "Update device from name: {}, ip: {}, status: {}",
                current.name,
                current.address,
                current.enabled as i64
            );
            let updated = store.get(current.id)?;
            Ok(format!(
                "Updated {}: {} ({}) {}",
                updated.id,
                updated.name,
                updated.address,
                updated.status_label()
            ))
        }
        DeviceCommand::Remove { name, yes } => {
            let device = find(store, &name)?;
            if !yes {
                return Err(CliError::Unconfirmed(format!("{} ({})", device.name, device.address)));
            }
            store.remove(device.id)?;
            tracing::info!("Removed device name: {}, ip: {}", device.name, device.address);
            Ok(format!("Removed {} ({})", device.name, device.address))
        }
        DeviceCommand::List { json } => {
            let devices = store.list()?;
            if json {
                Ok(serde_json::to_string_pretty(&devices)?)
            } else {
                Ok(render_devices(&devices))
            }
        }
        DeviceCommand::Show { name } => {
            let device = find(store, &name)?;
            Ok(format!(
                "Name: {}\nIP: {}\nStatus: {}",
                device.name,
                device.address,
                device.status_label()
            ))
        }
        DeviceCommand::EnableAll => Ok(format!("Enabled {} devices", store.set_all_enabled(true)?)),
        DeviceCommand::DisableAll => Ok(format!("Disabled {} devices", store.set_all_enabled(false)?)),
    }
}

fn render_devices(devices: &[Device]) -> String {
    let name_width = devices.iter().map(|d| d.name.len()).max().unwrap_or(0).max(4);
    let ip_width = devices.iter().map(|d| d.address.len()).max().unwrap_or(0).max(2);

    let mut out = format!("{:<4} {:<name_width$} {:<ip_width$} Status", "ID", "Name", "IP");
    for d in devices {
        let _ = write!(out, "\n{:<4} {:<name_width$} {:<ip_width$} {}", d.id, d.name, d.address, d.status_label());
    }
    out
}

/// Summary text for a full sweep.
fn render_full(summary: &Summary) -> String {
    let mut out = format!("{}.\n", summary.generated_at.format(LINE_TIME_FORMAT));
    if summary.cancelled {
        out.push_str("Full report stopped early.\n\n");
    } else {
        out.push_str("Full report generated.\n\n");
    }
    let _ = writeln!(out, "Responding devices: {}", summary.responding);

    if !summary.bad_results.is_empty() {
        let _ = writeln!(out, "Pings without response: {}", summary.bad_results.len());
        for bad in &summary.bad_results {
            let _ = writeln!(out, "{}.", bad);
        }
    }

    if !summary.disabled.is_empty() {
        let _ = writeln!(out, "\nDisabled devices: {}", summary.disabled.len());
        for name in &summary.disabled {
            let _ = writeln!(out, "{}.", name);
        }
    }

    let _ = write!(out, "\nReport: {}", summary.report_path.display());
    out
}

/// Summary text for a single device report.
fn render_selected(name: &str, summary: &Summary) -> String {
    let mut out = format!(
        "{}.\nReport generated for {}.\n\n",
        summary.generated_at.format(LINE_TIME_FORMAT),
        name
    );
    for result in &summary.results {
        let _ = writeln!(out, "IP: {}, Response: {}", result.address, response_text(result));
    }
    let _ = write!(out, "\nReport: {}", summary.report_path.display());
    out
}

fn response_text(result: &ProbeResult) -> String {
    match result.rtt_ms {
        Some(ms) => format!("{:.3} MS", ms),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::FakePinger;
    use crate::report::parse_line;
    use clap::CommandFactory;
    use std::fs;
    use tempfile::{NamedTempFile, TempDir};

    struct Env {
        _db: NamedTempFile,
        reports: TempDir,
        store: Store,
        cfg: MonitorConfig,
    }

    fn env() -> Env {
        let db = NamedTempFile::new().unwrap();
        let reports = TempDir::new().unwrap();
        let store = Store::new(db.path()).unwrap();
        let cfg = MonitorConfig {
            db_path: db.path().to_path_buf(),
            reports_dir: reports.path().join("Reports"),
            probe_interval: Duration::ZERO,
            ..MonitorConfig::default()
        };
        Env { _db: db, reports, store, cfg }
    }

    fn parse(args: &[&str]) -> Command {
        let mut full = vec!["ping-monitor"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap().command
    }

    async fn run(env: &Env, pinger: FakePinger, args: &[&str]) -> Result<String, CliError> {
        execute(parse(args), &env.cfg, env.store.clone(), Arc::new(pinger)).await
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::try_parse_from(["ping-monitor", "device", "list", "--db", "/tmp/x.db", "--reports-dir", "out"]).unwrap();
        let cfg = cli.apply(MonitorConfig::default());
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(cfg.reports_dir, PathBuf::from("out"));
        assert_eq!(cfg.log_file, PathBuf::from("ping.log"));
    }

    #[test]
    fn test_rejects_bad_interval_and_conflicting_flags() {
        assert!(Cli::try_parse_from(["ping-monitor", "ping", "10.0.0.1", "-i", "-1"]).is_err());
        assert!(Cli::try_parse_from(["ping-monitor", "device", "update", "a", "--enable", "--disable"]).is_err());
        assert!(Cli::try_parse_from(["ping-monitor", "ping", "10.0.0.1", "-c", "0"]).is_err());
        assert!(Cli::try_parse_from(["ping-monitor", "report", "full", "-c", "0"]).is_err());
        assert!(Cli::try_parse_from(["ping-monitor", "report", "device", "router", "-c", "0"]).is_err());
        assert!(Cli::try_parse_from(["ping-monitor", "report", "full", "-i", "1e30"]).is_err());
        assert!(Cli::try_parse_from(["ping-monitor", "report", "full", "-c", "1"]).is_ok());
    }

    #[test]
    fn test_second_interrupt_aborts() {
        let mut state = InterruptState::default();
        assert_eq!(state.on_signal(), Interrupt::Stop);
        assert_eq!(state.on_signal(), Interrupt::Abort);
        assert_eq!(state.on_signal(), Interrupt::Abort);
    }

    #[test]
    fn test_ping_defaults_to_ten_probes() {
        match parse(&["ping", "10.0.0.1"]) {
            Command::Ping { count, interval, .. } => {
                assert_eq!(count, 10);
                assert_eq!(interval, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_device_lifecycle() {
        let env = env();

        let added = run(&env, FakePinger::new(), &["device", "add", "router", "10.0.0.1"]).await.unwrap();
        assert!(added.starts_with("Added router (10.0.0.1)"));

        run(&env, FakePinger::new(), &["device", "update", "router", "--address", "10.0.0.254", "--disable"])
            .await
            .unwrap();
        let shown = run(&env, FakePinger::new(), &["device", "show", "router"]).await.unwrap();
        assert_eq!(shown, "Name: router\nIP: 10.0.0.254\nStatus: Disabled");

        let refused = run(&env, FakePinger::new(), &["device", "remove", "router"]).await;
        assert!(matches!(refused, Err(CliError::Unconfirmed(_))));

        run(&env, FakePinger::new(), &["device", "remove", "router", "--yes"]).await.unwrap();
        let missing = run(&env, FakePinger::new(), &["device", "show", "router"]).await;
        assert!(matches!(missing, Err(CliError::UnknownDevice(n)) if n == "router"));
    }

    #[tokio::test]
    async fn test_add_empty_name_fails_validation() {
        let env = env();
        let err = run(&env, FakePinger::new(), &["device", "add", "", "10.0.0.1"]).await.unwrap_err();
        assert!(matches!(err, CliError::Store(DbError::Validation(_))));
    }

    #[tokio::test]
    async fn test_list_as_json() {
        let env = env();
        env.store.add("router", "10.0.0.1", true).unwrap();

        let out = run(&env, FakePinger::new(), &["device", "list", "--json"]).await.unwrap();
        let devices: Vec<Device> = serde_json::from_str(&out).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "router");

        let table = run(&env, FakePinger::new(), &["device", "list"]).await.unwrap();
        assert!(table.lines().nth(1).unwrap().contains("router"));
    }

    #[tokio::test]
    async fn test_full_report_text() {
        let env = env();
        env.store.add("router", "10.0.0.1", true).unwrap();
        env.store.add("rtu", "10.0.0.3", true).unwrap();
        env.store.add("printer", "10.0.0.2", false).unwrap();
        let pinger = FakePinger::new().always("10.0.0.1", Some(12.3)).always("10.0.0.3", None);

        let out = run(&env, pinger, &["report", "full", "-c", "2"]).await.unwrap();

        assert!(out.contains("Full report generated."));
        assert!(out.contains("Responding devices: 1"));
        assert!(out.contains("Pings without response: 1\nNo response from: 10.0.0.3."));
        assert!(out.contains("Disabled devices: 1\nprinter."));

        let report = fs::read_dir(env.reports.path().join("Reports")).unwrap().next().unwrap().unwrap().path();
        let lines: Vec<_> = fs::read_to_string(report).unwrap().lines().filter_map(parse_line).collect();
        assert_eq!(lines.len(), 4);
    }

    #[tokio::test]
    async fn test_device_report_to_explicit_file() {
        let env = env();
        env.store.add("router", "10.0.0.1", true).unwrap();
        let out_file = env.reports.path().join("router.txt");

        let out = run(
            &env,
            FakePinger::new().always("10.0.0.1", Some(2.0)),
            &["report", "device", "router", "-c", "3", "-o", out_file.to_str().unwrap()],
        )
        .await
        .unwrap();

        assert!(out.contains("Report generated for router."));
        assert_eq!(out.matches("IP: 10.0.0.1, Response: 2.000 MS").count(), 3);
        assert_eq!(fs::read_to_string(&out_file).unwrap().lines().count(), 4);
    }

    #[tokio::test]
    async fn test_show_report_tally() {
        let env = env();
        env.store.add("router", "10.0.0.1", true).unwrap();
        let out_file = env.reports.path().join("router.txt");
        let file_arg = out_file.to_str().unwrap();

        run(
            &env,
            FakePinger::new().script("10.0.0.1", &[Some(4.0), None, Some(6.0)]),
            &["report", "device", "router", "-c", "3", "-o", file_arg],
        )
        .await
        .unwrap();

        let out = run(&env, FakePinger::new(), &["report", "show", file_arg]).await.unwrap();
        assert!(out.ends_with("10.0.0.1: 2/3 replies, avg 5.000 MS"));
    }

    #[tokio::test]
    async fn test_device_report_unknown_name() {
        let env = env();
        let err = run(&env, FakePinger::new(), &["report", "device", "ghost"]).await.unwrap_err();
        assert!(matches!(err, CliError::UnknownDevice(_)));
    }

    #[tokio::test]
    async fn test_standalone_ping() {
        let env = env();
        let out = run(
            &env,
            FakePinger::new().script("192.0.2.7", &[Some(1.0), None]),
            &["ping", "192.0.2.7", "-c", "2", "-i", "0"],
        )
        .await
        .unwrap();

        assert!(out.contains("Response from 192.0.2.7: time=1.000 MS"));
        assert!(out.contains("No response from 192.0.2.7"));
        assert!(out.ends_with("1 of 2 probes answered"));
    }
}
