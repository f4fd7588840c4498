//! Sweep orchestration: probe devices from the store and write reports.

mod worker;

pub use worker::*;

use crate::db::{DbError, Device, Store};
use crate::probe::{
    Pinger, ProbeResult, ProbeRun, ProbeRunner, StopSignal, DEFAULT_PROBE_INTERVAL, SWEEP_PROBE_COUNT,
};
use crate::report::{write_report, ReportDestination, ReportError};

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Sweep error types.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error(transparent)]
    Store(#[from] DbError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("sweep worker failed: {0}")]
    Worker(String),
}

/// How hard to probe each device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepOptions {
    pub probe_count: u32,
    pub interval: Duration,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            probe_count: SWEEP_PROBE_COUNT,
            interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

/// What a finished sweep hands back to the interface.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub generated_at: DateTime<Local>,
    pub report_path: PathBuf,
    /// Devices that were probed.
    pub probed: usize,
    /// Probed devices where every attempt got a reply.
    pub responding: usize,
    /// First failure note of each device that missed at least one reply.
    pub bad_results: Vec<String>,
    /// Names of devices skipped because they are disabled.
    pub disabled: Vec<String>,
    /// Every attempt in the order it was written to the report.
    pub results: Vec<ProbeResult>,
    /// A stop request ended the sweep early.
    pub cancelled: bool,
}

impl Summary {
    fn new() -> Self {
        Self {
            generated_at: Local::now(),
            report_path: PathBuf::new(),
            probed: 0,
            responding: 0,
            bad_results: Vec::new(),
            disabled: Vec::new(),
            results: Vec::new(),
            cancelled: false,
        }
    }

    /// Fold one device's run into the totals.
    fn absorb(&mut self, run: ProbeRun) {
        self.probed += 1;
        match run.failures.first() {
            // Only the first note per device; the report file keeps every attempt.
            Some(first) => self.bad_results.push(first.clone()),
            None if !run.results.is_empty() => self.responding += 1,
            None => {}
        }
        self.cancelled |= run.stopped;
        self.results.extend(run.results);
    }
}

/// Drives the probe runner over stored devices and writes the report.
pub struct Orchestrator<P> {
    store: Store,
    runner: ProbeRunner<P>,
    destination: ReportDestination,
    progress: Option<mpsc::Sender<SweepProgress>>,
}

impl<P: Pinger> Orchestrator<P> {
    pub fn new(store: Store, runner: ProbeRunner<P>, destination: ReportDestination) -> Self {
        Self {
            store,
            runner,
            destination,
            progress: None,
        }
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.runner = self.runner.with_stop(stop);
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<SweepProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_destination(mut self, destination: ReportDestination) -> Self {
        self.destination = destination;
        self
    }

    async fn emit(&self, event: SweepProgress) {
        if let Some(tx) = &self.progress {
            // Nobody listening is fine.
            let _ = tx.send(event).await;
        }
    }

    /// Probe every enabled device and write one combined report.
    pub async fn run_full_sweep(&self, opts: SweepOptions) -> Result<Summary, SweepError> {
        tracing::info!("Starting Full Report");
        let devices = self.store.list()?;
        let mut summary = Summary::new();

        for device in devices {
            if !device.enabled {
                tracing::debug!("Skipping disabled device {}", device.name);
                self.emit(SweepProgress::DeviceSkipped { name: device.name.clone() }).await;
                summary.disabled.push(device.name);
                continue;
            }
            if summary.cancelled || self.runner.is_stopped() {
                summary.cancelled = true;
                continue;
            }

            let run = self.probe_device(&device, opts).await;
            summary.absorb(run);
        }

        self.finish(summary).await
    }

    /// Probe the first device called `name` and write a report for it.
    ///
    /// `Ok(None)` means there is no such device. The device is probed even
    /// when disabled, since the operator asked for it by name.
    pub async fn run_selected(&self, name: &str, opts: SweepOptions) -> Result<Option<Summary>, SweepError> {
        tracing::info!("Starting the Selected Device Report");
        let Some(device) = self.store.find_by_name(name)? else {
            tracing::warn!("No device named {}", name);
            return Ok(None);
        };

        let mut summary = Summary::new();
        let run = self.probe_device(&device, opts).await;
        summary.absorb(run);

        self.finish(summary).await.map(Some)
    }

    /// Probe a bare address without touching the store or writing a report.
    pub async fn probe_address(&self, address: &str, count: u32, interval: Duration) -> ProbeRun {
        self.runner.run(address, count, interval).await
    }

    async fn probe_device(&self, device: &Device, opts: SweepOptions) -> ProbeRun {
        self.emit(SweepProgress::DeviceStarted {
            name: device.name.clone(),
            address: device.address.clone(),
        })
        .await;

        let run = self.runner.run(&device.address, opts.probe_count, opts.interval).await;

        self.emit(SweepProgress::DeviceFinished {
            name: device.name.clone(),
            responses: run.responses(),
            failures: run.failures.len(),
        })
        .await;
        run
    }

    async fn finish(&self, mut summary: Summary) -> Result<Summary, SweepError> {
        summary.report_path = write_report(&summary.results, &self.destination)?;
        summary.generated_at = Local::now();
        self.emit(SweepProgress::ReportWritten { path: summary.report_path.clone() }).await;

        tracing::info!(
            "Report done: {} probed, {} responding, {} without response, {} disabled{}",
            summary.probed,
            summary.responding,
            summary.bad_results.len(),
            summary.disabled.len(),
            if summary.cancelled { " (stopped early)" } else { "" }
        );
        Ok(summary)
    }
}
