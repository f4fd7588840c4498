//! Background sweep worker.
//!
//! Moves an [`Orchestrator`] onto a tokio task so the caller stays free to
//! show progress and forward stop requests while the sweep runs.

use super::{Orchestrator, Summary, SweepError, SweepOptions};
use crate::probe::{Pinger, StopSignal};

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Progress events emitted while a sweep runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepProgress {
    DeviceStarted { name: String, address: String },
    DeviceSkipped { name: String },
    DeviceFinished { name: String, responses: usize, failures: usize },
    ReportWritten { path: PathBuf },
}

/// Requests a running sweep to stop at the next probe boundary.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        if self.0.send(true).is_ok() {
            tracing::info!("Stop requested for running sweep");
        }
    }
}

/// A sweep running on a background task.
pub struct SweepHandle<T> {
    pub progress: mpsc::Receiver<SweepProgress>,
    stop: StopHandle,
    task: JoinHandle<Result<T, SweepError>>,
}

impl<T> SweepHandle<T> {
    pub fn stopper(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Wait for the sweep to finish.
    pub async fn join(self) -> Result<T, SweepError> {
        self.task
            .await
            .map_err(|e| SweepError::Worker(e.to_string()))?
    }
}

fn wire<P: Pinger>(orchestrator: Orchestrator<P>) -> (Orchestrator<P>, mpsc::Receiver<SweepProgress>, StopHandle) {
    let (progress_tx, progress_rx) = mpsc::channel(64);
    let (stop_tx, stop) = StopSignal::channel();
    let orchestrator = orchestrator.with_progress(progress_tx).with_stop(stop);
    (orchestrator, progress_rx, StopHandle(Arc::new(stop_tx)))
}

/// Run [`Orchestrator::run_full_sweep`] on a background task.
pub fn spawn_full_sweep<P: Pinger>(orchestrator: Orchestrator<P>, opts: SweepOptions) -> SweepHandle<Summary> {
    let (orchestrator, progress, stop) = wire(orchestrator);
    let task = tokio::spawn(async move { orchestrator.run_full_sweep(opts).await });
    SweepHandle { progress, stop, task }
}

/// Run [`Orchestrator::run_selected`] on a background task.
pub fn spawn_selected<P: Pinger>(
    orchestrator: Orchestrator<P>,
    name: String,
    opts: SweepOptions,
) -> SweepHandle<Option<Summary>> {
    let (orchestrator, progress, stop) = wire(orchestrator);
    let task = tokio::spawn(async move { orchestrator.run_selected(&name, opts).await });
    SweepHandle { progress, stop, task }
}
