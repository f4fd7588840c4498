//! Fixed-count probe loop against a single address.

use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::{Pinger, ProbeError, ProbeResult};

/// Probes per device in an orchestrated sweep.
pub const SWEEP_PROBE_COUNT: u32 = 4;
/// Probes for a standalone run against a bare address.
pub const STANDALONE_PROBE_COUNT: u32 = 10;
/// Pause after every probe.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Receiving side of a stop request.
///
/// A signal built with [`StopSignal::never`] never fires.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl StopSignal {
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Create a signal plus the sender that fires it with `send(true)`.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx: Some(rx) })
    }

    pub fn is_stopped(&self) -> bool {
        self.rx.as_ref().map_or(false, |rx| *rx.borrow())
    }

    /// Sleep for `duration`, returning early with `true` if a stop arrives.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let Some(rx) = &self.rx else {
            tokio::time::sleep(duration).await;
            return false;
        };

        let mut rx = rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = wait_for_stop(&mut rx) => true,
        }
    }
}

async fn wait_for_stop(rx: &mut watch::Receiver<bool>) {
    // A dropped sender can no longer stop anything.
    if rx.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Everything one probe run produced.
#[derive(Debug, Clone, Default)]
pub struct ProbeRun {
    /// One entry per attempt, in attempt order.
    pub results: Vec<ProbeResult>,
    /// One "No response from: <address>" note per failed attempt.
    pub failures: Vec<String>,
    /// The run ended before all attempts were made.
    pub stopped: bool,
}

impl ProbeRun {
    pub fn responses(&self) -> usize {
        self.results.iter().filter(|r| r.is_response()).count()
    }
}

/// Note recorded for an attempt that got no reply.
pub fn failure_note(address: &str) -> String {
    format!("No response from: {}", address)
}

/// Runs a bounded sequence of probes using a [`Pinger`].
pub struct ProbeRunner<P> {
    pinger: Arc<P>,
    stop: StopSignal,
}

impl<P> Clone for ProbeRunner<P> {
    fn clone(&self) -> Self {
        Self {
            pinger: Arc::clone(&self.pinger),
            stop: self.stop.clone(),
        }
    }
}

impl<P: Pinger> ProbeRunner<P> {
    pub fn new(pinger: Arc<P>) -> Self {
        Self {
            pinger,
            stop: StopSignal::never(),
        }
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Probe `address` exactly `count` times, sleeping `interval` after every
    /// attempt, the last one included.
    pub async fn run(&self, address: &str, count: u32, interval: Duration) -> ProbeRun {
        let mut run = ProbeRun::default();

        for attempt in 1..=count {
            if self.stop.is_stopped() {
                break;
            }

            match self.probe_once(address).await {
                Ok(rtt) => {
                    let rtt_ms = rtt.as_secs_f64() * 1000.0;
                    tracing::info!("Response from {}: time={:.3} MS", address, rtt_ms);
                    run.results.push(ProbeResult {
                        time: Local::now(),
                        address: address.to_string(),
                        rtt_ms: Some(rtt_ms),
                    });
                }
                Err(e) => {
                    tracing::warn!("No response from {}", address);
                    tracing::debug!("Probe {}/{} against {} failed: {}", attempt, count, address, e);
                    run.results.push(ProbeResult {
                        time: Local::now(),
                        address: address.to_string(),
                        rtt_ms: None,
                    });
                    run.failures.push(failure_note(address));
                }
            }

            if self.stop.sleep(interval).await {
                break;
            }
        }

        run.stopped = run.results.len() < count as usize;
        if run.stopped {
            tracing::info!("Probe run against {} stopped after {} of {} attempts", address, run.results.len(), count);
        }
        run
    }

    async fn probe_once(&self, address: &str) -> Result<Duration, ProbeError> {
        let pinger = Arc::clone(&self.pinger);
        let target = address.to_string();

        tokio::task::spawn_blocking(move || pinger.ping(&target))
            .await
            .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))?
    }
}
