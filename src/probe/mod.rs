//! Probe module for device reachability checks.
//!
//! A [`Pinger`] performs one blocking reachability check; the
//! [`ProbeRunner`] drives a fixed number of them against one address.

mod ping;
mod runner;

pub use ping::*;
pub use runner::*;

#[cfg(test)]
pub(crate) use runner::testing;

use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// A single synchronous reachability check.
///
/// Implementations block until a reply arrives or their own timeout
/// elapses. Any error is recorded as "no response".
pub trait Pinger: Send + Sync + 'static {
    fn ping(&self, address: &str) -> Result<Duration, ProbeError>;
}

/// Outcome of one probe attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub time: DateTime<Local>,
    pub address: String,
    /// Round-trip time in milliseconds, `None` when nothing answered.
    pub rtt_ms: Option<f64>,
}

impl ProbeResult {
    pub fn is_response(&self) -> bool {
        self.rtt_ms.is_some()
    }
}
