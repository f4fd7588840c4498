//! Text reports of probe runs.
//!
//! One line per attempt, then a blank line after each batch:
//!
//! ```text
//! [2024-03-01 09:15:02.123456] Response from 10.0.0.1: time=12.300 MS
//! [2024-03-01 09:15:03.130040] No response from 10.0.0.2
//! ```

mod format;
mod writer;

pub use format::*;
pub use writer::*;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Report error types.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to create report directory {}: {}", .path.display(), .source)]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to open report file {}: {}", .path.display(), .source)]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to write report file {}: {}", .path.display(), .source)]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to read report file {}: {}", .path.display(), .source)]
    Read { path: PathBuf, source: io::Error },
}
