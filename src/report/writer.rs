//! Append-only report file writer.

use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::format::{format_line, parse_line, ReportLine, FILE_SUFFIX, FILE_TIME_FORMAT};
use super::ReportError;
use crate::probe::ProbeResult;

/// Where a report goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDestination {
    /// A caller-chosen file.
    Path(PathBuf),
    /// `<dir>/<YYYYMMDD-HHMMSS> - Ping Monitor Report.txt`, stamped when written.
    ///
    /// The stamp has one-second resolution, so reports written within the
    /// same second share a file and are appended one after the other.
    Generated { dir: PathBuf },
}

impl ReportDestination {
    pub fn generated<P: Into<PathBuf>>(dir: P) -> Self {
        Self::Generated { dir: dir.into() }
    }

    /// Resolve to a concrete file path for a report generated at `now`.
    pub fn resolve(&self, now: DateTime<Local>) -> PathBuf {
        match self {
            Self::Path(path) => path.clone(),
            Self::Generated { dir } => dir.join(format!("{}{}", now.format(FILE_TIME_FORMAT), FILE_SUFFIX)),
        }
    }
}

/// Append `results` to the file behind `destination`, followed by a blank
/// line. Missing parent directories are created. Returns the file written.
pub fn write_report(results: &[ProbeResult], destination: &ReportDestination) -> Result<PathBuf, ReportError> {
    let path = destination.resolve(Local::now());
    append_results(results, &path)?;
    tracing::info!("Wrote {} results to {}", results.len(), path.display());
    Ok(path)
}

fn append_results(results: &[ProbeResult], path: &Path) -> Result<(), ReportError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| ReportError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ReportError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    write_lines(&mut BufWriter::new(file), results).map_err(|source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a report file back into its parseable lines.
pub fn read_report(path: &Path) -> Result<Vec<ReportLine>, ReportError> {
    let text = fs::read_to_string(path).map_err(|source| ReportError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text.lines().filter_map(parse_line).collect())
}

fn write_lines<W: Write>(out: &mut W, results: &[ProbeResult]) -> io::Result<()> {
    for result in results {
        writeln!(out, "{}", format_line(result))?;
    }
    writeln!(out)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn result(address: &str, rtt_ms: Option<f64>) -> ProbeResult {
        ProbeResult {
            time: Local::now(),
            address: address.to_string(),
            rtt_ms,
        }
    }

    #[test]
    fn test_generated_name() {
        let now = Local.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        let dest = ReportDestination::generated("Reports");
        assert_eq!(
            dest.resolve(now),
            PathBuf::from("Reports").join("20240301-090507 - Ping Monitor Report.txt")
        );
    }

    #[test]
    fn test_same_second_reports_share_a_file() {
        let tmp = TempDir::new().unwrap();
        let dest = ReportDestination::generated(tmp.path());
        let now = Local.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        let later = now + chrono::Duration::milliseconds(400);
        assert_eq!(dest.resolve(now), dest.resolve(later));

        let path = dest.resolve(now);
        append_results(&[result("10.0.0.1", Some(1.0))], &path).unwrap();
        append_results(&[result("10.0.0.2", None)], &path).unwrap();
        let parsed = read_report(&path).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].address, "10.0.0.2");
    }

    #[test]
    fn test_write_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("Reports");
        let path = write_report(&[result("10.0.0.1", Some(1.0))], &ReportDestination::generated(&dir)).unwrap();

        assert!(path.starts_with(&dir));
        assert!(path.to_string_lossy().ends_with(" - Ping Monitor Report.txt"));
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with("MS\n\n"));
    }

    #[test]
    fn test_write_appends_never_truncates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("single.txt");
        let dest = ReportDestination::Path(path.clone());

        write_report(&[result("10.0.0.1", Some(3.0)), result("10.0.0.1", None)], &dest).unwrap();
        write_report(&[result("10.0.0.9", Some(4.0))], &dest).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].ends_with("Response from 10.0.0.1: time=3.000 MS"));
        assert!(lines[1].ends_with("No response from 10.0.0.1"));
        assert_eq!(lines[2], "");
        assert!(lines[3].ends_with("Response from 10.0.0.9: time=4.000 MS"));
        assert_eq!(lines[4], "");
    }

    #[test]
    fn test_written_successes_parse_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("roundtrip.txt");
        let results = vec![result("router.lan", Some(12.3456)), result("10.0.0.2", Some(0.8))];

        write_report(&results, &ReportDestination::Path(path.clone())).unwrap();

        let parsed = read_report(&path).unwrap();
        assert_eq!(parsed.len(), 2);
        for (original, read) in results.iter().zip(&parsed) {
            assert_eq!(read.address, original.address);
            let rounded = (original.rtt_ms.unwrap() * 1000.0).round() / 1000.0;
            assert!((read.rtt_ms.unwrap() - rounded).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_batch_writes_blank_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.txt");
        write_report(&[], &ReportDestination::Path(path.clone())).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "\n");
    }

    #[test]
    fn test_read_missing_report() {
        let tmp = TempDir::new().unwrap();
        let err = read_report(&tmp.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, ReportError::Read { .. }));
    }

    #[test]
    fn test_unwritable_directory_is_reported() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, "file in the way").unwrap();

        let err = write_report(&[result("10.0.0.1", None)], &ReportDestination::generated(blocker.join("Reports")))
            .unwrap_err();
        assert!(matches!(err, ReportError::CreateDir { .. }));
    }
}
