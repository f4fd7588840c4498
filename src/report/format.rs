//! Report line formatting and parsing.

use chrono::NaiveDateTime;
use regex::Regex;
use std::sync::OnceLock;

use crate::probe::ProbeResult;

/// Timestamp format inside the square brackets.
pub const LINE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
/// File name stamp for generated reports.
pub const FILE_TIME_FORMAT: &str = "%Y%m%d-%H%M%S";
pub const FILE_SUFFIX: &str = " - Ping Monitor Report.txt";

/// Render one probe result as a report line, without the newline.
pub fn format_line(result: &ProbeResult) -> String {
    let time = result.time.format(LINE_TIME_FORMAT);
    match result.rtt_ms {
        Some(ms) => format!("[{}] Response from {}: time={:.3} MS", time, result.address, ms),
        None => format!("[{}] No response from {}", time, result.address),
    }
}

/// A report line read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLine {
    pub time: NaiveDateTime,
    pub address: String,
    pub rtt_ms: Option<f64>,
}

/// Parse a line written by [`format_line`]. Blank or foreign lines give `None`.
pub fn parse_line(line: &str) -> Option<ReportLine> {
    static RESPONSE: OnceLock<Regex> = OnceLock::new();
    static NO_RESPONSE: OnceLock<Regex> = OnceLock::new();

    let response = RESPONSE.get_or_init(|| {
        Regex::new(r"^\[(?P<time>[^\]]+)\] Response from (?P<addr>.+): time=(?P<rtt>[0-9.]+) MS$")
            .expect("static regex")
    });
    let no_response = NO_RESPONSE.get_or_init(|| {
        Regex::new(r"^\[(?P<time>[^\]]+)\] No response from (?P<addr>.+)$").expect("static regex")
    });

    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(caps) = response.captures(line) {
        return Some(ReportLine {
            time: NaiveDateTime::parse_from_str(&caps["time"], LINE_TIME_FORMAT).ok()?,
            address: caps["addr"].to_string(),
            rtt_ms: Some(caps["rtt"].parse().ok()?),
        });
    }

    let caps = no_response.captures(line)?;
    Some(ReportLine {
        time: NaiveDateTime::parse_from_str(&caps["time"], LINE_TIME_FORMAT).ok()?,
        address: caps["addr"].to_string(),
        rtt_ms: None,
    })
}

/// Per-address totals over a set of report lines.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressTally {
    pub address: String,
    pub attempts: usize,
    pub responses: usize,
    /// Mean round-trip time over the attempts that got a reply.
    pub avg_rtt_ms: Option<f64>,
}

/// Group lines by address, in order of first appearance.
pub fn tally<'a, I>(lines: I) -> Vec<AddressTally>
where
    I: IntoIterator<Item = &'a ReportLine>,
{
    let mut tallies: Vec<(AddressTally, f64)> = Vec::new();

    for line in lines {
        let idx = match tallies.iter().position(|(t, _)| t.address == line.address) {
            Some(idx) => idx,
            None => {
                tallies.push((
                    AddressTally {
                        address: line.address.clone(),
                        attempts: 0,
                        responses: 0,
                        avg_rtt_ms: None,
                    },
                    0.0,
                ));
                tallies.len() - 1
            }
        };

        let (tally, rtt_sum) = &mut tallies[idx];
        tally.attempts += 1;
        if let Some(ms) = line.rtt_ms {
            tally.responses += 1;
            *rtt_sum += ms;
        }
    }

    tallies
        .into_iter()
        .map(|(mut tally, rtt_sum)| {
            if tally.responses > 0 {
                tally.avg_rtt_ms = Some(rtt_sum / tally.responses as f64);
            }
            tally
        })
        .collect()
}
