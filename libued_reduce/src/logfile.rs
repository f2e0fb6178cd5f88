//! Parsing of the plaintext experiment log.
//!
//! The orchestration scripts append one line per acquired image series.
//! Parsing those lines in file order recovers the real acquisition order,
//! which the delay-indexed data alone cannot provide; downstream analysis
//! relies on it for real-time correlation.

use std::path::{Path, PathBuf};

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::PrimitiveDateTime;

use super::error::LogParseError;

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const TIMESTAMP_LEN: usize = 19;

const PUMP_ON_MARKER: &str = "pump on image series acquired at scan ";
const LASER_BG_MARKER: &str = "laser background image series acquired";
const DELAY_MARKER: &str = "time-delay ";

/// One pump-on acquisition recorded in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub scan: u32,
    pub delay: f64,
    pub timestamp: PrimitiveDateTime,
    /// The raw file this acquisition produced, under the run directory.
    pub filename: PathBuf,
}

/// Everything extracted from one experiment log.
#[derive(Debug, Clone, Default)]
pub struct ExperimentLog {
    /// Pump-on acquisitions in log order, which is acquisition order.
    pub entries: Vec<LogEntry>,
    /// Timestamps of laser background series, for diagnostics correlation.
    pub diagnostic_timestamps: Vec<PrimitiveDateTime>,
}

/// Parse the experiment log, resolving raw file paths under `parent`.
pub fn parse_logfile(path: &Path, parent: &Path) -> Result<ExperimentLog, LogParseError> {
    if !path.exists() {
        return Err(LogParseError::BadFilePath(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();
    let mut diagnostic_timestamps = Vec::new();
    for line in contents.lines() {
        if let Some(marker) = line.find(PUMP_ON_MARKER) {
            let timestamp = parse_timestamp(line)?;
            let scan = parse_scan_number(&line[marker + PUMP_ON_MARKER.len()..], line)?;
            let delay = parse_delay(line)?;
            let filename = parent
                .join(format!("scan_{scan:04}"))
                .join(format!("pumpon_{delay:+010.3}ps.h5"));
            entries.push(LogEntry {
                scan,
                delay,
                timestamp,
                filename,
            });
        } else if line.contains(LASER_BG_MARKER) {
            diagnostic_timestamps.push(parse_timestamp(line)?);
        }
    }
    Ok(ExperimentLog {
        entries,
        diagnostic_timestamps,
    })
}

/// The raw files named in the log, in acquisition order.
pub fn filenames_from_logfile(path: &Path, parent: &Path) -> Result<Vec<PathBuf>, LogParseError> {
    Ok(parse_logfile(path, parent)?
        .entries
        .into_iter()
        .map(|entry| entry.filename)
        .collect())
}

fn parse_timestamp(line: &str) -> Result<PrimitiveDateTime, LogParseError> {
    let raw = find_timestamp(line)
        .ok_or_else(|| LogParseError::MissingTimestamp(line.to_string()))?;
    Ok(PrimitiveDateTime::parse(raw, TIMESTAMP_FORMAT)?)
}

/// Locate the first `YYYY-MM-DD HH:MM:SS` pattern in a line.
fn find_timestamp(line: &str) -> Option<&str> {
    let bytes = line.as_bytes();
    if bytes.len() < TIMESTAMP_LEN {
        return None;
    }
    let digits = |range: std::ops::Range<usize>, window: &[u8]| {
        window[range].iter().all(u8::is_ascii_digit)
    };
    for start in 0..=bytes.len() - TIMESTAMP_LEN {
        let window = &bytes[start..start + TIMESTAMP_LEN];
        if digits(0..4, window)
            && window[4] == b'-'
            && digits(5..7, window)
            && window[7] == b'-'
            && digits(8..10, window)
            && window[10] == b' '
            && digits(11..13, window)
            && window[13] == b':'
            && digits(14..16, window)
            && window[16] == b':'
            && digits(17..19, window)
        {
            return Some(&line[start..start + TIMESTAMP_LEN]);
        }
    }
    None
}

fn parse_scan_number(tail: &str, line: &str) -> Result<u32, LogParseError> {
    let digits: String = tail.chars().take_while(char::is_ascii_digit).collect();
    digits
        .parse()
        .map_err(|_| LogParseError::MalformedLine(line.to_string()))
}

fn parse_delay(line: &str) -> Result<f64, LogParseError> {
    let malformed = || LogParseError::MalformedLine(line.to_string());
    let start = line.find(DELAY_MARKER).ok_or_else(malformed)? + DELAY_MARKER.len();
    let tail = &line[start..];
    let unit = tail.find("ps").ok_or_else(malformed)?;
    tail[..unit].parse().map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const LOG: &str = "\
2022-03-14 09:00:01 starting run_0145
2022-03-14 09:00:05 laser background image series acquired
2022-03-14 09:01:12 pump on image series acquired at scan 1 (time-delay +003.500ps)
2022-03-14 09:02:40 pump on image series acquired at scan 1 (time-delay -046.000ps)
2022-03-14 09:04:09 pump on image series acquired at scan 2 (time-delay +000.250ps)
2022-03-14 09:04:30 delay stage moved
";

    fn write_log(dir: &Path) -> PathBuf {
        let path = dir.join("experiment.log");
        std::fs::write(&path, LOG).unwrap();
        path
    }

    #[test]
    fn test_entries_preserve_log_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = parse_logfile(&write_log(dir.path()), Path::new("/data/run_0145")).unwrap();
        assert_eq!(log.entries.len(), 3);
        let delays: Vec<f64> = log.entries.iter().map(|e| e.delay).collect();
        assert_eq!(delays, vec![3.5, -46.0, 0.25]);
        assert_eq!(log.entries[0].timestamp, datetime!(2022-03-14 09:01:12));
        assert_eq!(log.entries[2].scan, 2);
    }

    #[test]
    fn test_filenames_resolve_under_parent() {
        let dir = tempfile::tempdir().unwrap();
        let files =
            filenames_from_logfile(&write_log(dir.path()), Path::new("/data/run_0145")).unwrap();
        assert_eq!(
            files[0],
            PathBuf::from("/data/run_0145/scan_0001/pumpon_+00003.500ps.h5")
        );
        assert_eq!(
            files[1],
            PathBuf::from("/data/run_0145/scan_0001/pumpon_-00046.000ps.h5")
        );
    }

    #[test]
    fn test_generated_names_roundtrip_through_delay_parser() {
        let dir = tempfile::tempdir().unwrap();
        let files =
            filenames_from_logfile(&write_log(dir.path()), Path::new("/data/run_0145")).unwrap();
        let parsed: Vec<f64> = files
            .iter()
            .map(|f| crate::stack_file::delay_from_path(f).unwrap())
            .collect();
        assert_eq!(parsed, vec![3.5, -46.0, 0.25]);
    }

    #[test]
    fn test_diagnostic_timestamps_collected() {
        let dir = tempfile::tempdir().unwrap();
        let log = parse_logfile(&write_log(dir.path()), Path::new("/data")).unwrap();
        assert_eq!(log.diagnostic_timestamps, vec![datetime!(2022-03-14 09:00:05)]);
    }

    #[test]
    fn test_line_without_timestamp_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.log");
        std::fs::write(
            &path,
            "pump on image series acquired at scan 3 (time-delay +001.000ps)\n",
        )
        .unwrap();
        let result = parse_logfile(&path, Path::new("/data"));
        assert!(matches!(result, Err(LogParseError::MissingTimestamp(_))));
    }

    #[test]
    fn test_missing_logfile_is_an_error() {
        let result = parse_logfile(Path::new("/nonexistent/experiment.log"), Path::new("/data"));
        assert!(matches!(result, Err(LogParseError::BadFilePath(_))));
    }
}
