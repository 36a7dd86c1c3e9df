//! Field extraction from raw monitoring log lines
//!
//! Log lines arrive in two shapes: labeled (`Key: Value | Key: Value`) and the
//! legacy positional form (`timestamp | severity | component | problem id`).
//! Every extractor first looks for its label and falls back to the pipe
//! position. Extraction is total: a missing or malformed field yields a
//! default, never an error.

use crate::events::{Severity, Timestamp};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

const TIMESTAMP_LABEL: &str = "Timestamp: ";
const SEVERITY_LABEL: &str = "Severity: ";
const STATUS_LABEL: &str = "Status: ";
const COMPONENT_LABEL: &str = "Component: ";
const ENDPOINT_LABEL: &str = "Endpoint: ";
const PROBLEM_ID_LABEL: &str = "ProblemId: ";
const EXCEPTION_TYPE_LABEL: &str = "ExceptionType: ";

/// Component name used when a line names no component
pub const UNKNOWN_COMPONENT: &str = "Unknown";

/// Timestamp formats that carry their own offset
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%d %H:%M:%S%.f %:z",
    "%m/%d/%Y %I:%M:%S %p %:z",
];

/// Timestamp formats without an offset, interpreted as UTC
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
];

/// Value following `label`, up to the next `" |"` or the end of the line
///
/// Returns `None` when the label is absent or its value is blank.
pub fn labeled_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let start = line.find(label)? + label.len();
    let rest = &line[start..];
    let value = match rest.find(" |") {
        Some(end) => &rest[..end],
        None => rest,
    };
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Trimmed pipe-separated field at `index`, if the line has that many fields
fn positional_value(line: &str, index: usize) -> Option<&str> {
    line.split('|').nth(index).map(str::trim)
}

/// Component (or endpoint) that produced the line
///
/// Never empty: falls back to position 2 and then to `"Unknown"`.
pub fn component(line: &str) -> String {
    labeled_value(line, COMPONENT_LABEL)
        .or_else(|| labeled_value(line, ENDPOINT_LABEL))
        .or_else(|| positional_value(line, 2).filter(|value| !value.is_empty()))
        .unwrap_or(UNKNOWN_COMPONENT)
        .to_string()
}

/// Severity of the line
///
/// `Severity:` wins over `Status:`, which wins over position 1.
pub fn severity(line: &str) -> Severity {
    if let Some(value) = labeled_value(line, SEVERITY_LABEL) {
        return Severity::from_label(value);
    }

    if let Some(value) = labeled_value(line, STATUS_LABEL) {
        return Severity::from_status(value);
    }

    match positional_value(line, 1) {
        Some(value) => Severity::from_label(value),
        None => Severity::Unknown,
    }
}

/// Failure signature of the line
///
/// Falls back to position 3 and finally to the entire raw line, so lines
/// without an explicit id still de-duplicate by content.
pub fn problem_id(line: &str) -> String {
    labeled_value(line, PROBLEM_ID_LABEL)
        .or_else(|| positional_value(line, 3).filter(|value| !value.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| line.to_string())
}

/// Exception type name, if the line carries an `ExceptionType:` field
pub fn exception_type(line: &str) -> Option<String> {
    labeled_value(line, EXCEPTION_TYPE_LABEL).map(str::to_string)
}

/// Time the event happened
///
/// Returns `DateTime::<Utc>::MIN_UTC` when no parsable timestamp is found.
pub fn timestamp(line: &str) -> Timestamp {
    if let Some(parsed) = labeled_value(line, TIMESTAMP_LABEL).and_then(parse_timestamp) {
        return parsed;
    }

    positional_value(line, 0)
        .map(|value| value.strip_prefix(TIMESTAMP_LABEL).unwrap_or(value))
        .and_then(parse_timestamp)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Parse a timestamp in any of the formats the monitoring backends emit
fn parse_timestamp(value: &str) -> Option<Timestamp> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
