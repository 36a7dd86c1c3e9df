//! Core record types for the alert router
//!
//! This module defines the structured view of a raw monitoring log line and
//! the severity levels the grouping strategies reason about.

use crate::extract;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Severity of a log line as reported by the monitoring backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Component is down or threw an unrecoverable error
    Fatal,
    /// Degraded but still serving
    Warning,
    /// Informational, including "back up" status lines
    Info,
    /// Severity field missing or unrecognized
    Unknown,
}

impl Severity {
    /// Map a raw severity label to a level
    ///
    /// Accepts the numeric levels used by the monitoring backends ("3", "2", "1")
    /// and the level names, case-insensitively. Anything else is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "3" | "fatal" => Severity::Fatal,
            "2" | "warning" => Severity::Warning,
            "1" | "info" => Severity::Info,
            _ => Severity::Unknown,
        }
    }

    /// Map an uptime-monitor status value ("Down", "Up", "Warning")
    pub fn from_status(status: &str) -> Self {
        let status = status.trim();
        if status.eq_ignore_ascii_case("down") {
            Severity::Fatal
        } else if status.eq_ignore_ascii_case("up") {
            Severity::Info
        } else if status.eq_ignore_ascii_case("warning") {
            Severity::Warning
        } else {
            Severity::from_label(status)
        }
    }

    /// Name used as a group key by the severity strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Fatal => "Fatal",
            Severity::Warning => "Warning",
            Severity::Info => "Info",
            Severity::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured view of one raw log line
///
/// Derived on demand from the raw line; extraction never fails, missing fields
/// fall back to their documented defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// When the event happened, `DateTime::<Utc>::MIN_UTC` if unparsable
    pub timestamp: Timestamp,
    /// Severity level
    pub severity: Severity,
    /// Component or endpoint that produced the line, "Unknown" if absent
    pub component: String,
    /// Failure signature, the whole line if no explicit id exists
    pub problem_id: String,
    /// Exception type name, if the line carries one
    pub exception_type: Option<String>,
}

impl LogRecord {
    /// Extract every field from a raw log line
    pub fn parse(line: &str) -> Self {
        Self {
            timestamp: extract::timestamp(line),
            severity: extract::severity(line),
            component: extract::component(line),
            problem_id: extract::problem_id(line),
            exception_type: extract::exception_type(line),
        }
    }
}
