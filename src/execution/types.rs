//! Core types shared by the dispatcher, the workers and the sinks

use chrono::{DateTime, Local};
use std::fmt;

/// Timestamp layout of the execution log and summary
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Columns of the per-item execution log
pub const LOG_HEADER: [&str; 7] = [
    "SOL_ID",
    "PROCEDURE",
    "START_TIME",
    "END_TIME",
    "EXECUTION_SECONDS",
    "STATUS",
    "ERROR_DETAILS",
];

/// Columns of the per-procedure summary
pub const SUMMARY_HEADER: [&str; 5] = [
    "PROCEDURE",
    "EARLIEST_START_TIME",
    "LATEST_END_TIME",
    "EXECUTION_SECONDS",
    "STATUS",
];

/// One (identifier, procedure) execution unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub identifier: String,
    pub procedure: String,
}

impl WorkItem {
    pub fn new(identifier: impl Into<String>, procedure: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            procedure: procedure.into(),
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.procedure, self.identifier)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Fail,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Fail => "FAIL",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn seconds_between(start: DateTime<Local>, end: DateTime<Local>) -> f64 {
    (end - start)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Outcome of one work item, written once to the execution log
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub identifier: String,
    pub procedure: String,
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub status: ExecutionStatus,
    pub error_detail: Option<String>,
}

impl ExecutionRecord {
    pub fn execution_seconds(&self) -> f64 {
        seconds_between(self.start, self.end)
    }

    pub fn is_failure(&self) -> bool {
        self.status == ExecutionStatus::Fail
    }

    /// Row in [`LOG_HEADER`] order
    pub fn to_log_row(&self) -> [String; 7] {
        [
            self.identifier.clone(),
            self.procedure.clone(),
            self.start.format(TIMESTAMP_FORMAT).to_string(),
            self.end.format(TIMESTAMP_FORMAT).to_string(),
            format!("{:.3}", self.execution_seconds()),
            self.status.to_string(),
            match self.error_detail.as_deref() {
                Some(detail) if !detail.is_empty() => detail.to_string(),
                _ => "-".to_string(),
            },
        ]
    }
}

/// Aggregate over every record of one procedure
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureSummary {
    pub procedure: String,
    pub earliest_start: DateTime<Local>,
    pub latest_end: DateTime<Local>,
    pub status: ExecutionStatus,
}

impl ProcedureSummary {
    pub fn from_record(record: &ExecutionRecord) -> Self {
        Self {
            procedure: record.procedure.clone(),
            earliest_start: record.start,
            latest_end: record.end,
            status: record.status,
        }
    }

    /// Fold another record of the same procedure in. FAIL is sticky.
    pub fn absorb(&mut self, record: &ExecutionRecord) {
        if record.start < self.earliest_start {
            self.earliest_start = record.start;
        }
        if record.end > self.latest_end {
            self.latest_end = record.end;
        }
        if record.status == ExecutionStatus::Fail {
            self.status = ExecutionStatus::Fail;
        }
    }

    pub fn execution_seconds(&self) -> f64 {
        seconds_between(self.earliest_start, self.latest_end)
    }

    /// Row in [`SUMMARY_HEADER`] order
    pub fn to_row(&self) -> [String; 5] {
        [
            self.procedure.clone(),
            self.earliest_start.format(TIMESTAMP_FORMAT).to_string(),
            self.latest_end.format(TIMESTAMP_FORMAT).to_string(),
            format!("{:.3}", self.execution_seconds()),
            self.status.to_string(),
        ]
    }
}
