// Execution report: leveled, append-only narrative of what the states did

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Importance of a report entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for ReportLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReportLevel::Debug => "debug",
            ReportLevel::Info => "info",
            ReportLevel::Warn => "warn",
            ReportLevel::Error => "error",
            ReportLevel::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

/// One line of the execution report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub timestamp: DateTime<Utc>,
    /// Nested name of the reporting state.
    pub state: String,
    pub level: ReportLevel,
    pub message: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
}

impl ReportEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        state: impl Into<String>,
        level: ReportLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            state: state.into(),
            level,
            message: message.into(),
            value: None,
            unit: None,
        }
    }

    pub fn with_value(mut self, value: f64, unit: impl Into<String>) -> Self {
        self.value = Some(value);
        self.unit = Some(unit.into());
        self
    }
}

/// Destination of report entries. Never read back by the engine.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait ReportSink: Send + Sync {
    fn add_entry(&self, entry: ReportEntry);
}

/// In-memory report that mirrors every entry into `tracing`.
#[derive(Debug, Default)]
pub struct Report {
    entries: Mutex<Vec<ReportEntry>>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries so far.
    pub fn entries(&self) -> Vec<ReportEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn entries_at(&self, level: ReportLevel) -> Vec<ReportEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.level == level)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportSink for Report {
    fn add_entry(&self, entry: ReportEntry) {
        match entry.level {
            ReportLevel::Debug => debug!(state = %entry.state, value = ?entry.value, "{}", entry.message),
            ReportLevel::Info => info!(state = %entry.state, value = ?entry.value, "{}", entry.message),
            ReportLevel::Warn => warn!(state = %entry.state, value = ?entry.value, "{}", entry.message),
            ReportLevel::Error | ReportLevel::Fatal => {
                error!(state = %entry.state, level = %entry.level, value = ?entry.value, "{}", entry.message)
            }
        }
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
