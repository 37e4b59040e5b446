//! Run log and audit record emission.
//!
//! The [`RunLog`] collects informational lines and per-row diagnostics in
//! order and ends with the `Imported N rows to <entity>` summary. At the end
//! of a run the orchestrator hands it, with an [`AuditRecord`], to one
//! [`AuditSink`] chosen at process start.

use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Info(String),
    Row { row: usize, lines: Vec<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLog {
    entries: Vec<LogEntry>,
    summary: Option<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, line: impl Into<String>) {
        self.entries.push(LogEntry::Info(line.into()));
    }

    /// Records a row's diagnostics; rows without any are not recorded.
    pub fn row(&mut self, row: usize, lines: Vec<String>) {
        if !lines.is_empty() {
            self.entries.push(LogEntry::Row { row, lines });
        }
    }

    pub fn summarize(&mut self, line: impl Into<String>) {
        self.summary = Some(line.into());
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Every row-level diagnostic, in order.
    pub fn diagnostics(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().flat_map(|entry| match entry {
            LogEntry::Row { lines, .. } => lines.as_slice(),
            LogEntry::Info(_) => &[],
        })
        .map(String::as_str)
    }

    /// Every line including the summary, in order.
    pub fn lines(&self) -> Vec<&str> {
        let mut lines = Vec::new();
        for entry in &self.entries {
            match entry {
                LogEntry::Info(line) => lines.push(line.as_str()),
                LogEntry::Row { lines: row, .. } => lines.extend(row.iter().map(String::as_str)),
            }
        }
        lines.extend(self.summary.as_deref());
        lines
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.summary.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditRecord {
    pub file_name: String,
    pub import_user: String,
    pub upload_method: String,
    pub error_log: String,
    pub import_date: NaiveDateTime,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub charset: String,
}

impl AuditRecord {
    pub fn from_log(
        file_name: &Path,
        import_user: &str,
        upload_method: &str,
        charset: &str,
        log: &RunLog,
    ) -> Self {
        Self {
            file_name: file_name.display().to_string(),
            import_user: import_user.to_string(),
            upload_method: upload_method.to_string(),
            error_log: log.diagnostics().collect::<Vec<_>>().join("\n"),
            import_date: chrono::Local::now().naive_local(),
            charset: charset.to_string(),
        }
    }
}

pub trait AuditSink {
    fn emit(&mut self, record: &AuditRecord, log: &RunLog) -> Result<()>;
}

/// Prints the run to a terminal-style writer.
pub struct ScreenSink<W: Write> {
    out: W,
}

impl ScreenSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ScreenSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> AuditSink for ScreenSink<W> {
    fn emit(&mut self, record: &AuditRecord, log: &RunLog) -> Result<()> {
        writeln!(self.out, "Assumed charset = {}", record.charset)?;
        writeln!(self.out, "###############################")?;
        for line in log.lines() {
            writeln!(self.out, "{line}")?;
        }
        self.out.flush().context("Flushing run log output")
    }
}

/// Forwards every line to the `log` facade.
pub struct LoggerSink;

impl AuditSink for LoggerSink {
    fn emit(&mut self, record: &AuditRecord, log: &RunLog) -> Result<()> {
        info!("Import of {} using charset {}", record.file_name, record.charset);
        for line in log.lines() {
            info!("{line}");
        }
        Ok(())
    }
}

/// Appends each audit record as one JSON line.
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AuditSink for JsonLinesSink {
    fn emit(&mut self, record: &AuditRecord, _log: &RunLog) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Opening audit log {:?}", self.path))?;
        let line = serde_json::to_string(record).context("Serializing audit record")?;
        writeln!(file, "{line}").with_context(|| format!("Writing audit log {:?}", self.path))
    }
}

impl AuditSink for Vec<AuditRecord> {
    fn emit(&mut self, record: &AuditRecord, _log: &RunLog) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}
