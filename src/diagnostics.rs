// src/diagnostics.rs

//! Operator-facing diagnostics and restore statistics
//!
//! Diagnostics are structured entries meant for status pages and summary
//! tables. Statistics are ordered key/value counters recorded at the same
//! points the restore pass makes its decisions.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

const EXTRACTOR_NAME: &str = "depfetch";

/// Severity of a diagnostic entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Error,
}

/// Where a diagnostic should be surfaced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Visibility {
    pub status_page: bool,
    pub cli_summary_table: bool,
    pub telemetry: bool,
}

impl Visibility {
    /// Visible everywhere
    pub fn all() -> Self {
        Self {
            status_page: true,
            cli_summary_table: true,
            telemetry: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSource {
    pub id: String,
    pub name: String,
    pub extractor_name: String,
}

/// A structured diagnostic entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub source: DiagnosticSource,
    pub markdown_message: String,
    pub severity: Severity,
    pub visibility: Visibility,
    pub timestamp: String,
}

impl Diagnostic {
    pub fn new(id: &str, name: &str, markdown_message: &str, severity: Severity) -> Self {
        Self {
            source: DiagnosticSource {
                id: format!("{EXTRACTOR_NAME}/{id}"),
                name: name.to_string(),
                extractor_name: EXTRACTOR_NAME.to_string(),
            },
            markdown_message: markdown_message.to_string(),
            severity,
            visibility: Visibility::default(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Raised when an explicit feed is unreachable while restoring without a build
    pub fn unreachable_feed() -> Self {
        Self::new(
            "unreachable-feed",
            "Found unreachable NuGet feed during dependency restore",
            "Found unreachable NuGet feed during dependency restore. \
             This may cause missing dependencies in the analysis.",
            Severity::Note,
        )
        .with_visibility(Visibility::all())
    }
}

/// Receives diagnostics from the restore pass
pub trait DiagnosticsSink: Send + Sync {
    fn add_entry(&self, diagnostic: Diagnostic);
}

/// Drops every diagnostic
#[derive(Debug, Default)]
pub struct NullDiagnostics;

impl DiagnosticsSink for NullDiagnostics {
    fn add_entry(&self, _diagnostic: Diagnostic) {}
}

/// Appends diagnostics to a file as JSON lines
pub struct JsonDiagnosticsWriter {
    file: Mutex<File>,
}

impl JsonDiagnosticsWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                Error::IoError(format!(
                    "Failed to open diagnostics file {}: {}",
                    path.display(),
                    e
                ))
            })?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn write_entry(&self, diagnostic: &Diagnostic) -> Result<()> {
        let line = serde_json::to_string(diagnostic)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| Error::IoError("Diagnostics file lock poisoned".to_string()))?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }
}

impl DiagnosticsSink for JsonDiagnosticsWriter {
    fn add_entry(&self, diagnostic: Diagnostic) {
        if let Err(e) = self.write_entry(&diagnostic) {
            warn!("Failed to write diagnostic {}: {}", diagnostic.source.id, e);
        }
    }
}

/// Ordered key/value counters describing a restore pass
#[derive(Debug, Default)]
pub struct RestoreStats {
    entries: Mutex<Vec<(String, String)>>,
}

impl RestoreStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, key: &str, value: impl ToString) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((key.to_string(), value.to_string()));
        }
    }

    pub fn record_flag(&self, key: &str, value: bool) {
        self.record(key, if value { "1" } else { "0" });
    }

    /// Snapshot of all recorded entries, in recording order
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Most recent value recorded for `key`
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries().into_iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_feed_serialization() {
        let diagnostic = Diagnostic::unreachable_feed();
        let value = serde_json::to_value(&diagnostic).unwrap();

        assert_eq!(value["source"]["id"], "depfetch/unreachable-feed");
        assert_eq!(value["source"]["extractorName"], "depfetch");
        assert_eq!(value["severity"], "note");
        assert_eq!(value["visibility"]["statusPage"], true);
        assert_eq!(value["visibility"]["cliSummaryTable"], true);
        assert_eq!(value["visibility"]["telemetry"], true);
    }

    #[test]
    fn test_json_writer_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diagnostics.jsonl");
        let writer = JsonDiagnosticsWriter::create(&path).unwrap();

        writer.add_entry(Diagnostic::unreachable_feed());
        writer.add_entry(Diagnostic::new("other", "Other", "Other", Severity::Warning));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"warning\""));
    }

    #[test]
    fn test_stats_keep_order_and_latest_value() {
        let stats = RestoreStats::new();
        stats.record("restored", 1);
        stats.record_flag("checked", true);
        stats.record("restored", 3);

        assert_eq!(stats.entries().len(), 3);
        assert_eq!(stats.get("restored").as_deref(), Some("3"));
        assert_eq!(stats.get("checked").as_deref(), Some("1"));
        assert_eq!(stats.get("missing"), None);
    }
}
