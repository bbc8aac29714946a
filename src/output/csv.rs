//! Issue summary table
//!
//! One row per written issue, committed once per category in remote listing
//! order regardless of the order issues finished downloading.

use chrono::{DateTime, SecondsFormat, Utc};
use csv::Writer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use super::{atomic_write, OutputError, OutputResult};
use crate::mapper::display_value;
use crate::Issue;

/// CSV record for one issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSummaryRow {
    id: String,
    issue_key: String,
    summary: String,
    status: String,
    priority: String,
    issue_type: String,
    assignee: String,
    category: String,
    milestone: String,
    created: String,
    updated: String,
    due_date: String,
    estimated_hours: String,
    actual_hours: String,
}

impl From<&Issue> for IssueSummaryRow {
    fn from(issue: &Issue) -> Self {
        let field = |name: &str| issue.fields.get(name).map(display_value).unwrap_or_default();
        Self {
            id: issue.id.to_string(),
            issue_key: issue.key.clone(),
            summary: issue.summary.clone(),
            status: issue.status.clone().unwrap_or_default(),
            priority: field("priority"),
            issue_type: field("issueType"),
            assignee: issue.assignee.clone().unwrap_or_default(),
            category: field("category"),
            milestone: field("milestone"),
            created: format_time(issue.created),
            updated: format_time(issue.updated),
            due_date: field("dueDate"),
            estimated_hours: field("estimatedHours"),
            actual_hours: field("actualHours"),
        }
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Rows collected out of order, emitted by listing index
#[derive(Debug, Default)]
pub struct IssueSummary {
    rows: BTreeMap<usize, IssueSummaryRow>,
}

impl IssueSummary {
    /// Empty summary
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the issue at listing position `index`
    pub fn record(&mut self, index: usize, issue: &Issue) {
        self.insert(index, IssueSummaryRow::from(issue));
    }

    /// Record an already-built row at listing position `index`
    pub fn insert(&mut self, index: usize, row: IssueSummaryRow) {
        self.rows.insert(index, row);
    }

    /// Rows recorded so far
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows were recorded
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in listing order
    pub fn rows(&self) -> impl Iterator<Item = &IssueSummaryRow> {
        self.rows.values()
    }

    /// Serialize to CSV bytes, header included even when empty
    pub fn to_csv(&self) -> OutputResult<Vec<u8>> {
        let mut writer = Writer::from_writer(Vec::new());
        if self.rows.is_empty() {
            writer
                .write_record(SUMMARY_HEADER)
                .map_err(|e| OutputError::CsvError(format!("Failed to write header: {e}")))?;
        }
        for row in self.rows.values() {
            writer
                .serialize(row)
                .map_err(|e| OutputError::CsvError(format!("Failed to write row: {e}")))?;
        }
        writer
            .into_inner()
            .map_err(|e| OutputError::CsvError(format!("Failed to finish CSV: {e}")))
    }

    /// Write the table to `path`
    pub fn write(&self, path: &Path) -> OutputResult<()> {
        atomic_write(path, &self.to_csv()?)?;
        info!(path = %path.display(), rows = self.rows.len(), "Wrote issue summary");
        Ok(())
    }
}

const SUMMARY_HEADER: [&str; 14] = [
    "id",
    "issueKey",
    "summary",
    "status",
    "priority",
    "issueType",
    "assignee",
    "category",
    "milestone",
    "created",
    "updated",
    "dueDate",
    "estimatedHours",
    "actualHours",
];
