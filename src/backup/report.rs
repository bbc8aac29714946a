//! Run summary
//!
//! Serialized to `backup_report.json`. Contains no timestamps so an unchanged
//! space produces an identical report.

use serde::Serialize;

use crate::Category;

/// One item that could not be backed up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// Item label (issue key, page name, file path, repository name)
    pub item: String,
    /// Error description
    pub error: String,
}

/// Final status of a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum CategoryStatus {
    /// Every item was written
    Succeeded,
    /// Some items failed
    Partial,
    /// The category could not complete
    Failed(String),
}

/// Outcome of one (project, category) pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    /// Category
    pub category: Category,
    /// Final status
    #[serde(flatten)]
    pub status: CategoryStatus,
    /// Entities written
    pub written: u64,
    /// Items that failed
    pub failed: u64,
    /// Failure details in listing order
    pub failures: Vec<ItemFailure>,
}

impl CategoryReport {
    /// Whether every item was written
    pub fn is_success(&self) -> bool {
        self.status == CategoryStatus::Succeeded
    }
}

/// Outcomes of one project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectReport {
    /// Project key
    pub key: String,
    /// Project name
    pub name: String,
    /// Category outcomes in pipeline order
    pub categories: Vec<CategoryReport>,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Per-project outcomes, in discovery order
    pub projects: Vec<ProjectReport>,
    /// Cancellation stopped the run early
    pub cancelled: bool,
}

impl RunReport {
    /// Every category report of the run
    pub fn categories(&self) -> impl Iterator<Item = &CategoryReport> {
        self.projects.iter().flat_map(|p| p.categories.iter())
    }

    /// Categories that fully succeeded
    pub fn succeeded_count(&self) -> usize {
        self.categories().filter(|c| c.is_success()).count()
    }

    /// Categories that succeeded with item failures
    pub fn partial_count(&self) -> usize {
        self.categories()
            .filter(|c| c.status == CategoryStatus::Partial)
            .count()
    }

    /// Categories that failed
    pub fn failed_count(&self) -> usize {
        self.categories()
            .filter(|c| matches!(c.status, CategoryStatus::Failed(_)))
            .count()
    }

    /// Total entities written
    pub fn written_count(&self) -> u64 {
        self.categories().map(|c| c.written).sum()
    }

    /// Whether the run finished and every category succeeded
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.categories().all(CategoryReport::is_success)
    }

    /// Human-readable lines, one per category
    pub fn summary_lines(&self) -> Vec<String> {
        self.projects
            .iter()
            .flat_map(|project| {
                project.categories.iter().map(move |c| {
                    let status = match &c.status {
                        CategoryStatus::Succeeded => "ok".to_string(),
                        CategoryStatus::Partial => format!("partial, {} failed", c.failed),
                        CategoryStatus::Failed(reason) => format!("failed: {reason}"),
                    };
                    format!(
                        "{:<12} {:<7} {:>6} written  {}",
                        project.key, c.category, c.written, status
                    )
                })
            })
            .collect()
    }
}
