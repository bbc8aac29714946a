//! Per-category job state and accounting

use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

use super::report::{CategoryReport, CategoryStatus, ItemFailure};
use crate::metrics::EntityMetrics;
use crate::Category;

/// Lifecycle of one (project, category) pair
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum CategoryState {
    /// Not started
    #[default]
    Pending,
    /// Listing and fetching remote records
    Fetching,
    /// Converting records to entities
    Mapping,
    /// Writing entities and shared artifacts
    Writing,
    /// Finished; item failures may still have been recorded
    Done,
    /// Stopped early
    Failed(String),
}

impl CategoryState {
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Fetching => 1,
            Self::Mapping => 2,
            Self::Writing => 3,
            Self::Done | Self::Failed(_) => 4,
        }
    }

    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for CategoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Fetching => write!(f, "fetching"),
            Self::Mapping => write!(f, "mapping"),
            Self::Writing => write!(f, "writing"),
            Self::Done => write!(f, "done"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// State and counters of one category pipeline
#[derive(Debug, Clone)]
pub struct CategoryJob {
    /// Owning project key
    pub project_key: String,
    /// Category
    pub category: Category,
    state: CategoryState,
    written: u64,
    failures: Vec<ItemFailure>,
}

impl CategoryJob {
    /// Pending job
    pub fn new(project_key: impl Into<String>, category: Category) -> Self {
        Self {
            project_key: project_key.into(),
            category,
            state: CategoryState::Pending,
            written: 0,
            failures: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> &CategoryState {
        &self.state
    }

    /// Entities written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Failures recorded so far
    pub fn failures(&self) -> &[ItemFailure] {
        &self.failures
    }

    /// Move forward to `next`; stages may be skipped but never revisited
    ///
    /// Returns `false` and leaves the state unchanged otherwise.
    pub fn advance(&mut self, next: CategoryState) -> bool {
        if self.state.is_terminal() || next.rank() <= self.state.rank() {
            return false;
        }
        debug!(
            project = %self.project_key,
            category = %self.category,
            from = %self.state,
            to = %next,
            "Category state change"
        );
        self.state = next;
        true
    }

    /// Count `count` written entities
    pub fn record_written(&mut self, count: u64) {
        self.written += count;
        for _ in 0..count {
            EntityMetrics::record_written(self.category);
        }
    }

    /// Record an item that was skipped
    pub fn record_failure(&mut self, item: impl Into<String>, error: impl fmt::Display) {
        let failure = ItemFailure {
            item: item.into(),
            error: error.to_string(),
        };
        warn!(
            project = %self.project_key,
            category = %self.category,
            item = %failure.item,
            error = %failure.error,
            "Item skipped"
        );
        EntityMetrics::record_failed(self.category);
        self.failures.push(failure);
    }

    /// Stop the job with `reason`
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.advance(CategoryState::Failed(reason.clone())) {
            self.state = CategoryState::Failed(reason);
        }
    }

    /// Close the job and summarize it
    ///
    /// A job that wrote nothing while every item failed counts as failed.
    pub fn finish(mut self) -> CategoryReport {
        self.advance(CategoryState::Done);
        let failed = self.failures.len() as u64;
        let status = match self.state {
            CategoryState::Failed(reason) => CategoryStatus::Failed(reason),
            _ if failed == 0 => CategoryStatus::Succeeded,
            _ if self.written == 0 => {
                CategoryStatus::Failed(format!("all {failed} items failed"))
            }
            _ => CategoryStatus::Partial,
        };
        CategoryReport {
            category: self.category,
            status,
            written: self.written,
            failed,
            failures: self.failures,
        }
    }
}
