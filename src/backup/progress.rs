//! Progress reporting for category pipelines.
//!
//! The orchestrator reports through [`ProgressSink`]; the CLI renders bars,
//! library callers get periodic log lines from [`LogProgress`] or nothing at
//! all from [`NoProgress`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

use super::report::CategoryReport;
use crate::Category;

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_PERCENTAGE_STEP: f64 = 10.0;

/// Receiver of pipeline progress events
pub trait ProgressSink: Send + Sync {
    /// A category finished listing and is about to process `total` items
    fn category_started(&self, project: &str, category: Category, total: usize);

    /// One item finished, successfully or not
    fn item_finished(&self, project: &str, category: Category, ok: bool);

    /// A category reached a terminal state
    fn category_finished(&self, project: &str, report: &CategoryReport);
}

/// Ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn category_started(&self, _project: &str, _category: Category, _total: usize) {}

    fn item_finished(&self, _project: &str, _category: Category, _ok: bool) {}

    fn category_finished(&self, _project: &str, _report: &CategoryReport) {}
}

/// Counters of one running category.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Items expected.
    pub total: usize,
    /// Items finished so far.
    pub done: usize,
    /// Items that failed so far.
    pub failed: usize,
    /// When the category started.
    pub start_time: Instant,
    /// When progress was last reported.
    pub last_update: Instant,
    /// Last reported percentage.
    pub last_reported_percentage: f64,
}

impl ProgressState {
    /// Fresh state for `total` items.
    pub fn new(total: usize) -> Self {
        let now = Instant::now();
        Self {
            total,
            done: 0,
            failed: 0,
            start_time: now,
            last_update: now,
            last_reported_percentage: 0.0,
        }
    }

    /// Completion percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.done as f64 / self.total as f64) * 100.0
        }
    }

    /// Estimated time left at the current item rate.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if self.done == 0 || elapsed <= 0.0 {
            return None;
        }
        let rate = self.done as f64 / elapsed;
        let remaining = self.total.saturating_sub(self.done);
        (remaining > 0).then(|| Duration::from_secs_f64(remaining as f64 / rate))
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self, category: Category) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] {category}: {}/{} items - {:.1}% complete",
            self.done,
            self.total,
            self.percentage()
        )];
        if self.failed > 0 {
            parts.push(format!("({} failed)", self.failed));
        }
        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }
        parts.join(" ")
    }
}

/// Logs progress every percentage step or update interval, whichever is first
#[derive(Debug)]
pub struct LogProgress {
    update_interval: Duration,
    min_percentage_step: f64,
    states: Mutex<HashMap<(String, Category), ProgressState>>,
}

impl LogProgress {
    /// Reporter with a custom cadence.
    pub fn new(update_interval: Duration, min_percentage_step: f64) -> Self {
        Self {
            update_interval,
            min_percentage_step,
            states: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL, DEFAULT_PERCENTAGE_STEP)
    }
}

impl ProgressSink for LogProgress {
    fn category_started(&self, project: &str, category: Category, total: usize) {
        info!(project, category = %category, total, "Processing items");
        if let Ok(mut states) = self.states.lock() {
            states.insert((project.to_string(), category), ProgressState::new(total));
        }
    }

    fn item_finished(&self, project: &str, category: Category, ok: bool) {
        let Ok(mut states) = self.states.lock() else {
            return;
        };
        let Some(state) = states.get_mut(&(project.to_string(), category)) else {
            return;
        };
        state.done += 1;
        if !ok {
            state.failed += 1;
        }
        let pct = state.percentage();
        if pct - state.last_reported_percentage >= self.min_percentage_step
            || state.last_update.elapsed() >= self.update_interval
        {
            info!(project, "{}", state.format_progress(category));
            state.last_update = Instant::now();
            state.last_reported_percentage = pct;
        }
    }

    fn category_finished(&self, project: &str, report: &CategoryReport) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(&(project.to_string(), report.category));
        }
        info!(
            project,
            category = %report.category,
            written = report.written,
            failed = report.failed,
            status = ?report.status,
            "Category finished"
        );
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
