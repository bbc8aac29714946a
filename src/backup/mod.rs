//! Backup orchestration and rate limiting
//!
//! # Overview
//!
//! A run walks through:
//!
//! 1. **Discovery**: resolve the selected projects once, via the API or (for
//!    space-wide enumeration) the browser, then apply the archive filter
//! 2. **Category pipelines**: per project, issues, wiki and files run one after
//!    another while git and svn run alongside them; each category is a
//!    [`job::CategoryJob`] moving through
//!    `Pending -> Fetching -> Mapping -> Writing -> Done | Failed`
//! 3. **Item dispatch**: issues, pages and files are fetched concurrently up to
//!    the configured bound, every request passing through the shared
//!    [`rate_limit::RateLimiter`]
//! 4. **Report**: [`report::RunReport`] aggregates per-category outcomes and is
//!    written to `backup_report.json`
//!
//! # Error Handling
//!
//! - Item failures (not found, exhausted retries, unexpected page layout) are
//!   logged, counted and skipped
//! - Session loss, browser failure and cancellation end the category
//! - Authentication failure ends the run with [`BackupError::Authentication`]

pub mod config;
pub mod job;
pub mod orchestrator;
pub mod progress;
pub mod rate_limit;
pub mod report;

pub use job::{CategoryJob, CategoryState};
pub use orchestrator::{BackupOptions, BackupOrchestrator, ProjectSelection};
pub use progress::{LogProgress, NoProgress, ProgressSink};
pub use rate_limit::{Clock, RateLimiter, TokioClock};
pub use report::{CategoryReport, CategoryStatus, ItemFailure, ProjectReport, RunReport};

use crate::client::FetcherError;
use crate::mapper::MapError;
use crate::output::OutputError;

/// Run-level errors
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Credentials rejected; nothing further can succeed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The requested project does not exist or is not visible
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// Projects could not be listed
    #[error("project discovery failed: {0}")]
    Discovery(String),

    /// Options do not allow the requested run
    #[error("configuration error: {0}")]
    Config(String),

    /// Report or shared artifact could not be written
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Discovered project record was unusable
    #[error("mapping error: {0}")]
    Map(#[from] MapError),
}

impl From<FetcherError> for BackupError {
    fn from(error: FetcherError) -> Self {
        match error {
            FetcherError::Authentication(message) => Self::Authentication(message),
            other => Self::Discovery(other.to_string()),
        }
    }
}
