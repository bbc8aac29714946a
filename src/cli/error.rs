//! CLI error types and conversions

use crate::backup::BackupError;
use crate::client::FetcherError;
use crate::metrics::MetricsError;
use crate::output::OutputError;
use crate::space::SpaceError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Space domain or project key error
    #[error("space error: {0}")]
    SpaceError(#[from] SpaceError),

    /// Client construction error
    #[error("client error: {0}")]
    FetcherError(#[from] FetcherError),

    /// Run-level backup error
    #[error("backup error: {0}")]
    BackupError(#[from] BackupError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
