//! Backup output
//!
//! - [`path`] - deterministic, sanitized paths under the output directory
//! - [`render`] - plain-text rendering of wiki markup
//! - [`csv`] - the per-project issue summary table
//! - [`writer`] - [`BackupWriter`], atomic per-file writes

use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::trace;

pub mod csv;
pub mod path;
pub mod render;
pub mod writer;

pub use path::{sanitize_or, sanitize_segment, BackupPathBuilder, UniqueNamer, WIKI_INDEX_STEM};
pub use writer::{
    local_tree_paths, order_tree, unique_names, wiki_stems, BackupRecord, BackupWriter,
    WikiIndexEntry,
};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Replace `path` with `contents` atomically
///
/// Writes a temp file in the destination directory, syncs it, renames it into
/// place and syncs the directory. Readers see either the old or the new file.
pub fn atomic_write(path: &Path, contents: &[u8]) -> OutputResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| {
        OutputError::IoError(format!("Failed to create directory {}: {e}", parent.display()))
    })?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| OutputError::IoError(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(contents)
        .map_err(|e| OutputError::IoError(format!("Failed to write to temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| OutputError::IoError(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| OutputError::IoError(format!("Failed to sync temp file: {e}")))?;
    temp_file.persist(path).map_err(|e| {
        OutputError::IoError(format!("Failed to persist {}: {e}", path.display()))
    })?;

    if let Ok(dir) = std::fs::File::open(parent) {
        let _ = dir.sync_all();
    }

    trace!(path = %path.display(), bytes = contents.len(), "Wrote file");
    Ok(())
}

/// Serialize `value` as two-space pretty JSON with a trailing newline
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> OutputResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| OutputError::SerializationError(e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}
