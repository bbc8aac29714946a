//! Backup writer
//!
//! Maps entities onto the layout of [`BackupPathBuilder`] and writes them
//! with [`atomic_write`]. Paths depend only on entity identity and listing
//! order, so rerunning against a populated directory overwrites files in place.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::csv::IssueSummary;
use super::path::{sanitize_or, BackupPathBuilder, UniqueNamer, WIKI_INDEX_STEM};
use super::render::render_plain_text;
use super::{atomic_write, to_pretty_json, OutputError, OutputResult};
use crate::{
    AttachmentOwner, AttachmentRef, FileNode, Issue, NodeKind, RecordSource, TextFormatting,
    WikiPage,
};

/// Entity to persist, with the context its path depends on
#[derive(Debug)]
pub enum BackupRecord<'a> {
    /// Issue detail, `issues/<ISSUE-KEY>.json`
    Issue {
        /// Owning project
        project_key: &'a str,
        /// Issue snapshot
        issue: &'a Issue,
    },
    /// Wiki page, `wiki/<stem>.json` plus `wiki/<stem>.txt`
    WikiPage {
        /// Owning project
        project_key: &'a str,
        /// Sanitized, de-duplicated file stem
        stem: &'a str,
        /// Page snapshot
        page: &'a WikiPage,
        /// Markup dialect for the plain-text rendering
        formatting: TextFormatting,
    },
    /// Attachment bytes under the owner's attachment directory
    Attachment {
        /// Owning project
        project_key: &'a str,
        /// Attachment reference
        attachment: &'a AttachmentRef,
        /// Owner directory name (issue key, or the page's wiki stem)
        owner_dir: &'a str,
        /// Sanitized, de-duplicated file name
        file_name: &'a str,
        /// Content
        bytes: &'a [u8],
    },
    /// Shared-file directory
    Directory {
        /// Owning project
        project_key: &'a str,
        /// Directory node
        node: &'a FileNode,
        /// Path under `files/`, from [`local_tree_paths`]
        local_path: &'a str,
    },
    /// Shared-file content
    File {
        /// Owning project
        project_key: &'a str,
        /// File node
        node: &'a FileNode,
        /// Path under `files/`, from [`local_tree_paths`]
        local_path: &'a str,
        /// Content
        bytes: &'a [u8],
    },
}

/// One line of `wiki_index.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiIndexEntry {
    /// Page id
    pub id: String,
    /// Page name as shown remotely
    pub name: String,
    /// File stem of the page's files
    pub file_stem: String,
    /// Last update, RFC 3339
    pub updated: Option<String>,
}

/// Writes backup entities under one output directory
#[derive(Debug, Clone)]
pub struct BackupWriter {
    paths: BackupPathBuilder,
}

impl BackupWriter {
    /// Writer rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            paths: BackupPathBuilder::new(base_dir),
        }
    }

    /// Path layout in use
    pub fn paths(&self) -> &BackupPathBuilder {
        &self.paths
    }

    /// Persist `record` and return the primary path written
    ///
    /// Parent directories are created as needed; existing files are replaced.
    pub fn write(&self, record: BackupRecord<'_>) -> OutputResult<PathBuf> {
        match record {
            BackupRecord::Issue { project_key, issue } => {
                let path = self.paths.issue_file(project_key, &issue.key);
                atomic_write(&path, &to_pretty_json(issue)?)?;
                debug!(project = project_key, issue = %issue.key, "Wrote issue");
                Ok(path)
            }
            BackupRecord::WikiPage {
                project_key,
                stem,
                page,
                formatting,
            } => {
                let record_path = self.paths.wiki_record(project_key, stem);
                atomic_write(&record_path, &to_pretty_json(page)?)?;
                let text = render_plain_text(&page.content, formatting);
                atomic_write(&self.paths.wiki_text(project_key, stem), text.as_bytes())?;
                debug!(project = project_key, page = %page.name, stem, "Wrote wiki page");
                Ok(record_path)
            }
            BackupRecord::Attachment {
                project_key,
                attachment,
                owner_dir,
                file_name,
                bytes,
            } => {
                let dir = match &attachment.owner {
                    AttachmentOwner::Issue { .. } => {
                        self.paths.issue_attachment_dir(project_key, owner_dir)
                    }
                    AttachmentOwner::Wiki { .. } => {
                        self.paths.wiki_attachment_dir(project_key, owner_dir)
                    }
                };
                let path = dir.join(file_name);
                atomic_write(&path, bytes)?;
                Ok(path)
            }
            BackupRecord::Directory {
                project_key,
                node,
                local_path,
            } => {
                let path = self.paths.file_node(project_key, local_path);
                std::fs::create_dir_all(&path).map_err(|e| {
                    OutputError::IoError(format!(
                        "Failed to create directory {}: {e}",
                        path.display()
                    ))
                })?;
                debug!(project = project_key, remote = %node.path, local = local_path, "Created directory");
                Ok(path)
            }
            BackupRecord::File {
                project_key,
                node,
                local_path,
                bytes,
            } => {
                let path = self.paths.file_node(project_key, local_path);
                atomic_write(&path, bytes)?;
                debug!(project = project_key, remote = %node.path, local = local_path, "Wrote file");
                Ok(path)
            }
        }
    }

    /// Write the issue summary table of a project
    pub fn write_issue_summary(
        &self,
        project_key: &str,
        summary: &IssueSummary,
    ) -> OutputResult<PathBuf> {
        let path = self.paths.issue_summary(project_key);
        summary.write(&path)?;
        Ok(path)
    }

    /// Write the wiki index of a project
    pub fn write_wiki_index(
        &self,
        project_key: &str,
        entries: &[WikiIndexEntry],
    ) -> OutputResult<PathBuf> {
        let path = self.paths.wiki_index(project_key);
        atomic_write(&path, &to_pretty_json(entries)?)?;
        Ok(path)
    }

    /// Write the run report at the output root
    pub fn write_report<T: Serialize>(&self, report: &T) -> OutputResult<PathBuf> {
        let path = self.paths.report();
        atomic_write(&path, &to_pretty_json(report)?)?;
        Ok(path)
    }

    /// Create a category directory even when the category produced nothing
    pub fn ensure_dir(&self, path: &Path) -> OutputResult<()> {
        std::fs::create_dir_all(path).map_err(|e| {
            OutputError::IoError(format!("Failed to create directory {}: {e}", path.display()))
        })
    }
}

/// Order a file-tree listing so every directory precedes its contents
///
/// Directories come first, shallowest first; ancestors that were never listed
/// are synthesized. Files keep their listing order. Duplicate paths collapse
/// to the first occurrence.
pub fn order_tree(nodes: &[FileNode]) -> Vec<FileNode> {
    let mut seen = BTreeSet::new();
    let mut directories: Vec<FileNode> = Vec::new();
    let mut files: Vec<FileNode> = Vec::new();

    for node in nodes {
        if !seen.insert(node.path.clone()) {
            continue;
        }
        match node.kind {
            NodeKind::Directory => directories.push(node.clone()),
            NodeKind::File => files.push(node.clone()),
        }
    }

    let ancestors: BTreeSet<String> = nodes
        .iter()
        .flat_map(|node| {
            let segments: Vec<&str> = node.path.split('/').collect();
            (1..segments.len())
                .map(|n| segments[..n].join("/"))
                .collect::<Vec<_>>()
        })
        .collect();
    for path in ancestors {
        if seen.insert(path.clone()) {
            directories.push(FileNode {
                path,
                kind: NodeKind::Directory,
                remote_id: None,
                size: None,
                source: RecordSource::Api,
            });
        }
    }

    directories.sort_by(|a, b| a.depth().cmp(&b.depth()).then_with(|| a.path.cmp(&b.path)));
    directories.extend(files);
    directories
}

/// Sanitize and de-duplicate file names within one directory, in order
pub fn unique_names<'a>(
    names: impl IntoIterator<Item = (&'a str, &'a str)>,
    kind: &str,
) -> Vec<String> {
    let mut namer = UniqueNamer::new();
    names
        .into_iter()
        .map(|(name, id)| namer.claim(&sanitize_or(name, kind, id)))
        .collect()
}

/// Wiki file stems in listing order; never the index's own stem
pub fn wiki_stems<'a>(pages: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<String> {
    let mut namer = UniqueNamer::new();
    namer.reserve(WIKI_INDEX_STEM);
    pages
        .into_iter()
        .map(|(name, id)| namer.claim(&sanitize_or(name, "wiki", id)))
        .collect()
}

/// Local paths for an [`order_tree`] listing, index-aligned with `nodes`
///
/// Segments are sanitized, and names that only collide after sanitizing get
/// suffixes within their directory. Parents must precede their children.
pub fn local_tree_paths(nodes: &[FileNode]) -> Vec<String> {
    let mut directories: HashMap<&str, String> = HashMap::new();
    let mut namers: HashMap<String, UniqueNamer> = HashMap::new();

    nodes
        .iter()
        .map(|node| {
            let (parent, name) = node.path.rsplit_once('/').unwrap_or(("", node.path.as_str()));
            let local_parent = directories
                .get(parent)
                .cloned()
                .unwrap_or_else(|| sanitize_tree_path(parent));
            let name = namers
                .entry(local_parent.clone())
                .or_default()
                .claim(&sanitize_or(name, "node", "unnamed"));
            let local = if local_parent.is_empty() {
                name
            } else {
                format!("{local_parent}/{name}")
            };
            if node.kind == NodeKind::Directory {
                directories.insert(node.path.as_str(), local.clone());
            }
            local
        })
        .collect()
}

fn sanitize_tree_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| sanitize_or(segment, "node", "unnamed"))
        .collect::<Vec<_>>()
        .join("/")
}
