//! Deterministic output paths
//!
//! Every path is a pure function of the project key and the entity's
//! identity, so reruns land on the same files:
//!
//! ```text
//! <output>/backup_report.json
//! <output>/<PROJECT>/issues/{issues_summary.csv, <ISSUE-KEY>.json, attachments/<ISSUE-KEY>/}
//! <output>/<PROJECT>/wiki/{wiki_index.json, <stem>.json, <stem>.txt, attachments/<stem>/}
//! <output>/<PROJECT>/files/<remote tree>
//! <output>/<PROJECT>/git/<repo>.git
//! <output>/<PROJECT>/svn/<repo>
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::{Category, RepositoryKind, RepositoryRef};

/// File stem of the wiki index; no page may claim it
pub const WIKI_INDEX_STEM: &str = "wiki_index";

/// Replace characters that are unsafe in file names
///
/// `/ \ : * ? " < > |` and control characters become `_`, `..` becomes `__`,
/// and leading or trailing dots and spaces are trimmed. May return an empty
/// string; see [`sanitize_or`].
pub fn sanitize_segment(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    replaced
        .replace("..", "__")
        .trim_matches(|c| c == '.' || c == ' ')
        .to_string()
}

/// [`sanitize_segment`], falling back to `<kind>_<id>` when nothing is left
pub fn sanitize_or(name: &str, kind: &str, id: &str) -> String {
    let sanitized = sanitize_segment(name);
    if sanitized.is_empty() {
        format!("{kind}_{}", sanitize_segment(id))
    } else {
        sanitized
    }
}

/// Hands out unique names within one directory
///
/// Repeats get `_2`, `_3`, ... before the extension. Comparison ignores case
/// so names stay distinct on case-insensitive filesystems. Names depend only
/// on claim order.
#[derive(Debug, Default)]
pub struct UniqueNamer {
    used: HashSet<String>,
}

impl UniqueNamer {
    /// Empty namer
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` as taken without handing it out
    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_lowercase());
    }

    /// Claim `name`, or the first free suffixed variant of it
    pub fn claim(&mut self, name: &str) -> String {
        if self.used.insert(name.to_lowercase()) {
            return name.to_string();
        }

        let (stem, ext) = split_extension(name);
        (2u32..)
            .map(|n| format!("{stem}_{n}{ext}"))
            .find(|candidate| self.used.insert(candidate.to_lowercase()))
            .unwrap_or_else(|| name.to_string())
    }
}

/// Split `report.tar.gz` into `("report.tar", ".gz")`; dotfiles have no extension
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(idx) => name.split_at(idx),
    }
}

/// Path builder for the backup layout
#[derive(Debug, Clone)]
pub struct BackupPathBuilder {
    root_dir: PathBuf,
}

impl BackupPathBuilder {
    /// Builder rooted at the output directory
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Output directory
    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// `<output>/backup_report.json`
    pub fn report(&self) -> PathBuf {
        self.root_dir.join("backup_report.json")
    }

    /// `<output>/<PROJECT>`
    pub fn project_dir(&self, project_key: &str) -> PathBuf {
        self.root_dir
            .join(sanitize_or(project_key, "project", project_key))
    }

    /// `<output>/<PROJECT>/<category>`
    pub fn category_dir(&self, project_key: &str, category: Category) -> PathBuf {
        self.project_dir(project_key).join(category.dir_name())
    }

    /// Issue detail file
    pub fn issue_file(&self, project_key: &str, issue_key: &str) -> PathBuf {
        self.category_dir(project_key, Category::Issues)
            .join(format!("{}.json", sanitize_or(issue_key, "issue", issue_key)))
    }

    /// Issue summary table
    pub fn issue_summary(&self, project_key: &str) -> PathBuf {
        self.category_dir(project_key, Category::Issues)
            .join("issues_summary.csv")
    }

    /// Attachment directory of one issue
    pub fn issue_attachment_dir(&self, project_key: &str, issue_key: &str) -> PathBuf {
        self.category_dir(project_key, Category::Issues)
            .join("attachments")
            .join(sanitize_or(issue_key, "issue", issue_key))
    }

    /// Wiki index
    pub fn wiki_index(&self, project_key: &str) -> PathBuf {
        self.category_dir(project_key, Category::Wiki)
            .join(format!("{WIKI_INDEX_STEM}.json"))
    }

    /// Structured wiki record for an already sanitized stem
    pub fn wiki_record(&self, project_key: &str, stem: &str) -> PathBuf {
        self.category_dir(project_key, Category::Wiki)
            .join(format!("{stem}.json"))
    }

    /// Plain-text wiki rendering for an already sanitized stem
    pub fn wiki_text(&self, project_key: &str, stem: &str) -> PathBuf {
        self.category_dir(project_key, Category::Wiki)
            .join(format!("{stem}.txt"))
    }

    /// Attachment directory of one wiki page
    pub fn wiki_attachment_dir(&self, project_key: &str, stem: &str) -> PathBuf {
        self.category_dir(project_key, Category::Wiki)
            .join("attachments")
            .join(stem)
    }

    /// Location of a shared-file node from its local path; each segment is sanitized
    pub fn file_node(&self, project_key: &str, relative_path: &str) -> PathBuf {
        relative_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(
                self.category_dir(project_key, Category::Files),
                |path, segment| path.join(sanitize_or(segment, "node", "unnamed")),
            )
    }

    /// Clone or checkout directory of a repository
    pub fn repository_dir(&self, project_key: &str, repository: &RepositoryRef) -> PathBuf {
        let name = sanitize_or(&repository.name, "repository", "unnamed");
        match repository.kind {
            RepositoryKind::Git => self
                .category_dir(project_key, Category::Git)
                .join(format!("{name}.git")),
            RepositoryKind::Svn => self.category_dir(project_key, Category::Svn).join(name),
        }
    }
}
