//! # Backlog Backup Library
//!
//! Exports the complete content of a Backlog space (issues, wiki pages, shared
//! files, git and subversion repositories) into a stable on-disk snapshot that
//! can be archived offline or used as a migration source.
//!
//! ## Features
//!
//! - **API first, browser fallback**: issues and wiki always come from the REST
//!   API; file trees fall back to a headless browser for directories the API
//!   cannot resolve; space-wide project enumeration is scraped
//! - **Global request cadence**: one [`backup::RateLimiter`] shared by every
//!   outbound call, API or browser
//! - **Bounded retries**: explicit attempt accounting for rate-limit and
//!   transient failures, no retry for authentication or not-found responses
//! - **Deterministic layout**: rerunning against an unchanged space produces
//!   byte-identical files, written atomically
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use backlog_backup::backup::{BackupOptions, BackupOrchestrator, ProjectSelection, RateLimiter};
//! use backlog_backup::client::ApiClient;
//! use backlog_backup::repository::RepositoryFetcher;
//! use backlog_backup::space::SpaceDomain;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let domain = SpaceDomain::parse("example.backlog.com")?;
//! let limiter = Arc::new(RateLimiter::new());
//! let api = ApiClient::new(&domain, "api-key", limiter)?;
//!
//! let options = BackupOptions::new("./backup", ProjectSelection::Single("PROJ".into()));
//! let orchestrator = BackupOrchestrator::new(
//!     domain,
//!     Arc::new(api),
//!     Arc::new(RepositoryFetcher::new()),
//!     options,
//! );
//! let report = orchestrator.run().await?;
//! println!("{} categories succeeded", report.succeeded_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`space`] - Space domain parsing and derived URLs
//! - [`client`] - API and browser accessors with retry and pagination
//! - [`mapper`] - Remote records to the entity model defined here
//! - [`output`] - Deterministic paths, atomic writes, plain-text rendering
//! - [`repository`] - git/svn tool invocation
//! - [`backup`] - Rate limiting, per-category state machine, orchestration

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Backup orchestration and rate limiting
pub mod backup;

/// CLI command implementations
pub mod cli;

/// API and browser accessors
pub mod client;

/// Remote record to entity mapping
pub mod mapper;

/// Metrics helpers
pub mod metrics;

/// Output layout and writers
pub mod output;

/// External VCS tool invocation
pub mod repository;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Space domain parsing
pub mod space;

pub use space::SpaceDomain;

/// Identifier of a remote entity, normalized to its decimal/string form.
///
/// The API reports numeric ids while scraped pages expose them as attribute
/// strings; both end up as the same `RemoteId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    /// Create an identifier from any string form, trimming whitespace
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_string())
    }

    /// Normalize a JSON scalar into an identifier
    ///
    /// Numbers render in decimal, strings are trimmed, anything else is rejected.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self(n.to_string())),
            Value::String(s) if !s.trim().is_empty() => Some(Self::new(s)),
            _ => None,
        }
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for RemoteId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Markup dialect a project uses for issue descriptions and wiki content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextFormatting {
    /// Markdown (`# heading`, `**bold**`)
    #[default]
    Markdown,
    /// Backlog notation (`* heading`, `''bold''`)
    Backlog,
}

/// Project metadata, discovered once per run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Internal numeric id
    pub id: RemoteId,
    /// Project key (e.g. "PROJ")
    pub key: String,
    /// Display name
    pub name: String,
    /// Whether the project is archived
    pub archived: bool,
    /// Markup dialect used by the project's wiki
    pub text_formatting: TextFormatting,
}

/// Issue comment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Comment id
    pub id: RemoteId,
    /// Author display name
    pub author: Option<String>,
    /// Comment body; empty for change-only comments
    pub content: String,
    /// Creation time
    pub created: Option<DateTime<Utc>>,
}

/// Single field change recorded on an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    /// Comment that carried the change
    pub comment_id: RemoteId,
    /// Changed field name
    pub field: String,
    /// Value before the change
    pub original_value: Option<String>,
    /// Value after the change
    pub new_value: Option<String>,
    /// When the change was made
    pub changed_at: Option<DateTime<Utc>>,
}

/// Issue snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Issue id
    pub id: RemoteId,
    /// Issue key (e.g. "PROJ-12")
    pub key: String,
    /// Title
    pub summary: String,
    /// Description body
    pub description: String,
    /// Status name
    pub status: Option<String>,
    /// Assignee display name
    pub assignee: Option<String>,
    /// Creation time
    pub created: Option<DateTime<Utc>>,
    /// Last update time
    pub updated: Option<DateTime<Utc>>,
    /// Every other remote attribute, key-sorted
    pub fields: BTreeMap<String, Value>,
    /// Comments in remote order
    pub comments: Vec<Comment>,
    /// Attachment references in remote order
    pub attachments: Vec<AttachmentRef>,
    /// Field changes, flattened from comments in remote order
    pub change_history: Vec<ChangeLogEntry>,
}

/// Wiki page snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiPage {
    /// Page id
    pub id: RemoteId,
    /// Page name, unique within its project
    pub name: String,
    /// Raw page content
    pub content: String,
    /// Attachment references in remote order
    pub attachments: Vec<AttachmentRef>,
    /// Tag names
    pub tags: Vec<String>,
    /// Author display name
    pub created_by: Option<String>,
    /// Last editor display name
    pub updated_by: Option<String>,
    /// Last update time
    pub updated: Option<DateTime<Utc>>,
}

/// Kind of a file-tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Directory
    Directory,
    /// Regular file
    File,
}

/// Which accessor produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    /// REST API
    Api,
    /// Browser scrape
    Scrape,
}

/// Node of a project's shared-file tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    /// Relative `/`-separated path without leading slash (e.g. "docs/readme.txt")
    pub path: String,
    /// Directory or file
    pub kind: NodeKind,
    /// Remote id needed to download a file's bytes
    pub remote_id: Option<RemoteId>,
    /// Size in bytes, when reported
    pub size: Option<u64>,
    /// Accessor that listed this node
    pub source: RecordSource,
}

impl FileNode {
    /// Parent directory path, `None` for top-level nodes
    pub fn parent(&self) -> Option<&str> {
        self.path.rsplit_once('/').map(|(parent, _)| parent)
    }

    /// Number of path segments
    pub fn depth(&self) -> usize {
        self.path.split('/').count()
    }
}

/// Entity that owns an attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AttachmentOwner {
    /// Attached to an issue
    Issue {
        /// Issue id
        id: RemoteId,
        /// Issue key
        key: String,
    },
    /// Attached to a wiki page
    Wiki {
        /// Page id
        id: RemoteId,
        /// Page name
        name: String,
    },
}

/// Reference to a downloadable attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    /// Owning issue or page
    pub owner: AttachmentOwner,
    /// Attachment id
    pub id: RemoteId,
    /// File name as uploaded
    pub file_name: String,
    /// Size in bytes, when reported
    pub size: Option<u64>,
}

/// Version-control system of a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    /// Git, cloned as a mirror
    Git,
    /// Subversion, checked out
    Svn,
}

impl RepositoryKind {
    /// Executable name for this kind
    pub fn program(&self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Svn => "svn",
        }
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Username/password pair handed to an external tool as an opaque value
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password or access token
    pub password: String,
}

impl Credentials {
    /// Create a credential pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Repository to clone or check out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    /// Repository name, used as directory name
    pub name: String,
    /// git or svn
    pub kind: RepositoryKind,
    /// Remote URL
    pub url: String,
    /// Credentials to inject, if any
    pub credentials: Option<Credentials>,
}

/// Independently runnable backup pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Issues, comments and attachments
    Issues,
    /// Wiki pages and attachments
    Wiki,
    /// Shared-file tree
    Files,
    /// Git repositories
    Git,
    /// Subversion repositories
    Svn,
}

impl Category {
    /// Every category, in pipeline order
    pub const ALL: [Category; 5] = [
        Category::Issues,
        Category::Wiki,
        Category::Files,
        Category::Git,
        Category::Svn,
    ];

    /// Directory name under the project directory
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Issues => "issues",
            Self::Wiki => "wiki",
            Self::Files => "files",
            Self::Git => "git",
            Self::Svn => "svn",
        }
    }

    /// Whether this category is served by the repository fetcher
    pub fn is_repository(&self) -> bool {
        matches!(self, Self::Git | Self::Svn)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "issues" => Ok(Self::Issues),
            "wiki" => Ok(Self::Wiki),
            "files" => Ok(Self::Files),
            "git" => Ok(Self::Git),
            "svn" => Ok(Self::Svn),
            other => Err(format!(
                "Invalid category: {other}. Valid options: issues, wiki, files, git, svn"
            )),
        }
    }
}

/// Set of requested categories; an empty request means all of them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySet(BTreeSet<Category>);

impl CategorySet {
    /// All five categories
    pub fn all() -> Self {
        Self(Category::ALL.into_iter().collect())
    }

    /// Build from an explicit list, falling back to all categories when empty
    pub fn from_requested(categories: impl IntoIterator<Item = Category>) -> Self {
        let set: BTreeSet<Category> = categories.into_iter().collect();
        if set.is_empty() {
            Self::all()
        } else {
            Self(set)
        }
    }

    /// Whether `category` was requested
    pub fn contains(&self, category: Category) -> bool {
        self.0.contains(&category)
    }

    /// Requested categories in pipeline order
    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        self.0.iter().copied()
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self::all()
    }
}

/// Predicate over a project's archive status, applied after discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFilter {
    /// Keep every project
    #[default]
    All,
    /// Keep archived projects only
    ArchivedOnly,
    /// Keep active projects only
    NonArchivedOnly,
}

impl ArchiveFilter {
    /// Whether `project` passes the filter
    pub fn matches(&self, project: &Project) -> bool {
        match self {
            Self::All => true,
            Self::ArchivedOnly => project.archived,
            Self::NonArchivedOnly => !project.archived,
        }
    }
}

impl FromStr for ArchiveFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "archived-only" => Ok(Self::ArchivedOnly),
            "non-archived-only" => Ok(Self::NonArchivedOnly),
            other => Err(format!(
                "Invalid archive filter: {other}. Valid options: all, archived-only, non-archived-only"
            )),
        }
    }
}
