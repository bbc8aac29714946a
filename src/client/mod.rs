//! Remote accessors
//!
//! Two narrow capability interfaces sit between the orchestrator and the
//! network:
//!
//! - [`ApiSource`] - the authenticated REST API ([`api::ApiClient`])
//! - [`ScrapeSource`] - the browser fallback ([`scrape::ScrapeClient`])
//!
//! Both return raw records ([`serde_json::Value`]) that the
//! [`crate::mapper::EntityMapper`] turns into entities, so neither the
//! orchestrator nor its tests depend on HTTP or browser specifics.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::backup::config::PAGE_SIZE;
use crate::{AttachmentRef, RemoteId, RepositoryKind};

pub mod api;
pub mod http;
pub mod pagination;
pub mod retry_formatter;
pub mod scrape;

pub use api::ApiClient;
pub use http::{Attempted, BacklogHttpClient};
pub use scrape::{ChromiumSession, PageDriver, ScrapeClient};

/// Fetcher errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetcherError {
    /// Timeout, connection failure or 5xx response that outlived its retries
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// 429 responses outlived the retry bound
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded {
        /// Attempts made, including the first
        attempts: u32,
    },

    /// 401/403, or a rejected web login; credentials are presumed invalid everywhere
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The item does not exist (404)
    #[error("not found: {0}")]
    NotFound(String),

    /// Other non-retryable HTTP error
    #[error("HTTP error {status}: {message}")]
    Http {
        /// Response status
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Response body could not be decoded
    #[error("parse error: {0}")]
    Parse(String),

    /// The page rendered without the expected structure
    #[error("scrape extraction failed: {0}")]
    ScrapeExtractionFailed(String),

    /// Web session expired and re-authentication did not restore it
    #[error("web session expired: {0}")]
    SessionExpired(String),

    /// The web login form rejected the configured user
    #[error("web login rejected: {0}")]
    LoginRejected(String),

    /// Browser could not be launched or driven
    #[error("browser error: {0}")]
    Browser(String),

    /// Run cancellation interrupted the request
    #[error("cancelled")]
    Cancelled,
}

impl FetcherError {
    /// Failure that invalidates every subsequent call of the run
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Failure that ends the current category but not the run
    pub fn is_category_fatal(&self) -> bool {
        matches!(
            self,
            Self::SessionExpired(_) | Self::LoginRejected(_) | Self::Browser(_) | Self::Cancelled
        )
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Typed accessor over the Backlog REST API
///
/// Page-level methods map one-to-one onto endpoints; the `*_all` helpers
/// concatenate pages in remote order.
#[async_trait]
pub trait ApiSource: Send + Sync {
    /// Projects visible to the API key
    async fn list_projects(&self) -> FetcherResult<Vec<Value>>;

    /// Single project by key
    async fn get_project(&self, project_key: &str) -> FetcherResult<Value>;

    /// One page of a project's issues, oldest first
    async fn list_issues(
        &self,
        project_id: &RemoteId,
        offset: usize,
        count: usize,
    ) -> FetcherResult<Vec<Value>>;

    /// Issue detail
    async fn get_issue(&self, issue_id: &RemoteId) -> FetcherResult<Value>;

    /// One page of an issue's comments starting after the `after` cursor, ascending
    async fn list_issue_comments(
        &self,
        issue_id: &RemoteId,
        after: Option<&RemoteId>,
        count: usize,
    ) -> FetcherResult<Vec<Value>>;

    /// Wiki pages of a project (single page listing)
    async fn list_wiki_pages(&self, project_key: &str) -> FetcherResult<Vec<Value>>;

    /// Wiki page detail
    async fn get_wiki_page(&self, page_id: &RemoteId) -> FetcherResult<Value>;

    /// One page of a shared-file directory listing
    async fn list_file_tree(
        &self,
        project_key: &str,
        path: &str,
        offset: usize,
        count: usize,
    ) -> FetcherResult<Vec<Value>>;

    /// Attachment bytes of an issue or wiki page
    async fn download_attachment(&self, attachment: &AttachmentRef) -> FetcherResult<Bytes>;

    /// Shared-file bytes
    async fn download_shared_file(
        &self,
        project_key: &str,
        file_id: &RemoteId,
    ) -> FetcherResult<Bytes>;

    /// Git or svn repositories of a project
    async fn list_repositories(
        &self,
        project_key: &str,
        kind: RepositoryKind,
    ) -> FetcherResult<Vec<Value>>;

    /// Every issue of a project
    async fn list_all_issues(&self, project_id: &RemoteId) -> FetcherResult<Vec<Value>> {
        pagination::paginate_offset(PAGE_SIZE, |offset, count| {
            self.list_issues(project_id, offset, count)
        })
        .await
    }

    /// Every comment of an issue
    ///
    /// Some spaces treat `minId` as inclusive and echo the cursor comment at the
    /// head of the next page; repeated ids are dropped.
    async fn list_all_issue_comments(&self, issue_id: &RemoteId) -> FetcherResult<Vec<Value>> {
        let comments = pagination::paginate_cursor(
            PAGE_SIZE,
            |comment: &Value| RemoteId::from_json(&comment["id"]),
            |after: Option<RemoteId>, count| async move {
                self.list_issue_comments(issue_id, after.as_ref(), count).await
            },
        )
        .await?;
        let mut seen = std::collections::HashSet::new();
        Ok(comments
            .into_iter()
            .filter(|c| match RemoteId::from_json(&c["id"]) {
                Some(id) => seen.insert(id),
                None => true,
            })
            .collect())
    }

    /// Every entry of one shared-file directory
    async fn list_all_file_tree(&self, project_key: &str, path: &str) -> FetcherResult<Vec<Value>> {
        pagination::paginate_offset(PAGE_SIZE, |offset, count| {
            self.list_file_tree(project_key, path, offset, count)
        })
        .await
    }
}

/// Browser-backed accessor for data the API does not expose
#[async_trait]
pub trait ScrapeSource: Send + Sync {
    /// Every project of the space, including ones the API key cannot enumerate
    async fn list_space_projects(&self) -> FetcherResult<Vec<Value>>;

    /// Entries of one shared-file directory
    async fn list_file_tree(&self, project_key: &str, path: &str) -> FetcherResult<Vec<Value>>;

    /// Shared-file bytes by path, using the web session
    async fn download_file(&self, project_key: &str, path: &str) -> FetcherResult<Bytes>;
}
