//! Backlog REST API accessor

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backup::config::{RetryPolicy, REQUEST_TIMEOUT};
use crate::backup::rate_limit::RateLimiter;
use crate::client::http::BacklogHttpClient;
use crate::client::{ApiSource, FetcherError, FetcherResult};
use crate::shutdown::SharedShutdown;
use crate::space::SpaceDomain;
use crate::{AttachmentOwner, AttachmentRef, RemoteId, RepositoryKind};

/// Typed accessor over `https://<domain>/api/v2`
pub struct ApiClient {
    http: BacklogHttpClient,
}

impl ApiClient {
    /// Create a client for `domain` authenticated by `api_key`
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        domain: &SpaceDomain,
        api_key: impl Into<String>,
        rate_limiter: Arc<RateLimiter>,
    ) -> FetcherResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("backlog-backup/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetcherError::TransientNetwork(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::from_http(BacklogHttpClient::new(
            client,
            domain.api_base_url(),
            api_key,
            rate_limiter,
        )))
    }

    /// Wrap an already configured HTTP client
    pub fn from_http(http: BacklogHttpClient) -> Self {
        Self { http }
    }

    /// Override retry bounds and delays
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.http = self.http.with_retry_policy(policy);
        self
    }

    /// Abort backoff sleeps when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.http = self.http.with_shutdown(shutdown);
        self
    }

    async fn fetch_json<T>(&self, endpoint: &str, params: &[(&str, String)]) -> FetcherResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let attempted = self.http.get_json(endpoint, params).await;
        if attempted.attempts > 1 {
            info!(endpoint, attempts = attempted.attempts, ok = attempted.outcome.is_ok(), "Request finished after retries");
        }
        attempted.into_result()
    }

    async fn fetch_bytes(&self, endpoint: &str) -> FetcherResult<Bytes> {
        let attempted = self.http.get_bytes(endpoint, &[]).await;
        if attempted.attempts > 1 {
            info!(endpoint, attempts = attempted.attempts, ok = attempted.outcome.is_ok(), "Download finished after retries");
        }
        attempted.into_result()
    }
}

#[async_trait]
impl ApiSource for ApiClient {
    async fn list_projects(&self) -> FetcherResult<Vec<Value>> {
        debug!("Listing projects");
        self.fetch_json("/projects", &[]).await
    }

    async fn get_project(&self, project_key: &str) -> FetcherResult<Value> {
        self.fetch_json(&format!("/projects/{}", encode_segment(project_key)), &[])
            .await
    }

    async fn list_issues(
        &self,
        project_id: &RemoteId,
        offset: usize,
        count: usize,
    ) -> FetcherResult<Vec<Value>> {
        let params = [
            ("projectId[]", project_id.to_string()),
            ("offset", offset.to_string()),
            ("count", count.to_string()),
            ("sort", "created".to_string()),
            ("order", "asc".to_string()),
        ];
        self.fetch_json("/issues", &params).await
    }

    async fn get_issue(&self, issue_id: &RemoteId) -> FetcherResult<Value> {
        self.fetch_json(&format!("/issues/{}", encode_segment(issue_id.as_str())), &[])
            .await
    }

    async fn list_issue_comments(
        &self,
        issue_id: &RemoteId,
        after: Option<&RemoteId>,
        count: usize,
    ) -> FetcherResult<Vec<Value>> {
        let mut params = vec![("count", count.to_string()), ("order", "asc".to_string())];
        if let Some(after) = after {
            params.push(("minId", after.to_string()));
        }
        let endpoint = format!("/issues/{}/comments", encode_segment(issue_id.as_str()));
        self.fetch_json(&endpoint, &params).await
    }

    async fn list_wiki_pages(&self, project_key: &str) -> FetcherResult<Vec<Value>> {
        self.fetch_json("/wikis", &[("projectIdOrKey", project_key.to_string())])
            .await
    }

    async fn get_wiki_page(&self, page_id: &RemoteId) -> FetcherResult<Value> {
        self.fetch_json(&format!("/wikis/{}", encode_segment(page_id.as_str())), &[])
            .await
    }

    async fn list_file_tree(
        &self,
        project_key: &str,
        path: &str,
        offset: usize,
        count: usize,
    ) -> FetcherResult<Vec<Value>> {
        let endpoint = format!(
            "/projects/{}/files/metadata/{}",
            encode_segment(project_key),
            encode_path(path)
        );
        let params = [
            ("offset", offset.to_string()),
            ("count", count.to_string()),
            ("order", "asc".to_string()),
        ];
        self.fetch_json(&endpoint, &params).await
    }

    async fn download_attachment(&self, attachment: &AttachmentRef) -> FetcherResult<Bytes> {
        let endpoint = match &attachment.owner {
            AttachmentOwner::Issue { id, .. } => format!(
                "/issues/{}/attachments/{}",
                encode_segment(id.as_str()),
                encode_segment(attachment.id.as_str())
            ),
            AttachmentOwner::Wiki { id, .. } => format!(
                "/wikis/{}/attachments/{}",
                encode_segment(id.as_str()),
                encode_segment(attachment.id.as_str())
            ),
        };
        self.fetch_bytes(&endpoint).await
    }

    async fn download_shared_file(
        &self,
        project_key: &str,
        file_id: &RemoteId,
    ) -> FetcherResult<Bytes> {
        let endpoint = format!(
            "/projects/{}/files/{}",
            encode_segment(project_key),
            encode_segment(file_id.as_str())
        );
        self.fetch_bytes(&endpoint).await
    }

    async fn list_repositories(
        &self,
        project_key: &str,
        kind: RepositoryKind,
    ) -> FetcherResult<Vec<Value>> {
        let endpoint = format!(
            "/projects/{}/{}/repositories",
            encode_segment(project_key),
            kind.program()
        );
        match self.fetch_json(&endpoint, &[]).await {
            // Spaces without Subversion answer 404 here.
            Err(FetcherError::NotFound(_)) if kind == RepositoryKind::Svn => {
                debug!(project_key, "No subversion repositories");
                Ok(Vec::new())
            }
            other => other,
        }
    }
}

/// Percent-encode a single path segment (RFC 3986 unreserved characters pass)
pub fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Percent-encode a `/`-separated relative path, dropping empty segments
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}
