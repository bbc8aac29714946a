//! In-memory fakes of the remote accessors shared by integration tests

use async_trait::async_trait;
use backlog_backup::client::{ApiSource, FetcherError, FetcherResult, ScrapeSource};
use backlog_backup::repository::{RepositoryFetch, RepositoryOutcome};
use backlog_backup::{AttachmentRef, Credentials, RemoteId, RepositoryKind, RepositoryRef};
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Scripted [`ApiSource`]
///
/// Details missing from the maps answer `NotFound`; directories missing from
/// `file_tree` answer a 400 so the browser fallback kicks in.
#[derive(Default)]
pub struct FakeApi {
    pub projects: Vec<Value>,
    pub issues: Vec<Value>,
    pub issue_details: HashMap<String, Value>,
    pub comments: HashMap<String, Vec<Value>>,
    pub wiki_pages: Vec<Value>,
    pub wiki_details: HashMap<String, Value>,
    pub file_tree: HashMap<String, Vec<Value>>,
    pub shared_files: HashMap<String, Bytes>,
    pub attachments: HashMap<String, Bytes>,
    pub repositories: HashMap<RepositoryKind, Vec<Value>>,
    pub fail_all_with: Option<FetcherError>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeApi {
    /// One active project `PROJ` (id 1) and nothing else
    pub fn with_project() -> Self {
        Self {
            projects: vec![json!({"id": 1, "projectKey": "PROJ", "name": "Project", "archived": false})],
            ..Self::default()
        }
    }

    /// Add an issue whose listing entry doubles as its detail
    pub fn add_issue(&mut self, issue: Value) {
        let id = issue["id"].to_string();
        self.issue_details.insert(id, issue.clone());
        self.issues.push(issue);
    }

    /// Add a wiki page whose listing entry doubles as its detail
    pub fn add_wiki_page(&mut self, page: Value) {
        let id = page["id"].to_string();
        self.wiki_details.insert(id, page.clone());
        self.wiki_pages.push(page);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn enter(&self, call: String) -> FetcherResult<()> {
        self.calls.lock().unwrap().push(call);
        match &self.fail_all_with {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ApiSource for FakeApi {
    async fn list_projects(&self) -> FetcherResult<Vec<Value>> {
        self.enter("list_projects".into())?;
        Ok(self.projects.clone())
    }

    async fn get_project(&self, project_key: &str) -> FetcherResult<Value> {
        self.enter(format!("get_project {project_key}"))?;
        self.projects
            .iter()
            .find(|p| p["projectKey"] == project_key)
            .cloned()
            .ok_or_else(|| FetcherError::NotFound(project_key.to_string()))
    }

    async fn list_issues(
        &self,
        _project_id: &RemoteId,
        offset: usize,
        count: usize,
    ) -> FetcherResult<Vec<Value>> {
        self.enter(format!("list_issues {offset}"))?;
        Ok(self.issues.iter().skip(offset).take(count).cloned().collect())
    }

    async fn get_issue(&self, issue_id: &RemoteId) -> FetcherResult<Value> {
        self.enter(format!("get_issue {issue_id}"))?;
        self.issue_details
            .get(issue_id.as_str())
            .cloned()
            .ok_or_else(|| FetcherError::NotFound(format!("issue {issue_id}")))
    }

    async fn list_issue_comments(
        &self,
        issue_id: &RemoteId,
        after: Option<&RemoteId>,
        count: usize,
    ) -> FetcherResult<Vec<Value>> {
        self.enter(format!("list_issue_comments {issue_id}"))?;
        let after: u64 = after.map(|a| a.as_str().parse().unwrap()).unwrap_or(0);
        Ok(self
            .comments
            .get(issue_id.as_str())
            .map(|all| {
                all.iter()
                    .filter(|c| c["id"].as_u64().unwrap() > after)
                    .take(count)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_wiki_pages(&self, _project_key: &str) -> FetcherResult<Vec<Value>> {
        self.enter("list_wiki_pages".into())?;
        Ok(self.wiki_pages.clone())
    }

    async fn get_wiki_page(&self, page_id: &RemoteId) -> FetcherResult<Value> {
        self.enter(format!("get_wiki_page {page_id}"))?;
        self.wiki_details
            .get(page_id.as_str())
            .cloned()
            .ok_or_else(|| FetcherError::NotFound(format!("wiki {page_id}")))
    }

    async fn list_file_tree(
        &self,
        _project_key: &str,
        path: &str,
        offset: usize,
        count: usize,
    ) -> FetcherResult<Vec<Value>> {
        self.enter(format!("list_file_tree {path}"))?;
        match self.file_tree.get(path) {
            Some(entries) => Ok(entries.iter().skip(offset).take(count).cloned().collect()),
            None => Err(FetcherError::Http {
                status: 400,
                message: format!("cannot list {path}"),
            }),
        }
    }

    async fn download_attachment(&self, attachment: &AttachmentRef) -> FetcherResult<Bytes> {
        self.enter(format!("download_attachment {}", attachment.id))?;
        self.attachments
            .get(attachment.id.as_str())
            .cloned()
            .ok_or_else(|| FetcherError::NotFound(format!("attachment {}", attachment.id)))
    }

    async fn download_shared_file(
        &self,
        _project_key: &str,
        file_id: &RemoteId,
    ) -> FetcherResult<Bytes> {
        self.enter(format!("download_shared_file {file_id}"))?;
        self.shared_files
            .get(file_id.as_str())
            .cloned()
            .ok_or_else(|| FetcherError::NotFound(format!("file {file_id}")))
    }

    async fn list_repositories(
        &self,
        _project_key: &str,
        kind: RepositoryKind,
    ) -> FetcherResult<Vec<Value>> {
        self.enter(format!("list_repositories {kind}"))?;
        Ok(self.repositories.get(&kind).cloned().unwrap_or_default())
    }
}

/// Scripted [`ScrapeSource`]
#[derive(Default)]
pub struct FakeScrape {
    pub projects: Vec<Value>,
    pub file_tree: HashMap<String, Vec<Value>>,
    pub files: HashMap<String, Bytes>,
    pub fail_with: Option<FetcherError>,
}

#[async_trait]
impl ScrapeSource for FakeScrape {
    async fn list_space_projects(&self) -> FetcherResult<Vec<Value>> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        Ok(self.projects.clone())
    }

    async fn list_file_tree(&self, _project_key: &str, path: &str) -> FetcherResult<Vec<Value>> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        self.file_tree
            .get(path)
            .cloned()
            .ok_or_else(|| FetcherError::ScrapeExtractionFailed(format!("no tree for {path}")))
    }

    async fn download_file(&self, _project_key: &str, path: &str) -> FetcherResult<Bytes> {
        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| FetcherError::NotFound(path.to_string()))
    }
}

/// Records fetches and answers with a fixed outcome per repository name
#[derive(Default)]
pub struct FakeRepositories {
    pub outcomes: HashMap<String, RepositoryOutcome>,
    pub fetched: Mutex<Vec<(String, Option<Credentials>, PathBuf)>>,
}

#[async_trait]
impl RepositoryFetch for FakeRepositories {
    async fn fetch(
        &self,
        repository: &RepositoryRef,
        credentials: Option<&Credentials>,
        dest_dir: &Path,
    ) -> RepositoryOutcome {
        self.fetched.lock().unwrap().push((
            repository.name.clone(),
            credentials.cloned(),
            dest_dir.to_path_buf(),
        ));
        self.outcomes
            .get(&repository.name)
            .cloned()
            .unwrap_or(RepositoryOutcome::Success { refreshed: false })
    }
}

/// Every regular file under `root`, keyed by relative path
pub fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                out.insert(relative, std::fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}
