//! Run driver: project discovery, category pipelines and item dispatch

use chrono::SecondsFormat;
use futures_util::future;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::config::{DEFAULT_ITEM_CONCURRENCY, MAX_ITEM_CONCURRENCY};
use super::job::{CategoryJob, CategoryState};
use super::progress::{NoProgress, ProgressSink};
use super::report::{CategoryReport, ItemFailure, ProjectReport, RunReport};
use super::BackupError;
use crate::client::{ApiSource, FetcherError, ScrapeSource};
use crate::mapper::{EntityMapper, MapError};
use crate::output::csv::{IssueSummary, IssueSummaryRow};
use crate::output::{
    local_tree_paths, order_tree, unique_names, wiki_stems, BackupRecord, BackupWriter, OutputError,
    WikiIndexEntry,
};
use crate::repository::{RepositoryFetch, RepositoryOutcome};
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};
use crate::{
    ArchiveFilter, AttachmentRef, Category, CategorySet, Credentials, FileNode, NodeKind, Project,
    RecordSource, RemoteId, RepositoryKind, SpaceDomain,
};

/// Which projects a run covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectSelection {
    /// One project by key
    Single(String),
    /// Every project the API key can see
    AllAccessible,
    /// Every project of the space, enumerated through the browser
    AllSpace,
}

/// Options of one backup run
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Output root
    pub output_dir: PathBuf,
    /// Projects to back up
    pub selection: ProjectSelection,
    /// Categories to run
    pub categories: CategorySet,
    /// Concurrent item fetches within a category
    pub concurrency: usize,
    /// Archive predicate applied after discovery
    pub archive_filter: ArchiveFilter,
    /// Credentials handed to `git`
    pub git_credentials: Option<Credentials>,
    /// Credentials handed to `svn`
    pub svn_credentials: Option<Credentials>,
}

impl BackupOptions {
    /// All categories, default concurrency, no archive filtering
    pub fn new(output_dir: impl Into<PathBuf>, selection: ProjectSelection) -> Self {
        Self {
            output_dir: output_dir.into(),
            selection,
            categories: CategorySet::all(),
            concurrency: DEFAULT_ITEM_CONCURRENCY,
            archive_filter: ArchiveFilter::All,
            git_credentials: None,
            svn_credentials: None,
        }
    }

    /// Restrict the run to `categories`
    pub fn with_categories(mut self, categories: CategorySet) -> Self {
        self.categories = categories;
        self
    }

    /// Set item concurrency, clamped to `1..=MAX_ITEM_CONCURRENCY`
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_ITEM_CONCURRENCY);
        self
    }

    /// Keep only projects matching `filter`
    pub fn with_archive_filter(mut self, filter: ArchiveFilter) -> Self {
        self.archive_filter = filter;
        self
    }

    /// Credentials for git repositories
    pub fn with_git_credentials(mut self, credentials: Credentials) -> Self {
        self.git_credentials = Some(credentials);
        self
    }

    /// Credentials for the subversion repository
    pub fn with_svn_credentials(mut self, credentials: Credentials) -> Self {
        self.svn_credentials = Some(credentials);
        self
    }
}

/// Why a category stopped before finishing its items
#[derive(Debug)]
enum Abort {
    /// Credentials rejected; the whole run stops
    Run(String),
    /// Only this category stops
    Category(String),
}

impl Abort {
    fn cancelled() -> Self {
        Self::Category("cancelled".to_string())
    }
}

impl From<FetcherError> for Abort {
    fn from(error: FetcherError) -> Self {
        match error {
            FetcherError::Authentication(message) => Self::Run(message),
            FetcherError::Cancelled => Self::cancelled(),
            other => Self::Category(other.to_string()),
        }
    }
}

impl From<OutputError> for Abort {
    fn from(error: OutputError) -> Self {
        Self::Category(error.to_string())
    }
}

/// Failure of a single item
#[derive(Debug, thiserror::Error)]
enum ItemError {
    #[error(transparent)]
    Fetch(#[from] FetcherError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

impl ItemError {
    /// Abort implied by this failure, if it reaches beyond the item
    fn abort(&self) -> Option<Abort> {
        match self {
            Self::Fetch(e) if e.is_run_fatal() || e.is_category_fatal() => {
                Some(Abort::from(e.clone()))
            }
            _ => None,
        }
    }
}

/// What a finished item contributes to its category
struct ItemDone<R> {
    value: R,
    written: u64,
    failures: Vec<ItemFailure>,
}

impl<R> ItemDone<R> {
    fn single(value: R) -> Self {
        Self {
            value,
            written: 1,
            failures: Vec::new(),
        }
    }
}

type ItemResult<R> = Result<ItemDone<R>, ItemError>;

/// Successful item values in listing order, plus the first abort seen
struct Settled<R> {
    values: Vec<(usize, R)>,
    abort: Option<Abort>,
}

/// Drives backup runs
pub struct BackupOrchestrator {
    domain: SpaceDomain,
    api: Arc<dyn ApiSource>,
    scrape: Option<Arc<dyn ScrapeSource>>,
    repositories: Arc<dyn RepositoryFetch>,
    writer: BackupWriter,
    options: BackupOptions,
    shutdown: SharedShutdown,
    progress: Arc<dyn ProgressSink>,
}

impl BackupOrchestrator {
    /// Orchestrator without browser fallback
    pub fn new(
        domain: SpaceDomain,
        api: Arc<dyn ApiSource>,
        repositories: Arc<dyn RepositoryFetch>,
        options: BackupOptions,
    ) -> Self {
        Self {
            domain,
            api,
            scrape: None,
            repositories,
            writer: BackupWriter::new(options.output_dir.clone()),
            options,
            shutdown: ShutdownCoordinator::shared(),
            progress: Arc::new(NoProgress),
        }
    }

    /// Enable browser fallback and space-wide enumeration
    pub fn with_scrape(mut self, scrape: Arc<dyn ScrapeSource>) -> Self {
        self.scrape = Some(scrape);
        self
    }

    /// Observe `shutdown` for cancellation
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Report progress to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Options in use
    pub fn options(&self) -> &BackupOptions {
        &self.options
    }

    /// Resolve the selected projects and apply the archive filter
    pub async fn discover_projects(&self) -> Result<Vec<Project>, BackupError> {
        let projects = match &self.options.selection {
            ProjectSelection::Single(key) => {
                let raw = self.api.get_project(key).await.map_err(|e| match e {
                    FetcherError::NotFound(_) => BackupError::ProjectNotFound(key.clone()),
                    other => BackupError::from(other),
                })?;
                vec![EntityMapper::project(&raw)?]
            }
            ProjectSelection::AllAccessible => map_projects(&self.api.list_projects().await?),
            ProjectSelection::AllSpace => {
                let scrape = self.scrape.as_ref().ok_or_else(|| {
                    BackupError::Config(
                        "space-wide project enumeration requires web login credentials".into(),
                    )
                })?;
                map_projects(&scrape.list_space_projects().await?)
            }
        };

        let discovered = projects.len();
        let projects: Vec<Project> = projects
            .into_iter()
            .filter(|p| self.options.archive_filter.matches(p))
            .collect();
        info!(
            discovered,
            selected = projects.len(),
            filter = ?self.options.archive_filter,
            "Project discovery complete"
        );
        Ok(projects)
    }

    /// Back up every selected project and write `backup_report.json`
    ///
    /// Returns `Err` only for run-level failures; category and item failures
    /// are part of the report.
    pub async fn run(&self) -> Result<RunReport, BackupError> {
        let projects = self.discover_projects().await?;
        let mut report = RunReport::default();

        for project in &projects {
            if self.shutdown.is_shutdown_requested() {
                warn!("Shutdown requested, skipping remaining projects");
                break;
            }
            let span = info_span!("project", project = %project.key);
            let categories = self.backup_project(project).instrument(span).await?;
            report.projects.push(ProjectReport {
                key: project.key.clone(),
                name: project.name.clone(),
                categories,
            });
        }
        report.cancelled = self.shutdown.is_shutdown_requested();

        let path = self.writer.write_report(&report)?;
        info!(
            path = %path.display(),
            projects = report.projects.len(),
            succeeded = report.succeeded_count(),
            partial = report.partial_count(),
            failed = report.failed_count(),
            "Backup run finished"
        );
        Ok(report)
    }

    /// Issues, wiki and files one after another; git and svn alongside
    async fn backup_project(&self, project: &Project) -> Result<Vec<CategoryReport>, BackupError> {
        info!(name = %project.name, archived = project.archived, "Backing up project");

        let data = async {
            let mut reports = Vec::new();
            for category in [Category::Issues, Category::Wiki, Category::Files] {
                if self.options.categories.contains(category) {
                    reports.push(self.run_category(project, category).await?);
                }
            }
            Ok::<_, BackupError>(reports)
        };
        let repositories = async {
            let mut reports = Vec::new();
            for category in [Category::Git, Category::Svn] {
                if self.options.categories.contains(category) {
                    reports.push(self.run_category(project, category).await?);
                }
            }
            Ok::<_, BackupError>(reports)
        };

        let (mut reports, repositories) = tokio::try_join!(data, repositories)?;
        reports.extend(repositories);
        Ok(reports)
    }

    async fn run_category(
        &self,
        project: &Project,
        category: Category,
    ) -> Result<CategoryReport, BackupError> {
        let mut job = CategoryJob::new(&project.key, category);
        let span = info_span!("category", category = %category);

        let outcome = async {
            if self.shutdown.is_shutdown_requested() {
                return Err(Abort::cancelled());
            }
            info!("Category started");
            match category {
                Category::Issues => self.backup_issues(project, &mut job).await,
                Category::Wiki => self.backup_wiki(project, &mut job).await,
                Category::Files => self.backup_files(project, &mut job).await,
                Category::Git => {
                    self.backup_repositories(project, RepositoryKind::Git, &mut job)
                        .await
                }
                Category::Svn => {
                    self.backup_repositories(project, RepositoryKind::Svn, &mut job)
                        .await
                }
            }
        }
        .instrument(span)
        .await;

        match outcome {
            Ok(()) => {}
            Err(Abort::Category(reason)) => {
                warn!(project = %project.key, category = %category, %reason, "Category stopped");
                job.fail(reason);
            }
            Err(Abort::Run(message)) => {
                warn!(project = %project.key, category = %category, "Authentication rejected, aborting run");
                return Err(BackupError::Authentication(message));
            }
        }

        let report = job.finish();
        self.progress.category_finished(&project.key, &report);
        Ok(report)
    }

    async fn backup_issues(&self, project: &Project, job: &mut CategoryJob) -> Result<(), Abort> {
        job.advance(CategoryState::Fetching);
        let listing = self.api.list_all_issues(&project.id).await?;
        info!(count = listing.len(), "Listed issues");
        self.writer
            .ensure_dir(&self.writer.paths().category_dir(&project.key, Category::Issues))?;

        let mut labels = Vec::new();
        let mut ids = Vec::new();
        for raw in &listing {
            let label = raw["issueKey"].as_str().unwrap_or("<unknown issue>").to_string();
            match RemoteId::from_json(&raw["id"]) {
                Some(id) => {
                    labels.push(label);
                    ids.push(id);
                }
                None => job.record_failure(label, "listing entry has no id"),
            }
        }

        job.advance(CategoryState::Mapping);
        self.progress
            .category_started(&project.key, Category::Issues, ids.len());
        let results = self
            .dispatch(&project.key, Category::Issues, ids, |_, id| {
                self.backup_issue(project, id)
            })
            .await;
        let settled = self.settle(job, &labels, results);
        if matches!(settled.abort, Some(Abort::Run(_))) {
            return settled.abort.map_or(Ok(()), Err);
        }

        job.advance(CategoryState::Writing);
        let mut summary = IssueSummary::new();
        for (index, row) in settled.values {
            summary.insert(index, row);
        }
        self.writer.write_issue_summary(&project.key, &summary)?;
        settled.abort.map_or(Ok(()), Err)
    }

    async fn backup_issue(&self, project: &Project, id: RemoteId) -> ItemResult<IssueSummaryRow> {
        let raw = self.api.get_issue(&id).await?;
        let comments = self.api.list_all_issue_comments(&id).await?;
        let issue = EntityMapper::issue(&raw, &comments)?;
        self.writer.write(BackupRecord::Issue {
            project_key: &project.key,
            issue: &issue,
        })?;

        let (written, failures) = self
            .save_attachments(&project.key, &issue.key, &issue.attachments)
            .await?;
        debug!(issue = %issue.key, comments = issue.comments.len(), attachments = written, "Issue saved");
        Ok(ItemDone {
            value: IssueSummaryRow::from(&issue),
            written: 1 + written,
            failures,
        })
    }

    async fn backup_wiki(&self, project: &Project, job: &mut CategoryJob) -> Result<(), Abort> {
        job.advance(CategoryState::Fetching);
        let listing = self.api.list_wiki_pages(&project.key).await?;
        info!(count = listing.len(), "Listed wiki pages");
        self.writer
            .ensure_dir(&self.writer.paths().category_dir(&project.key, Category::Wiki))?;

        let mut pages: Vec<(RemoteId, String)> = Vec::new();
        for raw in &listing {
            let name = raw["name"].as_str().unwrap_or_default().to_string();
            match RemoteId::from_json(&raw["id"]) {
                Some(id) => pages.push((id, name)),
                None => job.record_failure(name, "listing entry has no id"),
            }
        }
        let stems = wiki_stems(pages.iter().map(|(id, name)| (name.as_str(), id.as_str())));
        let labels: Vec<String> = pages.iter().map(|(_, name)| name.clone()).collect();
        let items: Vec<(RemoteId, String)> = pages
            .into_iter()
            .map(|(id, _)| id)
            .zip(stems)
            .collect();

        job.advance(CategoryState::Mapping);
        self.progress
            .category_started(&project.key, Category::Wiki, items.len());
        let results = self
            .dispatch(&project.key, Category::Wiki, items, |_, (id, stem)| {
                self.backup_wiki_page(project, id, stem)
            })
            .await;
        let settled = self.settle(job, &labels, results);
        if matches!(settled.abort, Some(Abort::Run(_))) {
            return settled.abort.map_or(Ok(()), Err);
        }

        job.advance(CategoryState::Writing);
        let entries: Vec<WikiIndexEntry> = settled.values.into_iter().map(|(_, e)| e).collect();
        self.writer.write_wiki_index(&project.key, &entries)?;
        settled.abort.map_or(Ok(()), Err)
    }

    async fn backup_wiki_page(
        &self,
        project: &Project,
        id: RemoteId,
        stem: String,
    ) -> ItemResult<WikiIndexEntry> {
        let raw = self.api.get_wiki_page(&id).await?;
        let page = EntityMapper::wiki_page(&raw)?;
        self.writer.write(BackupRecord::WikiPage {
            project_key: &project.key,
            stem: &stem,
            page: &page,
            formatting: project.text_formatting,
        })?;

        let (written, failures) = self
            .save_attachments(&project.key, &stem, &page.attachments)
            .await?;
        Ok(ItemDone {
            value: WikiIndexEntry {
                id: page.id.to_string(),
                name: page.name.clone(),
                file_stem: stem,
                updated: page
                    .updated
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            },
            written: 1 + written,
            failures,
        })
    }

    /// Download attachments of one owner in remote order
    ///
    /// A failed download is recorded against the owner and the rest continue.
    async fn save_attachments(
        &self,
        project_key: &str,
        owner_dir: &str,
        attachments: &[AttachmentRef],
    ) -> Result<(u64, Vec<ItemFailure>), ItemError> {
        let names = unique_names(
            attachments
                .iter()
                .map(|a| (a.file_name.as_str(), a.id.as_str())),
            "attachment",
        );
        let mut written = 0;
        let mut failures = Vec::new();

        for (attachment, file_name) in attachments.iter().zip(&names) {
            if self.shutdown.is_shutdown_requested() {
                return Err(FetcherError::Cancelled.into());
            }
            match self.api.download_attachment(attachment).await {
                Ok(bytes) => {
                    self.writer.write(BackupRecord::Attachment {
                        project_key,
                        attachment,
                        owner_dir,
                        file_name,
                        bytes: &bytes,
                    })?;
                    written += 1;
                }
                Err(e) if e.is_run_fatal() || e.is_category_fatal() => return Err(e.into()),
                Err(e) => failures.push(ItemFailure {
                    item: format!("{owner_dir}/{file_name}"),
                    error: e.to_string(),
                }),
            }
        }
        Ok((written, failures))
    }

    async fn backup_files(&self, project: &Project, job: &mut CategoryJob) -> Result<(), Abort> {
        job.advance(CategoryState::Fetching);
        let nodes = self.walk_file_tree(project, job).await?;

        job.advance(CategoryState::Mapping);
        let ordered = order_tree(&nodes);
        let local_paths = local_tree_paths(&ordered);
        let (directories, files): (Vec<(FileNode, String)>, Vec<(FileNode, String)>) = ordered
            .into_iter()
            .zip(local_paths)
            .partition(|(node, _)| node.kind == NodeKind::Directory);
        info!(directories = directories.len(), files = files.len(), "Walked file tree");

        job.advance(CategoryState::Writing);
        self.writer
            .ensure_dir(&self.writer.paths().category_dir(&project.key, Category::Files))?;
        for (node, local_path) in &directories {
            match self.writer.write(BackupRecord::Directory {
                project_key: &project.key,
                node,
                local_path,
            }) {
                Ok(_) => job.record_written(1),
                Err(e) => job.record_failure(&node.path, e),
            }
        }

        let labels: Vec<String> = files.iter().map(|(node, _)| node.path.clone()).collect();
        self.progress
            .category_started(&project.key, Category::Files, files.len());
        let results = self
            .dispatch(&project.key, Category::Files, files, |_, (node, local_path)| {
                self.backup_file(project, node, local_path)
            })
            .await;
        let settled = self.settle(job, &labels, results);
        settled.abort.map_or(Ok(()), Err)
    }

    /// Breadth-first listing of the shared-file tree
    ///
    /// Directories the API cannot list are retried through the browser when
    /// one is available.
    async fn walk_file_tree(
        &self,
        project: &Project,
        job: &mut CategoryJob,
    ) -> Result<Vec<FileNode>, Abort> {
        let mut nodes = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([String::new()]);

        while let Some(dir) = queue.pop_front() {
            if !visited.insert(dir.clone()) {
                continue;
            }
            if self.shutdown.is_shutdown_requested() {
                return Err(Abort::cancelled());
            }
            let label = if dir.is_empty() { "/".to_string() } else { dir.clone() };

            let (records, source) = match self.list_directory(&project.key, &dir).await {
                Ok(listed) => listed,
                Err(e) if e.is_run_fatal() || e.is_category_fatal() => return Err(e.into()),
                Err(e) => {
                    job.record_failure(label, e);
                    continue;
                }
            };

            for raw in &records {
                match EntityMapper::file_node(raw, &dir, source) {
                    Ok(node) => {
                        if node.kind == NodeKind::Directory {
                            queue.push_back(node.path.clone());
                        }
                        nodes.push(node);
                    }
                    Err(e) => job.record_failure(label.clone(), e),
                }
            }
        }
        Ok(nodes)
    }

    async fn list_directory(
        &self,
        project_key: &str,
        dir: &str,
    ) -> Result<(Vec<serde_json::Value>, RecordSource), FetcherError> {
        let api_error = match self.api.list_all_file_tree(project_key, dir).await {
            Ok(records) => return Ok((records, RecordSource::Api)),
            Err(e) if e.is_run_fatal() => return Err(e),
            Err(e) => e,
        };
        let Some(scrape) = &self.scrape else {
            return Err(api_error);
        };
        warn!(dir, error = %api_error, "API could not list directory, falling back to browser");
        let records = scrape.list_file_tree(project_key, dir).await?;
        Ok((records, RecordSource::Scrape))
    }

    async fn backup_file(
        &self,
        project: &Project,
        node: FileNode,
        local_path: String,
    ) -> ItemResult<()> {
        let bytes = match (&node.remote_id, &self.scrape) {
            (Some(id), scrape) => match self.api.download_shared_file(&project.key, id).await {
                Ok(bytes) => bytes,
                Err(e) if e.is_run_fatal() => return Err(e.into()),
                Err(e) => match scrape {
                    Some(scrape) => {
                        debug!(path = %node.path, error = %e, "Shared-file download failed, retrying through browser");
                        scrape.download_file(&project.key, &node.path).await?
                    }
                    None => return Err(e.into()),
                },
            },
            (None, Some(scrape)) => scrape.download_file(&project.key, &node.path).await?,
            (None, None) => {
                return Err(FetcherError::NotFound(format!(
                    "{} has no download source",
                    node.path
                ))
                .into())
            }
        };

        self.writer.write(BackupRecord::File {
            project_key: &project.key,
            node: &node,
            local_path: &local_path,
            bytes: &bytes,
        })?;
        Ok(ItemDone::single(()))
    }

    async fn backup_repositories(
        &self,
        project: &Project,
        kind: RepositoryKind,
        job: &mut CategoryJob,
    ) -> Result<(), Abort> {
        job.advance(CategoryState::Fetching);
        let listing = self.api.list_repositories(&project.key, kind).await?;
        let credentials = match kind {
            RepositoryKind::Git => &self.options.git_credentials,
            RepositoryKind::Svn => &self.options.svn_credentials,
        };

        job.advance(CategoryState::Mapping);
        let mut repositories = Vec::new();
        for raw in &listing {
            match EntityMapper::repository(raw, kind, &project.key, &self.domain, credentials.clone())
            {
                Ok(repository) => repositories.push(repository),
                Err(e) => {
                    let label = raw["name"].as_str().unwrap_or("<unnamed>").to_string();
                    job.record_failure(label, e);
                }
            }
        }
        info!(count = repositories.len(), kind = %kind, "Listed repositories");

        job.advance(CategoryState::Writing);
        self.progress
            .category_started(&project.key, job.category, repositories.len());
        self.writer
            .ensure_dir(&self.writer.paths().category_dir(&project.key, job.category))?;

        for repository in &repositories {
            if self.shutdown.is_shutdown_requested() {
                return Err(Abort::cancelled());
            }
            let dest = self.writer.paths().repository_dir(&project.key, repository);
            let outcome = self
                .repositories
                .fetch(repository, repository.credentials.as_ref(), &dest)
                .await;
            let ok = matches!(outcome, RepositoryOutcome::Success { .. });
            match outcome {
                RepositoryOutcome::Success { refreshed } => {
                    info!(repository = %repository.name, refreshed, "Repository saved");
                    job.record_written(1);
                }
                RepositoryOutcome::AuthFailed(message) => job.record_failure(
                    &repository.name,
                    format!("authentication failed: {message}"),
                ),
                RepositoryOutcome::ToolError(message) => {
                    job.record_failure(&repository.name, message)
                }
            }
            self.progress.item_finished(&project.key, job.category, ok);
        }
        Ok(())
    }

    /// Run `work` over `items` with bounded concurrency
    ///
    /// Dispatch stops once shutdown is requested or an item fails in a way
    /// that ends the category; items already in flight complete. Results come
    /// back sorted by listing index.
    async fn dispatch<T, R, F, Fut>(
        &self,
        project_key: &str,
        category: Category,
        items: Vec<T>,
        work: F,
    ) -> Vec<(usize, ItemResult<R>)>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = ItemResult<R>>,
    {
        let halt = AtomicBool::new(false);
        let halt = &halt;
        let work = &work;

        let mut results: Vec<(usize, ItemResult<R>)> = stream::iter(items.into_iter().enumerate())
            .take_while(|_| {
                future::ready(
                    !halt.load(Ordering::SeqCst) && !self.shutdown.is_shutdown_requested(),
                )
            })
            .map(|(index, item)| async move {
                let result = work(index, item).await;
                if let Err(e) = &result {
                    if e.abort().is_some() {
                        halt.store(true, Ordering::SeqCst);
                    }
                }
                self.progress
                    .item_finished(project_key, category, result.is_ok());
                (index, result)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results
    }

    /// Fold item results into `job`
    ///
    /// An authentication failure takes precedence over any other abort; a
    /// cancelled run ends the category even when every dispatched item
    /// succeeded.
    fn settle<R>(
        &self,
        job: &mut CategoryJob,
        labels: &[String],
        results: Vec<(usize, ItemResult<R>)>,
    ) -> Settled<R> {
        let mut values = Vec::new();
        let mut abort: Option<Abort> = None;

        for (index, result) in results {
            match result {
                Ok(done) => {
                    job.record_written(done.written);
                    for failure in done.failures {
                        job.record_failure(failure.item, failure.error);
                    }
                    values.push((index, done.value));
                }
                Err(e) => match e.abort() {
                    Some(Abort::Run(message)) => abort = Some(Abort::Run(message)),
                    Some(other) => {
                        if abort.is_none() {
                            abort = Some(other);
                        }
                    }
                    None => {
                        let label = labels.get(index).cloned().unwrap_or_else(|| index.to_string());
                        job.record_failure(label, e);
                    }
                },
            }
        }

        if abort.is_none() && self.shutdown.is_shutdown_requested() {
            abort = Some(Abort::cancelled());
        }
        Settled { values, abort }
    }
}

fn map_projects(records: &[serde_json::Value]) -> Vec<Project> {
    records
        .iter()
        .filter_map(|raw| match EntityMapper::project(raw) {
            Ok(project) => Some(project),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable project record");
                None
            }
        })
        .collect()
}
