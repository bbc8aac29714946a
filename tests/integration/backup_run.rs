//! End-to-end runs of the orchestrator against in-memory sources

use backlog_backup::backup::{
    BackupError, BackupOptions, BackupOrchestrator, CategoryStatus, ProjectSelection, RunReport,
};
use backlog_backup::client::FetcherError;
use backlog_backup::repository::RepositoryOutcome;
use backlog_backup::shutdown::ShutdownCoordinator;
use backlog_backup::{ArchiveFilter, Category, CategorySet, Credentials, RepositoryKind, SpaceDomain};
use bytes::Bytes;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use super::support::{snapshot, FakeApi, FakeRepositories, FakeScrape};

fn domain() -> SpaceDomain {
    SpaceDomain::parse("example.backlog.com").unwrap()
}

fn options(dir: &Path, categories: &[Category]) -> BackupOptions {
    BackupOptions::new(dir, ProjectSelection::Single("PROJ".into()))
        .with_categories(CategorySet::from_requested(categories.iter().copied()))
}

fn orchestrator(api: FakeApi, options: BackupOptions) -> BackupOrchestrator {
    BackupOrchestrator::new(
        domain(),
        Arc::new(api),
        Arc::new(FakeRepositories::default()),
        options,
    )
}

fn issue(id: u64, key: &str, summary: &str) -> Value {
    json!({
        "id": id,
        "issueKey": key,
        "summary": summary,
        "status": {"name": "Open"},
        "created": "2024-01-01T00:00:00Z",
        "updated": "2024-01-02T00:00:00Z"
    })
}

fn category<'a>(report: &'a RunReport, category: Category) -> &'a backlog_backup::backup::CategoryReport {
    report.projects[0]
        .categories
        .iter()
        .find(|c| c.category == category)
        .unwrap()
}

#[tokio::test]
async fn test_authentication_failure_aborts_before_writing() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.fail_all_with = Some(FetcherError::Authentication("401 invalid api key".into()));

    let result = orchestrator(api, options(dir.path(), &[])).run().await;

    assert!(matches!(result, Err(BackupError::Authentication(_))));
    assert!(snapshot(dir.path()).is_empty());
}

#[tokio::test]
async fn test_category_with_every_item_failing_is_failed() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.add_issue(issue(1, "PROJ-1", "first"));
    api.add_issue(issue(2, "PROJ-2", "second"));
    api.issue_details.clear();

    let report = orchestrator(api, options(dir.path(), &[Category::Issues]))
        .run()
        .await
        .unwrap();
    assert!(matches!(
        category(&report, Category::Issues).status,
        CategoryStatus::Failed(_)
    ));
}

#[tokio::test]
async fn test_missing_issue_is_skipped_and_summary_omits_it() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.add_issue(issue(1, "PROJ-1", "first"));
    api.add_issue(issue(2, "PROJ-2", "second"));
    api.add_issue(issue(3, "PROJ-3", "third"));
    api.issue_details.remove("2");

    let report = orchestrator(api, options(dir.path(), &[Category::Issues]).with_concurrency(3))
        .run()
        .await
        .unwrap();

    let issues_dir = dir.path().join("PROJ/issues");
    assert!(issues_dir.join("PROJ-1.json").exists());
    assert!(!issues_dir.join("PROJ-2.json").exists());
    assert!(issues_dir.join("PROJ-3.json").exists());

    let csv = std::fs::read_to_string(issues_dir.join("issues_summary.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("id,issueKey,summary,status"));
    assert!(lines[1].starts_with("1,PROJ-1,first,Open"));
    assert!(lines[2].starts_with("3,PROJ-3,third,Open"));

    let issues = category(&report, Category::Issues);
    assert_eq!(issues.status, CategoryStatus::Partial);
    assert_eq!(issues.written, 2);
    assert_eq!(issues.failed, 1);
    assert_eq!(issues.failures[0].item, "PROJ-2");
}

#[tokio::test]
async fn test_issue_embeds_comments_and_history() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.add_issue(issue(1, "PROJ-1", "first"));
    api.comments.insert(
        "1".into(),
        vec![
            json!({"id": 10, "content": "looking", "createdUser": {"name": "Ann"}}),
            json!({"id": 11, "content": "", "changeLog": [
                {"field": "status", "originalValue": "Open", "newValue": "Closed"}
            ]}),
        ],
    );

    orchestrator(api, options(dir.path(), &[Category::Issues]))
        .run()
        .await
        .unwrap();

    let written: Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("PROJ/issues/PROJ-1.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(written["comments"].as_array().unwrap().len(), 2);
    assert_eq!(written["comments"][0]["author"], "Ann");
    assert_eq!(written["changeHistory"][0]["field"], "status");
    assert_eq!(written["changeHistory"][0]["newValue"], "Closed");
}

#[tokio::test]
async fn test_rerun_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let build = || {
        let mut api = FakeApi::with_project();
        api.add_issue(json!({
            "id": 1, "issueKey": "PROJ-1", "summary": "first",
            "attachments": [{"id": 5, "name": "log.txt"}]
        }));
        api.attachments.insert("5".into(), Bytes::from_static(b"log"));
        api.add_wiki_page(json!({"id": 7, "name": "Home", "content": "# Hello\n**bold**"}));
        api.file_tree.insert(
            String::new(),
            vec![json!({"id": 9, "dir": "/", "name": "readme.txt", "type": "file"})],
        );
        api.shared_files.insert("9".into(), Bytes::from_static(b"read me"));
        api
    };
    let categories = [Category::Issues, Category::Wiki, Category::Files];

    let first = orchestrator(build(), options(dir.path(), &categories))
        .run()
        .await
        .unwrap();
    assert!(first.is_success());
    let before = snapshot(dir.path());

    orchestrator(build(), options(dir.path(), &categories))
        .run()
        .await
        .unwrap();
    let after = snapshot(dir.path());

    assert_eq!(before, after);
    assert!(before.contains_key("backup_report.json"));
    assert!(before.contains_key("PROJ/issues/attachments/PROJ-1/log.txt"));
    assert!(before.contains_key("PROJ/files/readme.txt"));
}

#[tokio::test]
async fn test_wiki_page_writes_record_and_plain_text() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.add_wiki_page(json!({"id": 7, "name": "Home", "content": "# Hello"}));

    orchestrator(api, options(dir.path(), &[Category::Wiki]))
        .run()
        .await
        .unwrap();

    let wiki = dir.path().join("PROJ/wiki");
    let record: Value =
        serde_json::from_slice(&std::fs::read(wiki.join("Home.json")).unwrap()).unwrap();
    assert_eq!(record["content"], "# Hello");
    assert_eq!(std::fs::read_to_string(wiki.join("Home.txt")).unwrap(), "Hello");

    let index: Value =
        serde_json::from_slice(&std::fs::read(wiki.join("wiki_index.json")).unwrap()).unwrap();
    assert_eq!(index[0]["name"], "Home");
    assert_eq!(index[0]["fileStem"], "Home");
}

#[tokio::test]
async fn test_wiki_pages_with_colliding_names_keep_both() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.add_wiki_page(json!({"id": 1, "name": "a/b", "content": "one"}));
    api.add_wiki_page(json!({"id": 2, "name": "a:b", "content": "two"}));

    orchestrator(api, options(dir.path(), &[Category::Wiki]))
        .run()
        .await
        .unwrap();

    let wiki = dir.path().join("PROJ/wiki");
    assert_eq!(std::fs::read_to_string(wiki.join("a_b.txt")).unwrap(), "one");
    assert_eq!(std::fs::read_to_string(wiki.join("a_b_2.txt")).unwrap(), "two");
}

#[tokio::test]
async fn test_wiki_page_named_like_the_index_keeps_its_record() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.add_wiki_page(json!({"id": 3, "name": "wiki_index", "content": "page body"}));

    let report = orchestrator(api, options(dir.path(), &[Category::Wiki]))
        .run()
        .await
        .unwrap();

    let wiki = dir.path().join("PROJ/wiki");
    let record: Value =
        serde_json::from_slice(&std::fs::read(wiki.join("wiki_index_2.json")).unwrap()).unwrap();
    assert_eq!(record["content"], "page body");
    assert_eq!(
        std::fs::read_to_string(wiki.join("wiki_index_2.txt")).unwrap(),
        "page body"
    );

    let index: Value =
        serde_json::from_slice(&std::fs::read(wiki.join("wiki_index.json")).unwrap()).unwrap();
    assert!(index.is_array());
    assert_eq!(index[0]["name"], "wiki_index");
    assert_eq!(index[0]["fileStem"], "wiki_index_2");
    assert_eq!(category(&report, Category::Wiki).written, 1);
}

#[tokio::test]
async fn test_duplicate_attachment_names_are_preserved() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.add_issue(json!({
        "id": 1, "issueKey": "PROJ-1", "summary": "screens",
        "attachments": [
            {"id": 5, "name": "shot.png"},
            {"id": 6, "name": "shot.png"}
        ]
    }));
    api.attachments.insert("5".into(), Bytes::from_static(b"first"));
    api.attachments.insert("6".into(), Bytes::from_static(b"second"));

    orchestrator(api, options(dir.path(), &[Category::Issues]))
        .run()
        .await
        .unwrap();

    let attachments = dir.path().join("PROJ/issues/attachments/PROJ-1");
    assert_eq!(std::fs::read(attachments.join("shot.png")).unwrap(), b"first");
    assert_eq!(std::fs::read(attachments.join("shot_2.png")).unwrap(), b"second");
}

#[tokio::test]
async fn test_file_tree_creates_directories_before_files() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.file_tree.insert(
        String::new(),
        vec![
            json!({"id": 9, "dir": "/docs/", "name": "readme.txt", "type": "file"}),
            json!({"dir": "/", "name": "docs", "type": "directory"}),
        ],
    );
    api.file_tree.insert("docs".into(), vec![]);
    api.shared_files.insert("9".into(), Bytes::from_static(b"hello"));

    let report = orchestrator(api, options(dir.path(), &[Category::Files]))
        .run()
        .await
        .unwrap();

    let docs = dir.path().join("PROJ/files/docs");
    assert!(docs.is_dir());
    assert_eq!(std::fs::read(docs.join("readme.txt")).unwrap(), b"hello");
    let files = category(&report, Category::Files);
    assert_eq!(files.status, CategoryStatus::Succeeded);
    assert_eq!(files.written, 2);
}

#[tokio::test]
async fn test_files_colliding_after_sanitizing_are_both_kept() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.file_tree.insert(
        String::new(),
        vec![
            json!({"id": 1, "dir": "/", "name": "a:b.txt", "type": "file"}),
            json!({"id": 2, "dir": "/", "name": "a_b.txt", "type": "file"}),
        ],
    );
    api.shared_files.insert("1".into(), Bytes::from_static(b"colon"));
    api.shared_files.insert("2".into(), Bytes::from_static(b"underscore"));

    let report = orchestrator(api, options(dir.path(), &[Category::Files]))
        .run()
        .await
        .unwrap();

    let files = dir.path().join("PROJ/files");
    assert_eq!(std::fs::read(files.join("a_b.txt")).unwrap(), b"colon");
    assert_eq!(std::fs::read(files.join("a_b_2.txt")).unwrap(), b"underscore");
    assert_eq!(category(&report, Category::Files).written, 2);
}

#[tokio::test]
async fn test_file_tree_falls_back_to_browser() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.file_tree.insert(
        String::new(),
        vec![json!({"dir": "/", "name": "specs", "type": "directory"})],
    );
    let mut scrape = FakeScrape::default();
    scrape.file_tree.insert(
        "specs".into(),
        vec![json!({"name": "design.pdf", "path": "specs/design.pdf", "type": "file"})],
    );
    scrape
        .files
        .insert("specs/design.pdf".into(), Bytes::from_static(b"%PDF"));

    let report = orchestrator(api, options(dir.path(), &[Category::Files]))
        .with_scrape(Arc::new(scrape))
        .run()
        .await
        .unwrap();

    assert_eq!(
        std::fs::read(dir.path().join("PROJ/files/specs/design.pdf")).unwrap(),
        b"%PDF"
    );
    assert_eq!(category(&report, Category::Files).status, CategoryStatus::Succeeded);
}

#[tokio::test]
async fn test_unlistable_directory_without_browser_is_an_item_failure() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.file_tree.insert(
        String::new(),
        vec![
            json!({"dir": "/", "name": "locked", "type": "directory"}),
            json!({"id": 3, "dir": "/", "name": "open.txt", "type": "file"}),
        ],
    );
    api.shared_files.insert("3".into(), Bytes::from_static(b"ok"));

    let report = orchestrator(api, options(dir.path(), &[Category::Files]))
        .run()
        .await
        .unwrap();

    let files = category(&report, Category::Files);
    assert_eq!(files.status, CategoryStatus::Partial);
    assert_eq!(files.failures[0].item, "locked");
    assert!(dir.path().join("PROJ/files/open.txt").exists());
}

#[tokio::test]
async fn test_expired_browser_session_fails_only_the_files_category() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.add_issue(issue(1, "PROJ-1", "first"));
    let scrape = FakeScrape {
        fail_with: Some(FetcherError::SessionExpired("login again".into())),
        ..FakeScrape::default()
    };

    let report = orchestrator(api, options(dir.path(), &[Category::Issues, Category::Files]))
        .with_scrape(Arc::new(scrape))
        .run()
        .await
        .unwrap();

    assert_eq!(category(&report, Category::Issues).status, CategoryStatus::Succeeded);
    assert!(matches!(
        category(&report, Category::Files).status,
        CategoryStatus::Failed(_)
    ));
}

#[tokio::test]
async fn test_repository_failures_are_isolated() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.repositories.insert(
        RepositoryKind::Git,
        vec![json!({"name": "app"}), json!({"name": "docs"})],
    );
    let mut repositories = FakeRepositories::default();
    repositories
        .outcomes
        .insert("docs".into(), RepositoryOutcome::ToolError("git exited with 128".into()));
    let repositories = Arc::new(repositories);

    let report = BackupOrchestrator::new(
        domain(),
        Arc::new(api),
        repositories.clone(),
        options(dir.path(), &[Category::Git, Category::Svn])
            .with_git_credentials(Credentials::new("alice", "token")),
    )
    .run()
    .await
    .unwrap();

    let git = category(&report, Category::Git);
    assert_eq!(git.status, CategoryStatus::Partial);
    assert_eq!(git.written, 1);
    assert_eq!(git.failures[0].item, "docs");
    assert_eq!(category(&report, Category::Svn).status, CategoryStatus::Succeeded);

    let fetched = repositories.fetched.lock().unwrap();
    assert_eq!(fetched.len(), 2);
    assert_eq!(fetched[0].1, Some(Credentials::new("alice", "token")));
    assert!(fetched[0].2.ends_with("PROJ/git/app.git"));
}

#[tokio::test]
async fn test_archive_filter_applies_after_discovery() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.projects
        .push(json!({"id": 2, "projectKey": "OLD", "name": "Old", "archived": true}));

    let options = BackupOptions::new(dir.path(), ProjectSelection::AllAccessible)
        .with_archive_filter(ArchiveFilter::ArchivedOnly);
    let projects = orchestrator(api, options).discover_projects().await.unwrap();

    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].key, "OLD");
}

#[tokio::test]
async fn test_space_wide_discovery_needs_browser() {
    let dir = TempDir::new().unwrap();
    let options = BackupOptions::new(dir.path(), ProjectSelection::AllSpace);

    let result = orchestrator(FakeApi::with_project(), options.clone())
        .discover_projects()
        .await;
    assert!(matches!(result, Err(BackupError::Config(_))));

    let scrape = FakeScrape {
        projects: vec![
            json!({"id": "1", "projectKey": "PROJ", "name": "Project", "archived": false}),
            json!({"id": "4", "projectKey": "HIDDEN", "name": "Hidden", "archived": false}),
        ],
        ..FakeScrape::default()
    };
    let projects = orchestrator(FakeApi::with_project(), options)
        .with_scrape(Arc::new(scrape))
        .discover_projects()
        .await
        .unwrap();
    assert_eq!(projects.len(), 2);
}

#[tokio::test]
async fn test_unknown_project_is_reported() {
    let dir = TempDir::new().unwrap();
    let options = BackupOptions::new(dir.path(), ProjectSelection::Single("NOPE".into()));
    let result = orchestrator(FakeApi::with_project(), options).run().await;
    assert!(matches!(result, Err(BackupError::ProjectNotFound(key)) if key == "NOPE"));
}

#[tokio::test]
async fn test_cancelled_run_stops_dispatching() {
    let dir = TempDir::new().unwrap();
    let mut api = FakeApi::with_project();
    api.add_issue(issue(1, "PROJ-1", "first"));
    let api = Arc::new(api);
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let report = BackupOrchestrator::new(
        domain(),
        api.clone(),
        Arc::new(FakeRepositories::default()),
        options(dir.path(), &[Category::Issues]),
    )
    .with_shutdown(shutdown)
    .run()
    .await
    .unwrap();

    assert!(report.cancelled);
    assert!(report.projects.is_empty());
    assert!(!report.is_success());
    // Only project discovery reached the API.
    assert_eq!(api.call_count(), 1);
}
