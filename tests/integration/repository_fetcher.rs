//! Git mirroring through the system git executable

use backlog_backup::repository::{RepositoryFetch, RepositoryFetcher, RepositoryOutcome};
use backlog_backup::{RepositoryKind, RepositoryRef};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn git_available() -> bool {
    which::which("git").is_ok()
}

fn bare_repository(dir: &Path) {
    let status = std::process::Command::new("git")
        .args(["init", "--bare", "--quiet"])
        .arg(dir)
        .status()
        .unwrap();
    assert!(status.success());
}

fn git_ref(name: &str, url: &Path) -> RepositoryRef {
    RepositoryRef {
        name: name.to_string(),
        kind: RepositoryKind::Git,
        url: url.to_string_lossy().into_owned(),
        credentials: None,
    }
}

#[tokio::test]
async fn test_clone_then_refresh() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let remote = TempDir::new().unwrap();
    bare_repository(remote.path());
    let out = TempDir::new().unwrap();
    let dest = out.path().join("PROJ/git/app.git");

    let fetcher = RepositoryFetcher::new().with_timeout(Duration::from_secs(60));
    let repository = git_ref("app", remote.path());

    let first = fetcher.fetch(&repository, None, &dest).await;
    assert_eq!(first, RepositoryOutcome::Success { refreshed: false });
    assert!(dest.join("HEAD").is_file());

    let second = fetcher.fetch(&repository, None, &dest).await;
    assert_eq!(second, RepositoryOutcome::Success { refreshed: true });
}

#[tokio::test]
async fn test_interrupted_clone_is_replaced() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let remote = TempDir::new().unwrap();
    bare_repository(remote.path());
    let out = TempDir::new().unwrap();
    let dest = out.path().join("app.git");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("partial"), b"leftover").unwrap();

    let outcome = RepositoryFetcher::new()
        .fetch(&git_ref("app", remote.path()), None, &dest)
        .await;

    assert_eq!(outcome, RepositoryOutcome::Success { refreshed: false });
    assert!(!dest.join("partial").exists());
}

#[tokio::test]
async fn test_unreachable_remote_is_tool_error() {
    if !git_available() {
        eprintln!("git not installed, skipping");
        return;
    }
    let out = TempDir::new().unwrap();
    let missing = out.path().join("does-not-exist");

    let outcome = RepositoryFetcher::new()
        .fetch(&git_ref("gone", &missing), None, &out.path().join("gone.git"))
        .await;

    assert!(matches!(outcome, RepositoryOutcome::ToolError(_)));
}
