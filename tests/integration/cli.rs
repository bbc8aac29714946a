//! Command-line surface of the backlog-backup binary

use assert_cmd::Command;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn bin() -> Command {
    let mut cmd = Command::cargo_bin("backlog-backup").unwrap();
    for var in [
        "BACKLOG_DOMAIN",
        "BACKLOG_API_KEY",
        "BACKLOG_WEB_USER",
        "BACKLOG_WEB_PASSWORD",
        "BACKLOG_GIT_USER",
        "BACKLOG_GIT_PASSWORD",
        "BACKLOG_SVN_USER",
        "BACKLOG_SVN_PASSWORD",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn stdout_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_help_lists_commands() {
    let output = bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("backup"));
    assert!(stdout.contains("projects"));
}

#[test]
fn test_backup_requires_target() {
    let output = bin()
        .args(["backup", "--domain", "example.backlog.com", "--api-key", "k"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_project_and_all_projects_conflict() {
    bin()
        .args(["backup", "--project", "PROJ", "--all-projects"])
        .assert()
        .failure();
}

#[test]
fn test_concurrency_bounds() {
    bin()
        .args(["backup", "--project", "PROJ", "--concurrency", "0"])
        .assert()
        .failure();
    bin()
        .args(["backup", "--project", "PROJ", "--concurrency", "17"])
        .assert()
        .failure();
}

#[test]
fn test_invalid_project_key_is_rejected() {
    bin()
        .args(["backup", "--project", "1PROJ"])
        .assert()
        .failure();
}

#[test]
fn test_missing_domain_aborts() {
    let dir = TempDir::new().unwrap();
    bin()
        .args(["backup", "--project", "PROJ", "--api-key", "k", "--output"])
        .arg(dir.path())
        .assert()
        .code(1);
}

#[test]
fn test_missing_api_key_aborts() {
    let dir = TempDir::new().unwrap();
    bin()
        .args(["projects", "--domain", "example.backlog.com", "--output"])
        .arg(dir.path())
        .assert()
        .code(1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_projects_command_prints_table() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 12, "projectKey": "PROJ", "name": "Main project", "archived": false},
            {"id": 7, "projectKey": "OLD", "name": "Legacy", "archived": true}
        ])))
        .mount(&server)
        .await;

    let uri = server.uri();
    let output = tokio::task::spawn_blocking(move || {
        bin()
            .args(["projects", "--domain", &uri, "--api-key", "k"])
            .args(["--archived-projects", "non-archived-only"])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("Project Key | Project Name | Project ID | Archived"));
    assert!(stdout.contains("PROJ        | Main project | 12         | no"));
    assert!(!stdout.contains("Legacy"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_backup_command_writes_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/projects/PROJ"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": 1, "projectKey": "PROJ", "name": "Project"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let out = dir.path().to_path_buf();
    let uri = server.uri();
    let output = tokio::task::spawn_blocking(move || {
        bin()
            .args(["backup", "--project", "proj", "--issues"])
            .args(["--domain", &uri, "--api-key", "k", "--output"])
            .arg(&out)
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(output.status.code(), Some(0), "{}", stdout_of(&output));
    let report: Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("backup_report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report["projects"][0]["key"], "PROJ");
    assert!(dir.path().join("PROJ/issues/issues_summary.csv").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_api_key_exits_with_abort_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/projects/PROJ"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let out = dir.path().to_path_buf();
    let uri = server.uri();
    let output = tokio::task::spawn_blocking(move || {
        bin()
            .args(["backup", "--project", "PROJ"])
            .args(["--domain", &uri, "--api-key", "bad", "--output"])
            .arg(&out)
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(!dir.path().join("backup_report.json").exists());
}
