//! Unit tests for output layout and writer behavior

use backlog_backup::output::{unique_names, BackupRecord, BackupWriter};
use backlog_backup::{
    AttachmentOwner, AttachmentRef, FileNode, Issue, NodeKind, RecordSource, RemoteId,
};
use std::collections::BTreeMap;
use tempfile::TempDir;

fn issue(key: &str, summary: &str) -> Issue {
    Issue {
        id: RemoteId::from(1),
        key: key.to_string(),
        summary: summary.to_string(),
        description: String::new(),
        status: None,
        assignee: None,
        created: None,
        updated: None,
        fields: BTreeMap::new(),
        comments: Vec::new(),
        attachments: Vec::new(),
        change_history: Vec::new(),
    }
}

#[test]
fn test_issue_overwrite_replaces_content() {
    let dir = TempDir::new().unwrap();
    let writer = BackupWriter::new(dir.path());

    let first = writer
        .write(BackupRecord::Issue {
            project_key: "PROJ",
            issue: &issue("PROJ-1", "a much longer original summary"),
        })
        .unwrap();
    let second = writer
        .write(BackupRecord::Issue {
            project_key: "PROJ",
            issue: &issue("PROJ-1", "short"),
        })
        .unwrap();

    assert_eq!(first, second);
    let content = std::fs::read_to_string(&second).unwrap();
    assert!(content.contains("\"summary\": \"short\""));
    assert!(!content.contains("original"));
    assert!(content.ends_with("}\n"));

    // No temp files left behind.
    let entries: Vec<_> = std::fs::read_dir(second.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn test_issue_key_is_sanitized() {
    let dir = TempDir::new().unwrap();
    let writer = BackupWriter::new(dir.path());
    let path = writer
        .write(BackupRecord::Issue {
            project_key: "PROJ",
            issue: &issue("../PROJ-1", "escape"),
        })
        .unwrap();
    assert!(path.starts_with(dir.path().join("PROJ/issues")));
    assert_eq!(path.file_name().unwrap(), "___PROJ-1.json");
}

#[test]
fn test_attachment_lands_under_owner() {
    let dir = TempDir::new().unwrap();
    let writer = BackupWriter::new(dir.path());
    let attachment = AttachmentRef {
        owner: AttachmentOwner::Wiki {
            id: RemoteId::from(3),
            name: "Home".into(),
        },
        id: RemoteId::from(9),
        file_name: "diagram.png".into(),
        size: Some(3),
    };

    let path = writer
        .write(BackupRecord::Attachment {
            project_key: "PROJ",
            attachment: &attachment,
            owner_dir: "Home",
            file_name: "diagram.png",
            bytes: b"png",
        })
        .unwrap();

    assert_eq!(path, dir.path().join("PROJ/wiki/attachments/Home/diagram.png"));
    assert_eq!(std::fs::read(path).unwrap(), b"png");
}

#[test]
fn test_directory_record_creates_nested_path() {
    let dir = TempDir::new().unwrap();
    let writer = BackupWriter::new(dir.path());
    let node = FileNode {
        path: "specs/2024/q1".into(),
        kind: NodeKind::Directory,
        remote_id: None,
        size: None,
        source: RecordSource::Scrape,
    };

    let path = writer
        .write(BackupRecord::Directory {
            project_key: "PROJ",
            node: &node,
            local_path: &node.path,
        })
        .unwrap();
    assert!(path.is_dir());
    assert!(path.ends_with("PROJ/files/specs/2024/q1"));
}

#[test]
fn test_unique_names_are_stable_across_runs() {
    let listing = [("a:b", "1"), ("a/b", "2"), ("", "3"), ("a_b", "4")];
    let first = unique_names(listing.iter().copied(), "wiki");
    let second = unique_names(listing.iter().copied(), "wiki");

    assert_eq!(first, vec!["a_b", "a_b_2", "wiki_3", "a_b_3"]);
    assert_eq!(first, second);
}
