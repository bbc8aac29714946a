//! Raw record to entity mapping
//!
//! Stateless conversion of API JSON and scraped DOM records into the entity
//! model. Only identity fields are required; every other attribute is optional
//! and falls back to an empty value. Identifiers from both sources are
//! normalized through [`RemoteId::from_json`].

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::space::SpaceDomain;
use crate::{
    AttachmentOwner, AttachmentRef, ChangeLogEntry, Comment, Credentials, FileNode, Issue,
    NodeKind, Project, RecordSource, RemoteId, RepositoryKind, RepositoryRef, TextFormatting,
    WikiPage,
};

/// Mapping errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// Identity field absent or empty
    #[error("{entity} record is missing '{field}'")]
    MissingField {
        /// Entity being mapped
        entity: &'static str,
        /// Missing attribute
        field: &'static str,
    },

    /// Attribute present but not understood
    #[error("{entity} record has invalid '{field}': {value}")]
    InvalidValue {
        /// Entity being mapped
        entity: &'static str,
        /// Offending attribute
        field: &'static str,
        /// Value as received
        value: String,
    },
}

/// Result type for mapping
pub type MapResult<T> = Result<T, MapError>;

/// Issue attributes lifted into dedicated [`Issue`] fields
const ISSUE_CORE_FIELDS: &[&str] = &[
    "id",
    "issueKey",
    "summary",
    "description",
    "status",
    "assignee",
    "created",
    "updated",
    "attachments",
];

/// Stateless mapper from raw records to entities
pub struct EntityMapper;

impl EntityMapper {
    /// Map a project record (`/projects` item or scraped project row)
    pub fn project(raw: &Value) -> MapResult<Project> {
        let id = Self::id(raw, "project", "id")?;
        let key = Self::text(raw, "projectKey")
            .ok_or(MapError::MissingField { entity: "project", field: "projectKey" })?;
        let text_formatting = match Self::text(raw, "textFormattingRule").as_deref() {
            Some("backlog") => TextFormatting::Backlog,
            _ => TextFormatting::Markdown,
        };

        Ok(Project {
            id,
            name: Self::text(raw, "name").unwrap_or_else(|| key.clone()),
            key,
            archived: Self::flag(raw, "archived"),
            text_formatting,
        })
    }

    /// Map an issue detail together with its comment records
    ///
    /// Change history is flattened from the comments' change logs, keeping
    /// comment order and the order within each log.
    pub fn issue(raw: &Value, comments: &[Value]) -> MapResult<Issue> {
        let id = Self::id(raw, "issue", "id")?;
        let key = Self::text(raw, "issueKey")
            .ok_or(MapError::MissingField { entity: "issue", field: "issueKey" })?;

        let owner = AttachmentOwner::Issue {
            id: id.clone(),
            key: key.clone(),
        };
        let attachments = Self::attachments(raw, &owner)?;

        let fields: BTreeMap<String, Value> = raw
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter(|(k, _)| !ISSUE_CORE_FIELDS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut mapped_comments = Vec::with_capacity(comments.len());
        let mut change_history = Vec::new();
        for raw_comment in comments {
            let (comment, changes) = Self::comment(raw_comment)?;
            mapped_comments.push(comment);
            change_history.extend(changes);
        }

        Ok(Issue {
            id,
            key,
            summary: Self::text(raw, "summary").unwrap_or_default(),
            description: Self::text(raw, "description").unwrap_or_default(),
            status: Self::name_of(raw, "status"),
            assignee: Self::name_of(raw, "assignee"),
            created: Self::timestamp(raw, "created"),
            updated: Self::timestamp(raw, "updated"),
            fields,
            comments: mapped_comments,
            attachments,
            change_history,
        })
    }

    /// Map one comment and the field changes it carries
    pub fn comment(raw: &Value) -> MapResult<(Comment, Vec<ChangeLogEntry>)> {
        let id = Self::id(raw, "comment", "id")?;
        let created = Self::timestamp(raw, "created");

        let changes = raw
            .get("changeLog")
            .and_then(Value::as_array)
            .map(|log| {
                log.iter()
                    .filter_map(|change| {
                        Some(ChangeLogEntry {
                            comment_id: id.clone(),
                            field: Self::text(change, "field")?,
                            original_value: Self::text(change, "originalValue"),
                            new_value: Self::text(change, "newValue"),
                            changed_at: created,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let comment = Comment {
            author: Self::name_of(raw, "createdUser"),
            content: Self::text(raw, "content").unwrap_or_default(),
            created,
            id,
        };
        Ok((comment, changes))
    }

    /// Map a wiki page detail
    pub fn wiki_page(raw: &Value) -> MapResult<WikiPage> {
        let id = Self::id(raw, "wiki page", "id")?;
        let name = Self::text(raw, "name")
            .ok_or(MapError::MissingField { entity: "wiki page", field: "name" })?;

        let owner = AttachmentOwner::Wiki {
            id: id.clone(),
            name: name.clone(),
        };
        let attachments = Self::attachments(raw, &owner)?;

        let tags = raw
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|tag| match tag {
                        Value::String(s) => Some(s.clone()),
                        other => Self::text(other, "name"),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(WikiPage {
            id,
            name,
            content: Self::text(raw, "content").unwrap_or_default(),
            attachments,
            tags,
            created_by: Self::name_of(raw, "createdUser"),
            updated_by: Self::name_of(raw, "updatedUser"),
            updated: Self::timestamp(raw, "updated"),
        })
    }

    /// Map a file-tree entry listed under `parent_dir`
    ///
    /// API entries carry `dir` + `name`; scraped entries carry `path`. Either
    /// way the result is relative and `/`-separated.
    pub fn file_node(raw: &Value, parent_dir: &str, source: RecordSource) -> MapResult<FileNode> {
        let joined = match (Self::text(raw, "path"), Self::text(raw, "name")) {
            (Some(path), _) => path,
            (None, Some(name)) => {
                let dir = Self::text(raw, "dir").unwrap_or_else(|| parent_dir.to_string());
                format!("{dir}/{name}")
            }
            (None, None) => {
                return Err(MapError::MissingField { entity: "file node", field: "name" })
            }
        };
        let path = normalize_path(&joined);
        if path.is_empty() {
            return Err(MapError::InvalidValue {
                entity: "file node",
                field: "path",
                value: joined,
            });
        }

        let kind = match Self::text(raw, "type").as_deref() {
            Some("directory") | Some("folder") | Some("dir") => NodeKind::Directory,
            Some("file") | None => NodeKind::File,
            Some(other) => {
                return Err(MapError::InvalidValue {
                    entity: "file node",
                    field: "type",
                    value: other.to_string(),
                })
            }
        };

        let remote_id = match kind {
            NodeKind::File => raw.get("id").and_then(RemoteId::from_json),
            NodeKind::Directory => None,
        };

        Ok(FileNode {
            path,
            kind,
            remote_id,
            size: raw.get("size").and_then(Value::as_u64),
            source,
        })
    }

    /// Map a repository listing entry
    ///
    /// Falls back to the space's conventional URL when the record omits it.
    pub fn repository(
        raw: &Value,
        kind: RepositoryKind,
        project_key: &str,
        domain: &SpaceDomain,
        credentials: Option<Credentials>,
    ) -> MapResult<RepositoryRef> {
        let (name, url) = match kind {
            RepositoryKind::Git => {
                let name = Self::text(raw, "name")
                    .ok_or(MapError::MissingField { entity: "repository", field: "name" })?;
                let url = Self::text(raw, "httpUrl")
                    .unwrap_or_else(|| domain.git_url(project_key, &name));
                (name, url)
            }
            RepositoryKind::Svn => {
                let name = Self::text(raw, "name").unwrap_or_else(|| project_key.to_lowercase());
                let url = Self::text(raw, "svnUrl")
                    .or_else(|| Self::text(raw, "url"))
                    .unwrap_or_else(|| domain.svn_url(project_key));
                (name, url)
            }
        };

        Ok(RepositoryRef {
            name,
            kind,
            url,
            credentials,
        })
    }

    fn attachments(raw: &Value, owner: &AttachmentOwner) -> MapResult<Vec<AttachmentRef>> {
        let Some(items) = raw.get("attachments").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        items
            .iter()
            .map(|item| {
                let id = Self::id(item, "attachment", "id")?;
                Ok(AttachmentRef {
                    owner: owner.clone(),
                    file_name: Self::text(item, "name").unwrap_or_default(),
                    size: item.get("size").and_then(Value::as_u64),
                    id,
                })
            })
            .collect()
    }

    fn id(raw: &Value, entity: &'static str, field: &'static str) -> MapResult<RemoteId> {
        raw.get(field)
            .and_then(RemoteId::from_json)
            .ok_or(MapError::MissingField { entity, field })
    }

    /// String or number attribute as text; empty strings count as absent
    fn text(raw: &Value, field: &str) -> Option<String> {
        match raw.get(field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// `{"name": ...}` attribute as its name
    fn name_of(raw: &Value, field: &str) -> Option<String> {
        raw.get(field).and_then(|v| Self::text(v, "name"))
    }

    fn flag(raw: &Value, field: &str) -> bool {
        match raw.get(field) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    fn timestamp(raw: &Value, field: &str) -> Option<DateTime<Utc>> {
        let text = raw.get(field)?.as_str()?;
        DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Render a field value for tabular output
///
/// Objects with a `name` render as the name, arrays of them join with `, `.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(obj) => display_object(obj),
    }
}

fn display_object(obj: &Map<String, Value>) -> String {
    match obj.get("name") {
        Some(name) => display_value(name),
        None => Value::Object(obj.clone()).to_string(),
    }
}

/// Relative, `/`-separated form of a remote path: no empty or `.` segments
pub fn normalize_path(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
