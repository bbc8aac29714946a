//! Space domain parsing and validation
//!
//! A Backlog space is addressed by its host (`example.backlog.com`). Every
//! remote URL the crate uses (API base, web login, repository URLs) derives
//! from the parsed [`SpaceDomain`].

use std::fmt;
use url::Url;

/// Backlog space address
///
/// Input is case-insensitive; a scheme defaults to `https` and a trailing
/// slash is ignored.
///
/// # Examples
///
/// ```
/// use backlog_backup::space::SpaceDomain;
///
/// let domain = SpaceDomain::parse("Example.Backlog.com/").unwrap();
/// assert_eq!(domain.host(), "example.backlog.com");
/// assert_eq!(domain.api_base_url(), "https://example.backlog.com/api/v2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceDomain {
    origin: String,
    host: String,
}

impl SpaceDomain {
    /// Parse a domain such as `example.backlog.jp` or `https://example.backlog.jp/`
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty, is not a valid URL host, or
    /// carries a path beyond `/`.
    pub fn parse(s: &str) -> Result<Self, SpaceError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SpaceError::InvalidDomain(
                "domain cannot be empty".to_string(),
            ));
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        let url = Url::parse(&candidate)
            .map_err(|e| SpaceError::InvalidDomain(format!("{trimmed}: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(SpaceError::InvalidDomain(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        if url.path() != "/" || url.query().is_some() {
            return Err(SpaceError::InvalidDomain(format!(
                "{trimmed}: expected a bare host without path"
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| SpaceError::InvalidDomain(format!("{trimmed}: missing host")))?
            .to_lowercase();

        Ok(Self {
            origin: url.origin().ascii_serialization(),
            host,
        })
    }

    /// Host name (lowercase)
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Web origin, e.g. `https://example.backlog.com`
    pub fn web_base_url(&self) -> &str {
        &self.origin
    }

    /// REST API base, e.g. `https://example.backlog.com/api/v2`
    pub fn api_base_url(&self) -> String {
        format!("{}/api/v2", self.origin)
    }

    /// Git HTTPS URL used when the API does not report one
    pub fn git_url(&self, project_key: &str, repository: &str) -> String {
        format!("{}/git/{}/{}.git", self.origin, project_key, repository)
    }

    /// Subversion URL used when the API does not report one
    pub fn svn_url(&self, project_key: &str) -> String {
        format!("{}/svn/{}", self.origin, project_key)
    }
}

impl fmt::Display for SpaceDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

/// Validate and normalize a project key (`proj_1` becomes `PROJ_1`)
///
/// Keys start with a letter and contain only letters, digits and underscores.
pub fn parse_project_key(s: &str) -> Result<String, SpaceError> {
    let key = s.trim().to_uppercase();
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => {
            return Err(SpaceError::InvalidProjectKey(format!(
                "'{s}' must start with a letter"
            )))
        }
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SpaceError::InvalidProjectKey(format!(
            "'{s}' may only contain letters, digits and underscores"
        )));
    }
    Ok(key)
}

/// Errors that can occur while parsing space addresses
#[derive(Debug, thiserror::Error)]
pub enum SpaceError {
    /// Invalid space domain
    #[error("invalid space domain: {0}")]
    InvalidDomain(String),

    /// Invalid project key
    #[error("invalid project key: {0}")]
    InvalidProjectKey(String),
}
