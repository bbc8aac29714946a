//! External VCS invocation
//!
//! [`RepositoryFetcher`] mirrors git repositories (`git clone --mirror`) and
//! checks out svn repositories (`svn checkout`); existing copies are refreshed
//! instead (`git remote update --prune`, `svn update`). Credentials reach the
//! tool through its environment or stdin and are never written to disk.
//! Nothing is retried; the outcome goes back to the orchestrator once.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::backup::config::TOOL_TIMEOUT;
use crate::{Credentials, RepositoryKind, RepositoryRef};

/// VCS tool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// Executable not found on PATH
    #[error("{0} executable not found")]
    MissingTool(String),

    /// Process could not be started or awaited
    #[error("failed to run {program}: {message}")]
    Spawn {
        /// Executable
        program: String,
        /// OS error
        message: String,
    },

    /// Process exceeded the tool timeout and was killed
    #[error("{program} timed out after {secs}s")]
    Timeout {
        /// Executable
        program: String,
        /// Timeout in seconds
        secs: u64,
    },

    /// Remote rejected the credentials
    #[error("authentication rejected: {0}")]
    AuthFailed(String),

    /// Non-zero exit
    #[error("{program} exited with {code}: {stderr}")]
    Exit {
        /// Executable
        program: String,
        /// Exit code, -1 when killed by a signal
        code: i32,
        /// Last stderr lines
        stderr: String,
    },

    /// Destination could not be prepared
    #[error("destination error: {0}")]
    Destination(String),
}

/// Result of one repository fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryOutcome {
    /// Clone/checkout or refresh completed
    Success {
        /// An existing copy was updated in place
        refreshed: bool,
    },
    /// Remote rejected the credentials
    AuthFailed(String),
    /// Missing binary, non-zero exit, timeout
    ToolError(String),
}

impl From<Result<bool, RepositoryError>> for RepositoryOutcome {
    fn from(result: Result<bool, RepositoryError>) -> Self {
        match result {
            Ok(refreshed) => Self::Success { refreshed },
            Err(RepositoryError::AuthFailed(message)) => Self::AuthFailed(message),
            Err(e) => Self::ToolError(e.to_string()),
        }
    }
}

/// Capability the orchestrator uses for git/svn categories
#[async_trait]
pub trait RepositoryFetch: Send + Sync {
    /// Clone or refresh `repository` into `dest_dir`
    async fn fetch(
        &self,
        repository: &RepositoryRef,
        credentials: Option<&Credentials>,
        dest_dir: &Path,
    ) -> RepositoryOutcome;
}

/// Invokes the system `git` and `svn` executables
#[derive(Debug, Clone)]
pub struct RepositoryFetcher {
    git_program: OsString,
    svn_program: OsString,
    timeout: Duration,
}

impl Default for RepositoryFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RepositoryFetcher {
    /// Fetcher using `git`/`svn` from PATH and the default tool timeout
    pub fn new() -> Self {
        Self {
            git_program: OsString::from("git"),
            svn_program: OsString::from("svn"),
            timeout: TOOL_TIMEOUT,
        }
    }

    /// Use specific executables
    pub fn with_programs(mut self, git: impl Into<OsString>, svn: impl Into<OsString>) -> Self {
        self.git_program = git.into();
        self.svn_program = svn.into();
        self
    }

    /// Override the per-invocation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn resolve(&self, program: &OsString) -> Result<PathBuf, RepositoryError> {
        which::which(program)
            .map_err(|_| RepositoryError::MissingTool(program.to_string_lossy().into_owned()))
    }

    async fn fetch_git(
        &self,
        repository: &RepositoryRef,
        credentials: Option<&Credentials>,
        dest_dir: &Path,
    ) -> Result<bool, RepositoryError> {
        let git = self.resolve(&self.git_program)?;
        let mut envs = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];
        if let Some(credentials) = credentials {
            let token = BASE64.encode(format!("{}:{}", credentials.username, credentials.password));
            envs.push(("GIT_CONFIG_COUNT".to_string(), "1".to_string()));
            envs.push(("GIT_CONFIG_KEY_0".to_string(), "http.extraHeader".to_string()));
            envs.push((
                "GIT_CONFIG_VALUE_0".to_string(),
                format!("Authorization: Basic {token}"),
            ));
        }

        if dest_dir.join("HEAD").is_file() {
            info!(repository = %repository.name, "Refreshing git mirror");
            let args: Vec<OsString> = vec!["remote".into(), "update".into(), "--prune".into()];
            self.run(&git, &args, &envs, None, Some(dest_dir)).await?;
            return Ok(true);
        }

        prepare_destination(dest_dir)?;
        info!(repository = %repository.name, "Cloning git mirror");
        let args: Vec<OsString> = vec![
            "clone".into(),
            "--mirror".into(),
            repository.url.clone().into(),
            dest_dir.as_os_str().to_owned(),
        ];
        self.run(&git, &args, &envs, None, None).await?;
        Ok(false)
    }

    async fn fetch_svn(
        &self,
        repository: &RepositoryRef,
        credentials: Option<&Credentials>,
        dest_dir: &Path,
    ) -> Result<bool, RepositoryError> {
        let svn = self.resolve(&self.svn_program)?;
        let refresh = dest_dir.join(".svn").is_dir();

        let mut args: Vec<OsString> = if refresh {
            vec!["update".into()]
        } else {
            vec!["checkout".into(), repository.url.clone().into()]
        };
        args.push(dest_dir.as_os_str().to_owned());
        args.push("--non-interactive".into());
        args.push("--no-auth-cache".into());

        let mut stdin = None;
        if let Some(credentials) = credentials {
            args.push("--username".into());
            args.push(credentials.username.clone().into());
            args.push("--password-from-stdin".into());
            stdin = Some(credentials.password.clone());
        }

        if refresh {
            info!(repository = %repository.name, "Updating svn checkout");
        } else {
            prepare_destination(dest_dir)?;
            info!(repository = %repository.name, "Checking out svn repository");
        }
        self.run(&svn, &args, &[], stdin, None).await?;
        Ok(refresh)
    }

    async fn run(
        &self,
        program: &Path,
        args: &[OsString],
        envs: &[(String, String)],
        stdin: Option<String>,
        cwd: Option<&Path>,
    ) -> Result<(), RepositoryError> {
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        debug!(program = %name, args = args.len(), "Spawning VCS tool");
        let mut child = cmd.spawn().map_err(|e| RepositoryError::Spawn {
            program: name.clone(),
            message: e.to_string(),
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| RepositoryError::Spawn {
                    program: name.clone(),
                    message: format!("failed to write stdin: {e}"),
                })?;
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(RepositoryError::Spawn {
                    program: name,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                warn!(program = %name, secs = self.timeout.as_secs(), "VCS tool timed out");
                return Err(RepositoryError::Timeout {
                    program: name,
                    secs: self.timeout.as_secs(),
                });
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr_tail(&stderr);
        if is_auth_failure(&stderr) {
            return Err(RepositoryError::AuthFailed(tail));
        }
        Err(RepositoryError::Exit {
            program: name,
            code: output.status.code().unwrap_or(-1),
            stderr: tail,
        })
    }
}

#[async_trait]
impl RepositoryFetch for RepositoryFetcher {
    async fn fetch(
        &self,
        repository: &RepositoryRef,
        credentials: Option<&Credentials>,
        dest_dir: &Path,
    ) -> RepositoryOutcome {
        let result = match repository.kind {
            RepositoryKind::Git => self.fetch_git(repository, credentials, dest_dir).await,
            RepositoryKind::Svn => self.fetch_svn(repository, credentials, dest_dir).await,
        };
        if let Err(e) = &result {
            warn!(repository = %repository.name, kind = %repository.kind, error = %e, "Repository fetch failed");
        }
        RepositoryOutcome::from(result)
    }
}

/// Create the parent and clear leftovers of an interrupted clone
fn prepare_destination(dest_dir: &Path) -> Result<(), RepositoryError> {
    if dest_dir.exists() {
        std::fs::remove_dir_all(dest_dir).map_err(|e| {
            RepositoryError::Destination(format!("{}: {e}", dest_dir.display()))
        })?;
    }
    if let Some(parent) = dest_dir.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| RepositoryError::Destination(format!("{}: {e}", parent.display())))?;
    }
    Ok(())
}

fn is_auth_failure(stderr: &str) -> bool {
    const PATTERNS: &[&str] = &[
        "authentication failed",
        "authorization failed",
        "could not read username",
        "could not read password",
        "invalid username or password",
        "terminal prompts disabled",
        "the requested url returned error: 401",
        "the requested url returned error: 403",
        "e170001",
        "e215004",
    ];
    let lower = stderr.to_lowercase();
    PATTERNS.iter().any(|p| lower.contains(p))
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines[lines.len().saturating_sub(3)..].join(" | ")
}
