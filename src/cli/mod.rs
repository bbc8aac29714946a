//! CLI command implementations

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backup::config::{RetryPolicy, MAX_ITEM_CONCURRENCY};
use crate::backup::{ProjectSelection, RateLimiter};
use crate::client::scrape::find_chromium;
use crate::client::{ApiClient, ChromiumSession, ScrapeClient};
use crate::shutdown::SharedShutdown;
use crate::{ArchiveFilter, Credentials, SpaceDomain};

pub mod backup;
pub mod error;
pub mod projects;

pub use backup::BackupArgs;
pub use error::CliError;
pub use projects::ProjectsArgs;

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_ITEM_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_ITEM_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Backlog space backup CLI
#[derive(Parser, Debug)]
#[command(name = "backlog-backup")]
#[command(about = "Back up issues, wiki, shared files and repositories of a Backlog space", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Space domain (e.g. example.backlog.com)
    #[arg(long, global = true, env = "BACKLOG_DOMAIN")]
    pub domain: Option<String>,

    /// API key
    #[arg(long, global = true, env = "BACKLOG_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Output directory
    #[arg(long, global = true, default_value = "backlog_backup")]
    pub output: PathBuf,

    /// Concurrent item fetches per category (default: 4, max: 16)
    ///
    /// Every fetch still passes through the shared one-request-per-second
    /// limiter, so higher values only help when responses are slow.
    #[arg(long, global = true, default_value = "4", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Maximum number of retries after rate-limit responses (default: 5, range: 1-20)
    #[arg(long, global = true, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: u32,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Web login user, enables the browser fallback
    #[arg(long, global = true, env = "BACKLOG_WEB_USER")]
    pub web_user: Option<String>,

    /// Web login password
    #[arg(long, global = true, env = "BACKLOG_WEB_PASSWORD", hide_env_values = true)]
    pub web_password: Option<String>,

    /// Git user
    #[arg(long, global = true, env = "BACKLOG_GIT_USER")]
    pub git_user: Option<String>,

    /// Git password or access token
    #[arg(long, global = true, env = "BACKLOG_GIT_PASSWORD", hide_env_values = true)]
    pub git_password: Option<String>,

    /// Subversion user
    #[arg(long, global = true, env = "BACKLOG_SVN_USER")]
    pub svn_user: Option<String>,

    /// Subversion password
    #[arg(long, global = true, env = "BACKLOG_SVN_PASSWORD", hide_env_values = true)]
    pub svn_password: Option<String>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Back up one project or every project
    Backup(BackupArgs),

    /// List projects without writing anything
    Projects(ProjectsArgs),
}

/// Project discovery options shared by both commands
#[derive(Args, Debug, Clone)]
pub struct DiscoveryArgs {
    /// Enumerate every project of the space through the web UI (needs web login)
    #[arg(long, default_value_t = false)]
    pub include_all_space_projects: bool,

    /// Archive filter: all, archived-only, non-archived-only
    #[arg(long, default_value = "all")]
    pub archived_projects: ArchiveFilter,
}

impl DiscoveryArgs {
    /// Selection when every project is requested
    pub fn selection(&self) -> ProjectSelection {
        if self.include_all_space_projects {
            ProjectSelection::AllSpace
        } else {
            ProjectSelection::AllAccessible
        }
    }
}

/// Accessors built from the global options
pub struct Clients {
    /// Parsed space domain
    pub domain: SpaceDomain,
    /// REST client
    pub api: Arc<ApiClient>,
    /// Browser client, when web credentials were given
    pub scrape: Option<Arc<ScrapeClient>>,
}

impl Cli {
    /// Parsed `--domain`
    pub fn space_domain(&self) -> Result<SpaceDomain, CliError> {
        let domain = self.domain.as_deref().ok_or_else(|| {
            CliError::ConfigurationError("--domain or BACKLOG_DOMAIN is required".into())
        })?;
        Ok(SpaceDomain::parse(domain)?)
    }

    /// Web login pair, if both halves are set
    pub fn web_credentials(&self) -> Option<Credentials> {
        pair(&self.web_user, &self.web_password)
    }

    /// Git credential pair, if both halves are set
    pub fn git_credentials(&self) -> Option<Credentials> {
        pair(&self.git_user, &self.git_password)
    }

    /// Subversion credential pair, if both halves are set
    pub fn svn_credentials(&self) -> Option<Credentials> {
        pair(&self.svn_user, &self.svn_password)
    }

    /// Build the API client and, with web credentials, the browser client
    ///
    /// Both share one rate limiter.
    pub fn clients(&self, shutdown: SharedShutdown) -> Result<Clients, CliError> {
        let domain = self.space_domain()?;
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                CliError::ConfigurationError("--api-key or BACKLOG_API_KEY is required".into())
            })?;

        let limiter = Arc::new(RateLimiter::new());
        let api = ApiClient::new(&domain, api_key, limiter.clone())?
            .with_retry_policy(RetryPolicy::default().with_max_rate_limit_retries(self.max_retries))
            .with_shutdown(shutdown);

        let scrape = match self.web_credentials() {
            Some(credentials) => {
                let executable = find_chromium();
                if executable.is_none() {
                    warn!("No Chromium executable found, relying on the default lookup");
                }
                info!(user = %credentials.username, "Browser fallback enabled");
                let session = ChromiumSession::new(executable);
                Some(Arc::new(ScrapeClient::new(
                    &domain,
                    credentials,
                    Box::new(session),
                    limiter,
                )?))
            }
            None => None,
        };

        Ok(Clients {
            domain,
            api: Arc::new(api),
            scrape,
        })
    }
}

fn pair(user: &Option<String>, password: &Option<String>) -> Option<Credentials> {
    match (user, password) {
        (Some(user), Some(password)) => Some(Credentials::new(user, password)),
        _ => None,
    }
}
