//! Backup command implementation

use clap::{ArgGroup, Args};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::{Cli, CliError, DiscoveryArgs};
use crate::backup::{
    BackupOptions, BackupOrchestrator, CategoryReport, CategoryStatus, ProgressSink,
    ProjectSelection, RunReport,
};
use crate::repository::RepositoryFetcher;
use crate::shutdown::SharedShutdown;
use crate::space::parse_project_key;
use crate::{Category, CategorySet};

/// Backup command arguments
#[derive(Args, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["project", "all_projects"])))]
pub struct BackupArgs {
    /// Project key to back up
    #[arg(long, value_parser = parse_project_key)]
    pub project: Option<String>,

    /// Back up every discovered project
    #[arg(long, default_value_t = false)]
    pub all_projects: bool,

    /// Project discovery options
    #[command(flatten)]
    pub discovery: DiscoveryArgs,

    /// Back up issues
    #[arg(long, default_value_t = false)]
    pub issues: bool,

    /// Back up wiki pages
    #[arg(long, default_value_t = false)]
    pub wiki: bool,

    /// Back up shared files
    #[arg(long, default_value_t = false)]
    pub files: bool,

    /// Back up git repositories
    #[arg(long, default_value_t = false)]
    pub git: bool,

    /// Back up the subversion repository
    #[arg(long, default_value_t = false)]
    pub svn: bool,

    /// Back up every category (the default when no category flag is given)
    #[arg(long, default_value_t = false)]
    pub all: bool,
}

impl BackupArgs {
    /// Requested categories; no flag means all of them
    pub fn categories(&self) -> CategorySet {
        if self.all {
            return CategorySet::all();
        }
        let flags = [
            (self.issues, Category::Issues),
            (self.wiki, Category::Wiki),
            (self.files, Category::Files),
            (self.git, Category::Git),
            (self.svn, Category::Svn),
        ];
        CategorySet::from_requested(
            flags
                .into_iter()
                .filter(|(on, _)| *on)
                .map(|(_, category)| category),
        )
    }

    /// Project selection implied by the arguments
    pub fn selection(&self) -> ProjectSelection {
        match &self.project {
            Some(key) if !self.all_projects => ProjectSelection::Single(key.clone()),
            _ => self.discovery.selection(),
        }
    }

    /// Execute the backup and print a per-category summary
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<RunReport, CliError> {
        let clients = cli.clients(shutdown.clone())?;

        let mut options = BackupOptions::new(&cli.output, self.selection())
            .with_categories(self.categories())
            .with_concurrency(cli.concurrency)
            .with_archive_filter(self.discovery.archived_projects);
        if let Some(credentials) = cli.git_credentials() {
            options = options.with_git_credentials(credentials);
        }
        if let Some(credentials) = cli.svn_credentials() {
            options = options.with_svn_credentials(credentials);
        }

        info!(
            domain = %clients.domain,
            output = %cli.output.display(),
            selection = ?options.selection,
            concurrency = options.concurrency,
            "Starting backup"
        );

        let mut orchestrator = BackupOrchestrator::new(
            clients.domain,
            clients.api,
            Arc::new(RepositoryFetcher::new()),
            options,
        )
        .with_shutdown(shutdown)
        .with_progress(Arc::new(BarProgress::new()));
        if let Some(scrape) = clients.scrape {
            orchestrator = orchestrator.with_scrape(scrape);
        }

        let report = orchestrator.run().await?;
        print_summary(&report);
        Ok(report)
    }
}

fn print_summary(report: &RunReport) {
    println!("\nBackup summary:");
    for line in report.summary_lines() {
        println!("  {line}");
    }
    println!(
        "{} succeeded, {} partial, {} failed, {} entities written",
        report.succeeded_count(),
        report.partial_count(),
        report.failed_count(),
        report.written_count()
    );
    if report.cancelled {
        println!("Run was cancelled before all projects were processed");
    }
}

/// One progress bar per running category
struct BarProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<(String, Category), ProgressBar>>,
}

impl BarProgress {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }
}

impl ProgressSink for BarProgress {
    fn category_started(&self, project: &str, category: Category, total: usize) {
        let bar = self.multi.add(ProgressBar::new(total as u64));
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_message(format!("{project} {category}"));
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert((project.to_string(), category), bar);
        }
    }

    fn item_finished(&self, project: &str, category: Category, _ok: bool) {
        if let Ok(bars) = self.bars.lock() {
            if let Some(bar) = bars.get(&(project.to_string(), category)) {
                bar.inc(1);
            }
        }
    }

    fn category_finished(&self, project: &str, report: &CategoryReport) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        if let Some(bar) = bars.remove(&(project.to_string(), report.category)) {
            let status = match &report.status {
                CategoryStatus::Succeeded => "done".to_string(),
                CategoryStatus::Partial => format!("{} failed", report.failed),
                CategoryStatus::Failed(reason) => format!("failed: {reason}"),
            };
            bar.finish_with_message(format!("{project} {} {status}", report.category));
        }
    }
}
