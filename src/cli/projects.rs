//! Project listing command

use clap::Args;
use std::sync::Arc;

use super::{Cli, CliError, DiscoveryArgs};
use crate::backup::{BackupOptions, BackupOrchestrator};
use crate::repository::RepositoryFetcher;
use crate::shutdown::SharedShutdown;
use crate::Project;

const HEADERS: [&str; 4] = ["Project Key", "Project Name", "Project ID", "Archived"];

/// Projects command arguments
#[derive(Args, Debug)]
pub struct ProjectsArgs {
    /// Project discovery options
    #[command(flatten)]
    pub discovery: DiscoveryArgs,
}

impl ProjectsArgs {
    /// Discover projects and print them as a table
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let clients = cli.clients(shutdown.clone())?;
        let options = BackupOptions::new(&cli.output, self.discovery.selection())
            .with_archive_filter(self.discovery.archived_projects);

        let mut orchestrator = BackupOrchestrator::new(
            clients.domain,
            clients.api,
            Arc::new(RepositoryFetcher::new()),
            options,
        )
        .with_shutdown(shutdown);
        if let Some(scrape) = clients.scrape {
            orchestrator = orchestrator.with_scrape(scrape);
        }

        let projects = orchestrator.discover_projects().await?;
        println!("{}", format_project_table(&projects));
        println!("{} project(s)", projects.len());
        Ok(())
    }
}

/// Render projects as an aligned `|`-separated table
pub fn format_project_table(projects: &[Project]) -> String {
    let rows: Vec<[String; 4]> = projects
        .iter()
        .map(|p| {
            [
                p.key.clone(),
                p.name.clone(),
                p.id.to_string(),
                if p.archived { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: [&str; 4]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![line(HEADERS)];
    out.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for row in &rows {
        out.push(line([&row[0], &row[1], &row[2], &row[3]]));
    }
    out.join("\n")
}
