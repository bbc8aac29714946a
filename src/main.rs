//! Main entry point for the backlog-backup CLI

use anyhow::Context;
use backlog_backup::cli::{Cli, Commands};
use backlog_backup::metrics::init_metrics;
use backlog_backup::shutdown::{listen_for_ctrl_c, ShutdownCoordinator};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Every category succeeded
const EXIT_SUCCESS: i32 = 0;
/// Run aborted (authentication, configuration or discovery failure)
const EXIT_ABORTED: i32 = 1;
/// Run finished with partial or failed categories, or was cancelled
const EXIT_INCOMPLETE: i32 = 2;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing(verbose: bool) {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let default_directive = if verbose {
        "backlog_backup=debug"
    } else {
        "backlog_backup=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    if let Some(addr) = cli.metrics_addr {
        init_metrics(addr).context("failed to start metrics exporter")?;
    }

    let shutdown = ShutdownCoordinator::shared();
    listen_for_ctrl_c(shutdown.clone());

    match &cli.command {
        Commands::Backup(args) => {
            let report = args
                .execute(&cli, shutdown)
                .await
                .context("backup aborted")?;
            Ok(if report.is_success() {
                EXIT_SUCCESS
            } else {
                EXIT_INCOMPLETE
            })
        }
        Commands::Projects(args) => {
            args.execute(&cli, shutdown)
                .await
                .context("project listing failed")?;
            Ok(EXIT_SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("Error: {e:#}");
            EXIT_ABORTED
        }
    };
    std::process::exit(code);
}
