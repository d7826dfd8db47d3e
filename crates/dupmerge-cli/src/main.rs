use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use dupmerge_storage::Db;
use dupmerge_suggest::{run_daily, run_init, RunSummary, SuggestConfig, Window};

#[derive(Debug, Parser)]
#[command(name = "dupmerge")]
#[command(about = "Duplicate product merge suggestion jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile products created yesterday against the rest of the catalog.
    Daily,
    /// One-time full-catalog initialization pass.
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SuggestConfig::from_env();

    let result = run(cli.command, &config).await;
    if let Err(err) = &result {
        error!(error = ?err, "merge suggestion run failed");
    }
    result
}

async fn run(command: Commands, config: &SuggestConfig) -> Result<()> {
    let store = Db::connect(&config.database_url).await?;

    let summary = match command {
        Commands::Daily => {
            let window = Window::previous_day(Utc::now().date_naive());
            run_daily(&store, window).await?
        }
        Commands::Init => run_init(&store, Utc::now()).await?,
    };

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "run complete: run_id={} candidates={} groups={} memberships={}",
        summary.run_id,
        summary.candidate_titles,
        summary.groups_persisted,
        summary.memberships_inserted
    );
}
