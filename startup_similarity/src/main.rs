use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::telemetry::{get_tracing_subscriber, init_tracing_subscriber};
use serde::Serialize;
use startup_similarity::{
    configuration::get_configuration, domain::services::dataset_loader::load_dataset,
    startup::Application,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "startup_similarity")]
#[command(about = "Finds known startups similar to a startup idea", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embeds the dataset into the vector index, skipping unchanged startups
    Sync {
        /// Drops the collection and embeds every startup again
        #[arg(long)]
        force: bool,
        /// Overrides the configured dataset file
        #[arg(long)]
        dataset: Option<PathBuf>,
    },
    /// Prints the startups closest to an idea
    Search {
        idea: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Prints the analysis of an idea, with its similar startups when available
    Analyze {
        idea: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
}

/// Loads the configuration, sets up logging and wires the application, then runs one
/// subcommand. Results are printed as JSON on stdout.
///
/// A sync where some startups failed to embed exits with a failure code, so that a
/// scheduler can run it again: the next run only embeds what is missing.
#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let configuration = get_configuration().context("Failed to read configuration")?;

    // Logs go to stderr, stdout only carries results
    let tracing_subscriber = get_tracing_subscriber(
        configuration.application.name.clone(),
        configuration.application.log_level.clone(),
        configuration.application.log_format,
        std::io::stderr,
    );
    init_tracing_subscriber(tracing_subscriber)?;

    let application = Application::build(configuration)
        .await
        .context("Failed to build application")?;

    let exit_code = match cli.command {
        Commands::Sync { force, dataset } => {
            let path = dataset.unwrap_or_else(|| application.settings().dataset.path.clone());
            let dataset = load_dataset(&path)?;
            let report = application
                .sync_orchestrator()
                .sync(&dataset.records, force)
                .await?;

            print_json(&report)?;
            if report.failed > 0 {
                error!(failed = report.failed, "Some startups could not be embedded");
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Commands::Search { idea, top_k } => {
            let top_k = top_k.unwrap_or(application.settings().search.default_top_k);
            let results = application.similarity_search().search(&idea, top_k).await?;
            print_json(&results)?;
            ExitCode::SUCCESS
        }
        Commands::Analyze { idea, top_k } => {
            let analysis = match top_k {
                Some(top_k) => application.idea_analyzer().analyze_with(&idea, top_k).await,
                None => application.idea_analyzer().analyze(&idea).await,
            };
            print_json(&analysis)?;
            ExitCode::SUCCESS
        }
    };

    info!("👋 Bye!");
    Ok(exit_code)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
