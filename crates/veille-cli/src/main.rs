use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use veille_agent::{is_due, AgentConfig, Pipeline, RunOptions, SourceRegistry};
use veille_core::Category;
use veille_store::Store;

#[derive(Debug, Parser)]
#[command(name = "veille")]
#[command(about = "Regulatory parameter sync agent for the French official sources")]
struct Cli {
    /// Override the data directory (default: VEILLE_DATA_DIR or ./data).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one due-gated pass (the default command).
    Run {
        /// Process a single category cluster (notaire, dmto, ik, ir, smic, apl).
        #[arg(long)]
        cluster: Option<String>,
        /// Respect the per-category due rules.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        due: bool,
        /// Process every category regardless of due rules.
        #[arg(long)]
        fetch_all: bool,
    },
    /// Print the monitoring calendar with overdue flags.
    Status,
    /// Stay resident and run scheduled passes (VEILLE_SCHEDULER_CRON).
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AgentConfig::from_env();
    if let Some(data_dir) = cli.data_dir {
        config = config.with_data_dir(data_dir);
    }

    match cli.command.unwrap_or(Commands::Run {
        cluster: None,
        due: true,
        fetch_all: false,
    }) {
        Commands::Run {
            cluster,
            due,
            fetch_all,
        } => run_once(&config, cluster.as_deref(), due, fetch_all).await,
        Commands::Status => print_status(&config).await,
        Commands::Watch => watch(config).await,
    }
}

async fn run_once(
    config: &AgentConfig,
    cluster: Option<&str>,
    due: bool,
    fetch_all: bool,
) -> Result<()> {
    let category = match cluster {
        Some(name) => match Category::from_cli(name) {
            Some(category) => Some(category),
            None => bail!(
                "unknown cluster {name:?}; expected one of: {}",
                Category::ALL.map(|c| c.as_str()).join(", ")
            ),
        },
        None => None,
    };

    let pipeline = Pipeline::new(config)?;
    let summary = pipeline
        .run(RunOptions {
            category,
            fetch_all,
            due_gating: due,
        })
        .await?;

    for report in &summary.reports {
        if !report.due {
            println!("{:<8} not due, skipped", report.category);
            continue;
        }
        let status = match &report.error {
            Some(error) => format!("FAILED: {error}"),
            None if report.changed => "updated".to_string(),
            None => "no change".to_string(),
        };
        println!(
            "{:<8} {status} (verified: {}) {}",
            report.category, report.verified, report.url
        );
    }
    println!(
        "run {} finished: {} processed, {} changed",
        summary.run_id, summary.processed, summary.changed
    );
    Ok(())
}

async fn print_status(config: &AgentConfig) -> Result<()> {
    let store = Store::new(&config.data_dir);
    let monitoring = store.load_monitoring().await?;
    let registry = SourceRegistry::load_or_builtin(&config.data_dir)?;
    let today = Utc::now().date_naive();

    for category in Category::ALL {
        let record = monitoring.record(category);
        let due = registry
            .spec_for(category)
            .map(|spec| is_due(spec, record, today))
            .unwrap_or(false);
        let last_check = record
            .and_then(|r| r.last_check)
            .map(|d| d.to_string())
            .unwrap_or_else(|| "never".to_string());
        let next = record
            .and_then(|r| r.next_expected_update)
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} last check: {:<10} next expected: {:<10} {}",
            category,
            last_check,
            next,
            if due { "DUE" } else { "ok" }
        );
    }
    Ok(())
}

async fn watch(mut config: AgentConfig) -> Result<()> {
    config.scheduler_enabled = true;
    let Some(mut scheduler) = veille_agent::maybe_build_scheduler(&config).await? else {
        bail!("scheduler could not be enabled");
    };
    scheduler.start().await?;
    println!("watching (cron: {}), ctrl-c to stop", config.scheduler_cron);
    tokio::signal::ctrl_c().await?;
    scheduler.shutdown().await?;
    Ok(())
}
