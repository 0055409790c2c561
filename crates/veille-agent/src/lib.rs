//! Synchronization agent: source registry, due-check, diff/merge and the
//! per-category pipeline that keeps the canonical store reconciled with its
//! official sources.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::warn;

pub mod diff;
pub mod due;
pub mod holidays;
pub mod pipeline;
pub mod registry;

pub use diff::{merge, payloads_equal, MergeOutcome};
pub use due::is_due;
pub use holidays::french_holidays;
pub use pipeline::{CategoryReport, Pipeline, RunOptions, RunSummary};
pub use registry::{SourceRegistry, SourceSpec};

pub const CRATE_NAME: &str = "veille-agent";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub data_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub scheduler_enabled: bool,
    pub scheduler_cron: String,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("VEILLE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            user_agent: std::env::var("VEILLE_USER_AGENT")
                .unwrap_or_else(|_| "veille-agent/0.1".to_string()),
            http_timeout_secs: std::env::var("VEILLE_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            scheduler_enabled: std::env::var("VEILLE_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            scheduler_cron: std::env::var("VEILLE_SCHEDULER_CRON")
                .unwrap_or_else(|_| "0 0 6 * * *".to_string()),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }
}

/// Build the in-process scheduler when enabled. Each tick runs a full
/// due-gated pass over all categories.
pub async fn maybe_build_scheduler(config: &AgentConfig) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.scheduler_cron.clone();
    let job_config = config.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let config = job_config.clone();
        Box::pin(async move {
            match Pipeline::new(&config) {
                Ok(pipeline) => {
                    if let Err(err) = pipeline.run(RunOptions::default()).await {
                        warn!(%err, "scheduled run failed");
                    }
                }
                Err(err) => warn!(%err, "building pipeline for scheduled run failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
