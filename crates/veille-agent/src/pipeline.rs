//! Per-category reconciliation pipeline.
//!
//! Registry → due-check → (if due) fetch → build → diff → write. Categories
//! are processed sequentially: the external hosts are rate-courteous targets
//! and the per-category single-writer constraint then holds by construction.
//! A failure in one category never aborts the others; only a canonical-store
//! write failure is fatal for the run.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Days, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use veille_core::{Category, ChangelogEntry, Payload, SourceProvenance};
use veille_evidence::{build_candidate, extract_snippet, extract_title};
use veille_store::{FetcherConfig, HttpPageFetcher, PageFetcher, Store};

use crate::diff::merge;
use crate::due::is_due;
use crate::holidays::french_holidays;
use crate::registry::SourceRegistry;
use crate::AgentConfig;

/// Full audit record of one category's sync attempt, persisted under `runs/`
/// whether or not the candidate was merged.
#[derive(Debug, Clone, Serialize)]
pub struct RunArtifact {
    pub run_id: Uuid,
    pub category: Category,
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub provenance: SourceProvenance,
    pub payload: Payload,
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryReport {
    pub category: Category,
    pub due: bool,
    pub verified: bool,
    pub changed: bool,
    pub url: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub processed: usize,
    pub changed: usize,
    pub reports: Vec<CategoryReport>,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Process a single category; `None` processes all known categories.
    pub category: Option<Category>,
    /// Operator escape hatch: treat every category as due.
    pub fetch_all: bool,
    /// When false, skip the due-check and process regardless (`--due=false`).
    pub due_gating: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            category: None,
            fetch_all: false,
            due_gating: true,
        }
    }
}

pub struct Pipeline {
    registry: SourceRegistry,
    store: Store,
    fetcher: Box<dyn PageFetcher>,
}

impl Pipeline {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let registry = SourceRegistry::load_or_builtin(&config.data_dir)?;
        let fetcher = HttpPageFetcher::new(FetcherConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..FetcherConfig::default()
        })
        .map_err(anyhow::Error::new)
        .context("building http fetcher")?;
        Ok(Self {
            registry,
            store: Store::new(&config.data_dir),
            fetcher: Box::new(fetcher),
        })
    }

    /// Test/embedding constructor with an explicit registry and transport.
    pub fn with_parts(registry: SourceRegistry, store: Store, fetcher: Box<dyn PageFetcher>) -> Self {
        Self {
            registry,
            store,
            fetcher,
        }
    }

    pub async fn run(&self, options: RunOptions) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let today = started_at.date_naive();

        let mut canonical = self
            .store
            .load_canonical()
            .await
            .context("loading canonical store")?;
        let mut monitoring = self
            .store
            .load_monitoring()
            .await
            .context("loading monitoring file")?;
        let mut latest_sources = self
            .store
            .load_official_sources()
            .await
            .context("loading official sources")?;

        let categories: Vec<Category> = match options.category {
            Some(category) => vec![category],
            None => Category::ALL.to_vec(),
        };

        let mut reports = Vec::new();
        let mut any_changed = false;

        for category in categories {
            let Some(spec) = self.registry.spec_for(category) else {
                warn!(%category, "no source registry entry, skipping");
                continue;
            };

            let due = options.fetch_all
                || !options.due_gating
                || is_due(spec, monitoring.record(category), today);
            if !due {
                info!(%category, "not due, skipping");
                reports.push(CategoryReport {
                    category,
                    due: false,
                    verified: false,
                    changed: false,
                    url: spec.primary_url().to_string(),
                    error: None,
                });
                continue;
            }

            let url = spec.primary_url().to_string();
            let outcome = self.fetcher.fetch(&url, &spec.allowed_domains).await;
            let previous = canonical.get(category).map(|r| r.payload.clone());
            let candidate = build_candidate(category, &url, &outcome, previous.as_ref(), Utc::now());

            let page = outcome.as_ref().ok();
            let title = page.and_then(|p| extract_title(&p.body));
            let snippet = page.map(|p| extract_snippet(&p.body, &spec.snippet_keyword));

            // A failed fetch is recorded but never touches the canonical
            // store, even on a first run.
            let (changed, summary) = match &candidate.provenance.error {
                Some(message) => {
                    warn!(%category, error = %message, "check failed");
                    (false, format!("check failed: {message}"))
                }
                None => {
                    let current = canonical.get(category).cloned();
                    let merged = merge(current.as_ref(), &candidate.payload, Utc::now());
                    if merged.changed {
                        canonical.insert(category, merged.next);
                        any_changed = true;
                        let flag = if candidate.provenance.verified {
                            ""
                        } else {
                            " (unverified)"
                        };
                        (true, format!("updated {} payload{flag}", candidate.payload.kind()))
                    } else {
                        (false, "checked, no change".to_string())
                    }
                }
            };

            let artifact = RunArtifact {
                run_id,
                category,
                url: candidate.provenance.url.clone(),
                title,
                snippet,
                provenance: candidate.provenance.clone(),
                payload: candidate.payload.clone(),
                changed,
            };
            self.store
                .write_run_artifact(category, started_at, &artifact)
                .await
                .context("writing run artifact")?;

            let record = monitoring.record_mut(category);
            record.last_check = Some(today);
            if let Some(date) = candidate.provenance.publication_date.as_date() {
                record.last_publication_date = Some(date);
            }
            record.next_expected_update =
                today.checked_add_days(Days::new(u64::from(spec.recheck_interval_days)));
            record.changelog.push(ChangelogEntry {
                date: today,
                category,
                verified: candidate.provenance.verified,
                summary,
            });

            latest_sources.insert(category, candidate.provenance.clone());

            reports.push(CategoryReport {
                category,
                due: true,
                verified: candidate.provenance.verified,
                changed,
                url: candidate.provenance.url.clone(),
                error: candidate.provenance.error.clone(),
            });
        }

        // Holiday tables for the current and next year are derived locally
        // on every run, diff-gated like the fetched payloads.
        let current_year = today.year();
        for year in [current_year, current_year + 1] {
            if canonical.set_holidays(year, french_holidays(year)) {
                any_changed = true;
            }
        }

        // Canonical first: the monitoring record must never claim a check
        // whose store write was lost.
        if any_changed {
            self.store
                .write_canonical(&canonical)
                .await
                .context("writing canonical store")?;
        }
        self.store
            .write_monitoring(&monitoring)
            .await
            .context("writing monitoring file")?;
        self.store
            .write_official_sources(&latest_sources)
            .await
            .context("writing official sources")?;

        let finished_at = Utc::now();
        let changed = reports.iter().filter(|r| r.changed).count();
        let processed = reports.iter().filter(|r| r.due).count();
        info!(%run_id, processed, changed, "run complete");

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at,
            processed,
            changed,
            reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;
    use veille_core::{CanonicalRecord, CanonicalStore, DueRule, MonitoringFile, MonitoringRecord};
    use veille_evidence::builder::reference_payload;
    use veille_store::{FetchError, FetchedPage};

    use crate::registry::SourceSpec;

    struct MockFetcher {
        calls: Arc<AtomicUsize>,
        outcome: Result<FetchedPage, FetchError>,
    }

    #[async_trait]
    impl PageFetcher for MockFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _allowed_domains: &[String],
        ) -> Result<FetchedPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn notaire_registry(rule: DueRule) -> SourceRegistry {
        SourceRegistry {
            sources: vec![SourceSpec {
                category: Category::Notaire,
                source_urls: vec!["https://www.notaires.fr/fr/les-baremes-notariaux".to_string()],
                allowed_domains: vec!["notaires.fr".to_string()],
                snippet_keyword: "émoluments".to_string(),
                due_rule: rule,
                recheck_interval_days: 365,
            }],
        }
    }

    fn verified_notaire_page() -> FetchedPage {
        let body = "<title>Barèmes</title> émoluments 0.0387 0.01596 0.01064 0.00799, \
                    publié le 2 janvier 2026"
            .to_string();
        FetchedPage {
            url: "https://www.notaires.fr/fr/les-baremes-notariaux".to_string(),
            status: 200,
            body: body.clone(),
            fetched_at: Utc::now(),
            content_sha256: veille_store::fetch::sha256_hex(body.as_bytes()),
        }
    }

    fn pipeline_with(
        dir: &std::path::Path,
        registry: SourceRegistry,
        outcome: Result<FetchedPage, FetchError>,
    ) -> (Pipeline, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = MockFetcher {
            calls: calls.clone(),
            outcome,
        };
        let pipeline = Pipeline::with_parts(registry, Store::new(dir), Box::new(fetcher));
        (pipeline, calls)
    }

    fn run_options(category: Option<Category>, fetch_all: bool) -> RunOptions {
        RunOptions {
            category,
            fetch_all,
            due_gating: true,
        }
    }

    #[tokio::test]
    async fn not_due_skips_fetch_and_leaves_monitoring_untouched() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());

        let mut monitoring = MonitoringFile::default();
        *monitoring.record_mut(Category::Notaire) = MonitoringRecord {
            last_check: Some(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()),
            next_expected_update: Some(NaiveDate::from_ymd_opt(2099, 1, 1).unwrap()),
            ..MonitoringRecord::default()
        };
        store.write_monitoring(&monitoring).await.unwrap();

        let (pipeline, calls) = pipeline_with(
            dir.path(),
            notaire_registry(DueRule::NextCheckReached),
            Ok(verified_notaire_page()),
        );
        let summary = pipeline
            .run(run_options(Some(Category::Notaire), false))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0, "fetcher must not be invoked");
        assert_eq!(summary.processed, 0);
        assert!(!summary.reports[0].due);

        let reloaded = store.load_monitoring().await.unwrap();
        let record = reloaded.record(Category::Notaire).unwrap();
        assert_eq!(
            record.next_expected_update,
            Some(NaiveDate::from_ymd_opt(2099, 1, 1).unwrap())
        );
        assert!(record.changelog.is_empty());
    }

    #[tokio::test]
    async fn fetch_all_overrides_due_gating() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());

        let mut monitoring = MonitoringFile::default();
        *monitoring.record_mut(Category::Notaire) = MonitoringRecord {
            next_expected_update: Some(NaiveDate::from_ymd_opt(2099, 1, 1).unwrap()),
            ..MonitoringRecord::default()
        };
        store.write_monitoring(&monitoring).await.unwrap();

        let (pipeline, calls) = pipeline_with(
            dir.path(),
            notaire_registry(DueRule::NextCheckReached),
            Ok(verified_notaire_page()),
        );
        let summary = pipeline
            .run(run_options(Some(Category::Notaire), true))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.processed, 1);
        assert!(summary.reports[0].verified);
    }

    #[tokio::test]
    async fn transport_failure_does_not_regress_the_canonical_store() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());

        let mut canonical = CanonicalStore::default();
        canonical.insert(
            Category::Notaire,
            CanonicalRecord {
                payload: reference_payload(Category::Notaire),
                updated_at: Utc::now(),
            },
        );
        let this_year = Utc::now().date_naive().year();
        for year in [this_year, this_year + 1] {
            canonical.set_holidays(year, french_holidays(year));
        }
        store.write_canonical(&canonical).await.unwrap();
        let before = std::fs::read(store.canonical_path()).unwrap();

        let (pipeline, _calls) = pipeline_with(
            dir.path(),
            notaire_registry(DueRule::Always),
            Err(FetchError::Transport {
                url: "https://www.notaires.fr/fr/les-baremes-notariaux".to_string(),
                message: "dns failure".to_string(),
            }),
        );
        let summary = pipeline
            .run(run_options(Some(Category::Notaire), false))
            .await
            .unwrap();

        assert_eq!(summary.changed, 0);
        assert!(summary.reports[0].error.as_deref().unwrap().contains("dns failure"));

        let after = std::fs::read(store.canonical_path()).unwrap();
        assert_eq!(before, after, "canonical store must be untouched");

        let monitoring = store.load_monitoring().await.unwrap();
        let record = monitoring.record(Category::Notaire).unwrap();
        assert_eq!(record.changelog.len(), 1);
        assert!(!record.changelog[0].verified);
        assert!(record.changelog[0].summary.contains("check failed"));
    }

    #[tokio::test]
    async fn failed_first_fetch_creates_no_canonical_record() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());

        let (pipeline, _calls) = pipeline_with(
            dir.path(),
            notaire_registry(DueRule::Always),
            Err(FetchError::Http {
                status: 503,
                url: "https://www.notaires.fr/fr/les-baremes-notariaux".to_string(),
            }),
        );
        pipeline
            .run(run_options(Some(Category::Notaire), false))
            .await
            .unwrap();

        let canonical = store.load_canonical().await.unwrap();
        assert!(canonical.get(Category::Notaire).is_none());
    }

    #[tokio::test]
    async fn second_identical_run_is_a_byte_identical_noop() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());

        let (pipeline, _calls) = pipeline_with(
            dir.path(),
            notaire_registry(DueRule::Always),
            Ok(verified_notaire_page()),
        );

        let first = pipeline
            .run(run_options(Some(Category::Notaire), true))
            .await
            .unwrap();
        assert_eq!(first.changed, 1);
        let bytes_after_first = std::fs::read(store.canonical_path()).unwrap();

        let second = pipeline
            .run(run_options(Some(Category::Notaire), true))
            .await
            .unwrap();
        assert_eq!(second.changed, 0);
        let bytes_after_second = std::fs::read(store.canonical_path()).unwrap();
        assert_eq!(bytes_after_first, bytes_after_second);

        let monitoring = store.load_monitoring().await.unwrap();
        let record = monitoring.record(Category::Notaire).unwrap();
        assert_eq!(record.changelog.len(), 2);
        assert!(record.changelog[1].summary.contains("no change"));
    }

    #[tokio::test]
    async fn every_run_maintains_holiday_tables_for_current_and_next_year() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());

        let (pipeline, calls) = pipeline_with(
            dir.path(),
            notaire_registry(DueRule::NextCheckReached),
            Ok(verified_notaire_page()),
        );

        let mut monitoring = MonitoringFile::default();
        *monitoring.record_mut(Category::Notaire) = MonitoringRecord {
            next_expected_update: Some(NaiveDate::from_ymd_opt(2099, 1, 1).unwrap()),
            ..MonitoringRecord::default()
        };
        store.write_monitoring(&monitoring).await.unwrap();

        let summary = pipeline
            .run(run_options(Some(Category::Notaire), false))
            .await
            .unwrap();

        // Nothing was due, yet the derived calendar is still written.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let this_year = summary.started_at.date_naive().year();
        let canonical = store.load_canonical().await.unwrap();
        for year in [this_year, this_year + 1] {
            let holidays = canonical.holidays(year).expect("holiday table");
            assert_eq!(holidays, french_holidays(year).as_slice());
        }
        assert!(canonical.holidays(this_year + 2).is_none());

        // Recomputation is deterministic, so a second pass changes nothing.
        let bytes_before = std::fs::read(store.canonical_path()).unwrap();
        pipeline
            .run(run_options(Some(Category::Notaire), false))
            .await
            .unwrap();
        let bytes_after = std::fs::read(store.canonical_path()).unwrap();
        assert_eq!(bytes_before, bytes_after);
    }

    #[tokio::test]
    async fn successful_check_advances_monitoring_and_writes_artifact() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path());

        let (pipeline, _calls) = pipeline_with(
            dir.path(),
            notaire_registry(DueRule::Always),
            Ok(verified_notaire_page()),
        );
        let summary = pipeline
            .run(run_options(Some(Category::Notaire), false))
            .await
            .unwrap();

        let today = summary.started_at.date_naive();
        let monitoring = store.load_monitoring().await.unwrap();
        let record = monitoring.record(Category::Notaire).unwrap();
        assert_eq!(record.last_check, Some(today));
        assert_eq!(
            record.last_publication_date,
            Some(NaiveDate::from_ymd_opt(2026, 1, 2).unwrap())
        );
        assert_eq!(
            record.next_expected_update,
            today.checked_add_days(Days::new(365))
        );

        let runs: Vec<_> = std::fs::read_dir(store.runs_dir()).unwrap().collect();
        assert_eq!(runs.len(), 1);

        let sources = store.load_official_sources().await.unwrap();
        assert!(sources.get(&Category::Notaire).unwrap().verified);
    }
}
