//! Canonical/monitoring store persistence + allowlisted HTTP fetch.
//!
//! The canonical store (`baremes.json`) is the single source of truth read by
//! the downstream calculators; the monitoring file and per-run artifacts are
//! satellite audit data. All writes go through an atomic temp-file rename and
//! a stable serialization so that rewriting identical data is byte-identical
//! (and therefore skipped).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use veille_core::{CanonicalStore, Category, MonitoringFile, SourceProvenance};

pub mod fetch;

pub use fetch::{
    BackoffPolicy, FetchError, FetchedPage, FetcherConfig, HttpPageFetcher, PageFetcher,
};

pub const CRATE_NAME: &str = "veille-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt store file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("serializing {what}: {source}")]
    Serialize {
        what: &'static str,
        source: serde_json::Error,
    },
}

/// File layout under a single data directory:
/// `baremes.json`, `monitoring.json`, `official-sources.json` and per-run
/// audit artifacts under `runs/`.
#[derive(Debug, Clone)]
pub struct Store {
    data_dir: PathBuf,
}

impl Store {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn canonical_path(&self) -> PathBuf {
        self.data_dir.join("baremes.json")
    }

    pub fn monitoring_path(&self) -> PathBuf {
        self.data_dir.join("monitoring.json")
    }

    pub fn sources_path(&self) -> PathBuf {
        self.data_dir.join("official-sources.json")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }

    pub async fn load_canonical(&self) -> Result<CanonicalStore, StoreError> {
        self.load_or_default(&self.canonical_path()).await
    }

    pub async fn load_monitoring(&self) -> Result<MonitoringFile, StoreError> {
        self.load_or_default(&self.monitoring_path()).await
    }

    pub async fn load_official_sources(
        &self,
    ) -> Result<BTreeMap<Category, SourceProvenance>, StoreError> {
        self.load_or_default(&self.sources_path()).await
    }

    /// Write the canonical store. Returns `false` (and leaves the file
    /// untouched, same mtime) when the serialized bytes are identical to what
    /// is already on disk.
    pub async fn write_canonical(&self, store: &CanonicalStore) -> Result<bool, StoreError> {
        self.write_if_different(&self.canonical_path(), store, "canonical store")
            .await
    }

    pub async fn write_monitoring(&self, monitoring: &MonitoringFile) -> Result<bool, StoreError> {
        self.write_if_different(&self.monitoring_path(), monitoring, "monitoring file")
            .await
    }

    pub async fn write_official_sources(
        &self,
        sources: &BTreeMap<Category, SourceProvenance>,
    ) -> Result<bool, StoreError> {
        self.write_if_different(&self.sources_path(), sources, "official sources")
            .await
    }

    /// Persist one per-run audit artifact under `runs/`, named
    /// `agent-<category>-<timestamp>.json`. Written on every processed
    /// category, merged or not.
    pub async fn write_run_artifact<T: Serialize>(
        &self,
        category: Category,
        started_at: DateTime<Utc>,
        artifact: &T,
    ) -> Result<PathBuf, StoreError> {
        let stamp = started_at.format("%Y%m%d_%H%M%S");
        let path = self.runs_dir().join(format!("agent-{category}-{stamp}.json"));
        let bytes = stable_json(artifact, "run artifact")?;
        write_atomic(&path, &bytes).await?;
        Ok(path)
    }

    async fn load_or_default<T>(&self, path: &Path) -> Result<T, StoreError>
    where
        T: Default + serde::de::DeserializeOwned,
    {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(source) => Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    async fn write_if_different<T: Serialize>(
        &self,
        path: &Path,
        value: &T,
        what: &'static str,
    ) -> Result<bool, StoreError> {
        let bytes = stable_json(value, what)?;
        if let Ok(existing) = fs::read(path).await {
            if existing == bytes {
                debug!(path = %path.display(), "unchanged, skipping write");
                return Ok(false);
            }
        }
        write_atomic(path, &bytes).await?;
        Ok(true)
    }
}

/// Deterministic serialization: struct field order plus BTreeMap keys, pretty
/// printed with a trailing newline so repeated writes are byte-identical.
pub fn stable_json<T: Serialize>(value: &T, what: &'static str) -> Result<Vec<u8>, StoreError> {
    let mut bytes =
        serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize { what, source })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Write bytes through a same-directory temp file and rename, so the target
/// is never observed partially written.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).await.map_err(write_err)?;

    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(write_err)?;
    if let Err(source) = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await
    {
        let _ = fs::remove_file(&temp_path).await;
        return Err(write_err(source));
    }
    Ok(())
}
