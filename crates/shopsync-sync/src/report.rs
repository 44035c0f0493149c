//! Run summaries and where they go after a run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shopsync_core::Watermark;
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Incremental,
    Backfill,
    Repair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Loaded,
    NoNewData,
    Repaired,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairStats {
    pub products: usize,
    pub resolved: usize,
    pub rows_updated: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub batches: usize,
    pub orders_loaded: usize,
    pub items_loaded: usize,
    pub repair: Option<RepairStats>,
    pub watermark_before: Option<Watermark>,
    pub watermark_after: Option<Watermark>,
    pub outcome: RunOutcome,
}

impl RunSummary {
    pub fn loaded_any(&self) -> bool {
        self.orders_loaded > 0
    }
}

/// Receives every finished run. Failures are logged by the caller and do not
/// change the run outcome.
#[async_trait]
pub trait RunReporter: Send + Sync {
    async fn record(&self, summary: &RunSummary) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct NoopReporter;

#[async_trait]
impl RunReporter for NoopReporter {
    async fn record(&self, _summary: &RunSummary) -> Result<()> {
        Ok(())
    }
}

/// Writes `<root>/<run_id>/summary.json`.
#[derive(Debug, Clone)]
pub struct ReportDirWriter {
    root: PathBuf,
}

impl ReportDirWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn summary_path(&self, run_id: Uuid) -> PathBuf {
        self.root.join(run_id.to_string()).join("summary.json")
    }
}

#[async_trait]
impl RunReporter for ReportDirWriter {
    async fn record(&self, summary: &RunSummary) -> Result<()> {
        let path = self.summary_path(summary.run_id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
