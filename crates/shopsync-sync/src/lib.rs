//! Sync engine: normalization, enrichment, reconciliation, warehouse load and
//! the orchestrator that drives them.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod config;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod products;
pub mod refunds;
pub mod report;
pub mod schedule;
pub mod warehouse;

pub use config::SyncConfig;
pub use merge::{apply_categories, apply_refunds, reconcile};
pub use normalize::{normalize_order, normalize_orders};
pub use pipeline::{
    batch_watermark, run_incremental_from_env, BatchOutcome, PipelineOptions, RepairPolicy,
    RepairScope, RetryPolicy, SyncPipeline,
};
pub use products::{ProductResolver, PRODUCT_BATCH_SIZE};
pub use refunds::{accumulate_refunds, RefundReconciler};
pub use report::{
    NoopReporter, RepairStats, ReportDirWriter, RunOutcome, RunReporter, RunSummary, SyncMode,
};
pub use schedule::{maybe_build_scheduler, run_exclusive};
pub use warehouse::{LoadStats, Warehouse, ORDER_COLUMNS, ORDER_ITEM_COLUMNS};

pub const CRATE_NAME: &str = "shopsync-sync";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("order fetch failed after {attempts} attempt(s): {last_error}")]
    OrderFetchExhausted { attempts: usize, last_error: String },
    #[error("order batch is not ascending by creation time: {next} follows {previous}")]
    UnsortedBatch {
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
