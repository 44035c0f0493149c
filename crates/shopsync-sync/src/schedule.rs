//! Cron-driven incremental sync.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::pipeline::{RepairPolicy, SyncPipeline};
use crate::report::RunSummary;
use crate::SyncError;

/// Run one incremental sync unless another run holds `gate`.
/// Returns `None` when the tick was skipped.
pub async fn run_exclusive(
    gate: &Mutex<()>,
    pipeline: &SyncPipeline,
    policy: RepairPolicy,
) -> Option<Result<RunSummary, SyncError>> {
    let Ok(_guard) = gate.try_lock() else {
        warn!("previous sync run still in flight; skipping tick");
        return None;
    };
    Some(pipeline.run_incremental(policy).await)
}

/// Scheduler that runs incremental sync on `config.sync_cron`, or `None` when
/// scheduling is disabled. The caller starts it.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    pipeline: Arc<SyncPipeline>,
    policy: RepairPolicy,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let gate = Arc::new(Mutex::new(()));
    let cron = config.sync_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let pipeline = pipeline.clone();
        let gate = gate.clone();
        Box::pin(async move {
            match run_exclusive(&gate, &pipeline, policy).await {
                Some(Ok(summary)) => info!(
                    run_id = %summary.run_id,
                    orders = summary.orders_loaded,
                    "scheduled sync finished"
                ),
                Some(Err(err)) => error!(error = %err, "scheduled sync failed"),
                None => {}
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    info!(cron, "sync scheduler configured");
    Ok(Some(sched))
}
