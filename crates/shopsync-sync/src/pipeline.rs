//! Sync orchestration: incremental and backfill modes over the shared batch
//! pipeline, plus the category-repair pass.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use shopsync_adapters::{CommerceSource, FixtureSource, WooCommerceSource};
use shopsync_core::{category_snapshot, OrderBatch, Watermark};
use shopsync_storage::{HttpClientConfig, HttpFetcher, WatermarkFile};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::merge::reconcile;
use crate::normalize::normalize_orders;
use crate::products::{ProductResolver, PRODUCT_BATCH_SIZE};
use crate::refunds::RefundReconciler;
use crate::report::{
    NoopReporter, RepairStats, ReportDirWriter, RunOutcome, RunReporter, RunSummary, SyncMode,
};
use crate::warehouse::Warehouse;
use crate::SyncError;

/// Bounded retry for the primary order fetch. Enrichment never retries here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairScope {
    /// Only rows whose snapshot is null or blank.
    Missing,
    /// Every referenced product, overwriting existing snapshots.
    All,
}

impl RepairScope {
    pub fn is_force(self) -> bool {
        matches!(self, RepairScope::All)
    }
}

/// When an incremental run also repairs category snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepairPolicy {
    /// Repair missing snapshots only when the run loaded nothing.
    #[default]
    WhenIdle,
    Always(RepairScope),
    Never,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub order_status: Option<String>,
    pub retry: RetryPolicy,
    pub product_batch_size: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            order_status: None,
            retry: RetryPolicy::default(),
            product_batch_size: PRODUCT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub orders: usize,
    pub items: usize,
    /// Cursor just past this batch's newest order.
    pub batch_watermark: Option<Watermark>,
    /// Cursor on disk after the batch was committed.
    pub stored_watermark: Option<Watermark>,
}

/// Cursor one minute past the newest order of a batch.
///
/// The batch must already be ascending by `order_date`; an out-of-order pair
/// is an error rather than a silently wrong cursor. Orders without a
/// timestamp do not contribute.
pub fn batch_watermark(batch: &OrderBatch) -> Result<Option<Watermark>, SyncError> {
    let dates: Vec<DateTime<Utc>> = batch.orders.iter().filter_map(|o| o.order_date).collect();
    if let Some(pos) = dates.windows(2).position(|pair| pair[0] > pair[1]) {
        return Err(SyncError::UnsortedBatch {
            previous: dates[pos],
            next: dates[pos + 1],
        });
    }
    Ok(dates.last().copied().map(Watermark::after_order))
}

pub struct SyncPipeline {
    source: Arc<dyn CommerceSource>,
    warehouse: Warehouse,
    watermarks: WatermarkFile,
    options: PipelineOptions,
    products: ProductResolver,
    refunds: RefundReconciler,
    reporter: Box<dyn RunReporter>,
}

impl SyncPipeline {
    pub fn new(
        source: Arc<dyn CommerceSource>,
        warehouse: Warehouse,
        watermarks: WatermarkFile,
        options: PipelineOptions,
    ) -> Self {
        let products =
            ProductResolver::new(source.clone()).with_batch_size(options.product_batch_size);
        let refunds = RefundReconciler::new(source.clone());
        Self {
            source,
            warehouse,
            watermarks,
            options,
            products,
            refunds,
            reporter: Box::<NoopReporter>::default(),
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn RunReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Wire a pipeline from configuration: upstream source, warehouse (schema
    /// ensured), watermark file and report directory.
    pub async fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let source: Arc<dyn CommerceSource> = match &config.fixture_path {
            Some(path) => {
                info!(path = %path.display(), "serving upstream data from fixture catalogue");
                Arc::new(FixtureSource::from_path(path)?)
            }
            None => {
                let http = HttpFetcher::new(HttpClientConfig {
                    timeout: Duration::from_secs(config.http_timeout_secs),
                    user_agent: Some(config.user_agent.clone()),
                    ..Default::default()
                })?;
                let source = WooCommerceSource::new(config.woocommerce(), http)
                    .map_err(|err| SyncError::Config(err.to_string()))?;
                Arc::new(source)
            }
        };

        let warehouse = Warehouse::connect(&config.warehouse_url).await?;
        warehouse.ensure_schema().await?;
        let watermarks = WatermarkFile::new(&config.state_path, config.default_lookback());
        let options = PipelineOptions {
            order_status: config.order_status.clone(),
            retry: RetryPolicy {
                attempts: config.order_fetch_attempts,
                delay: config.order_fetch_retry_delay,
            },
            product_batch_size: PRODUCT_BATCH_SIZE,
        };

        Ok(Self::new(source, warehouse, watermarks, options)
            .with_reporter(Box::new(ReportDirWriter::new(&config.reports_dir))))
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    pub fn watermarks(&self) -> &WatermarkFile {
        &self.watermarks
    }

    /// Fetch every order after `after`, retrying with a fixed delay.
    pub async fn fetch_orders_with_retry(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Vec<JsonValue>, SyncError> {
        let attempts = self.options.retry.attempts.max(1);
        let status = self.options.order_status.as_deref();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.source.fetch_orders(after, status).await {
                Ok(orders) => {
                    info!(
                        source = self.source.source_id(),
                        after = %after,
                        count = orders.len(),
                        attempt,
                        "fetched orders"
                    );
                    return Ok(orders);
                }
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "order fetch failed");
                    last_error = err.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.options.retry.delay).await;
                    }
                }
            }
        }

        Err(SyncError::OrderFetchExhausted {
            attempts,
            last_error,
        })
    }

    /// normalize -> resolve products and refunds -> merge -> load -> advance
    /// the stored watermark. The cursor is written only after the load commits.
    pub async fn process_batch(&self, raw: &[JsonValue]) -> Result<BatchOutcome, SyncError> {
        let batch = normalize_orders(raw);
        if batch.orders.is_empty() {
            return Ok(BatchOutcome::default());
        }
        let candidate = batch_watermark(&batch)?;

        let order_ids = batch.order_ids();
        let product_ids = batch.product_ids();
        let (products, refunds) = tokio::join!(
            self.products.resolve(product_ids),
            self.refunds.resolve(&order_ids)
        );

        let merged = reconcile(batch, &products, &refunds);
        let stats = self.warehouse.load(&merged).await?;

        let stored = match candidate {
            Some(watermark) => Some(self.watermarks.advance(watermark).await?),
            None => {
                warn!(orders = stats.orders, "batch has no order timestamps; watermark unchanged");
                None
            }
        };

        Ok(BatchOutcome {
            orders: stats.orders,
            items: stats.items,
            batch_watermark: candidate,
            stored_watermark: stored,
        })
    }

    pub async fn run_incremental(&self, policy: RepairPolicy) -> Result<RunSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, mode = "incremental");
        self.incremental(run_id, policy).instrument(span).await
    }

    async fn incremental(
        &self,
        run_id: Uuid,
        policy: RepairPolicy,
    ) -> Result<RunSummary, SyncError> {
        let started_at = Utc::now();
        let stored_before = self.watermarks.load().await?;
        let cursor = self.watermarks.get_at(started_at).await?;

        let raw = self.fetch_orders_with_retry(cursor.since).await?;
        let outcome = self.process_batch(&raw).await?;

        let repair_scope = match policy {
            RepairPolicy::WhenIdle if outcome.orders == 0 => Some(RepairScope::Missing),
            RepairPolicy::Always(scope) => Some(scope),
            _ => None,
        };
        let repair = match repair_scope {
            Some(scope) => Some(self.repair_categories(scope).await?),
            None => None,
        };

        let summary = RunSummary {
            run_id,
            mode: SyncMode::Incremental,
            started_at,
            finished_at: Utc::now(),
            batches: 1,
            orders_loaded: outcome.orders,
            items_loaded: outcome.items,
            repair,
            watermark_before: stored_before,
            watermark_after: self.watermarks.load().await?,
            outcome: if outcome.orders > 0 {
                RunOutcome::Loaded
            } else {
                RunOutcome::NoNewData
            },
        };
        self.finish(&summary).await;
        Ok(summary)
    }

    /// Backfill from `start` up to now in windows of `window`.
    pub async fn run_backfill(
        &self,
        start: DateTime<Utc>,
        window: chrono::Duration,
        scope: RepairScope,
    ) -> Result<RunSummary, SyncError> {
        self.run_backfill_until(start, Utc::now(), window, scope)
            .await
    }

    /// Walk the cursor from `start` to `end`. A window that yields orders moves
    /// the cursor past its newest order; an empty one jumps a full window. A
    /// final repair pass runs once the end is reached.
    pub async fn run_backfill_until(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        window: chrono::Duration,
        scope: RepairScope,
    ) -> Result<RunSummary, SyncError> {
        if window <= chrono::Duration::zero() {
            return Err(SyncError::Config(
                "backfill window must be positive".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, mode = "backfill");
        self.backfill(run_id, start, end, window, scope)
            .instrument(span)
            .await
    }

    async fn backfill(
        &self,
        run_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        window: chrono::Duration,
        scope: RepairScope,
    ) -> Result<RunSummary, SyncError> {
        let started_at = Utc::now();
        let before = self.watermarks.load().await?;
        let mut cursor = start;
        let mut batches = 0usize;
        let mut orders_loaded = 0usize;
        let mut items_loaded = 0usize;

        while cursor < end {
            let raw = self.fetch_orders_with_retry(cursor).await?;
            let outcome = self.process_batch(&raw).await?;
            batches += 1;
            orders_loaded += outcome.orders;
            items_loaded += outcome.items;

            let next = match outcome.batch_watermark {
                Some(watermark) if watermark.since > cursor => watermark.since,
                _ => cursor
                    .checked_add_signed(window)
                    .map_or(end, |next| next.min(end)),
            };
            info!(from = %cursor, to = %next, orders = outcome.orders, "backfill window done");
            cursor = next;
        }

        let repair = self.repair_categories(scope).await?;
        let after = self.watermarks.load().await?;

        let summary = RunSummary {
            run_id,
            mode: SyncMode::Backfill,
            started_at,
            finished_at: Utc::now(),
            batches,
            orders_loaded,
            items_loaded,
            repair: Some(repair),
            watermark_before: before,
            watermark_after: after,
            outcome: if orders_loaded > 0 {
                RunOutcome::Loaded
            } else {
                RunOutcome::NoNewData
            },
        };
        self.finish(&summary).await;
        Ok(summary)
    }

    /// Standalone repair run, reported like any other run.
    pub async fn run_repair(&self, scope: RepairScope) -> Result<RunSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, mode = "repair");
        self.repair_run(run_id, scope).instrument(span).await
    }

    async fn repair_run(&self, run_id: Uuid, scope: RepairScope) -> Result<RunSummary, SyncError> {
        let started_at = Utc::now();
        let watermark = self.watermarks.load().await?;
        let repair = self.repair_categories(scope).await?;
        let summary = RunSummary {
            run_id,
            mode: SyncMode::Repair,
            started_at,
            finished_at: Utc::now(),
            batches: 0,
            orders_loaded: 0,
            items_loaded: 0,
            repair: Some(repair),
            watermark_before: watermark,
            watermark_after: watermark,
            outcome: RunOutcome::Repaired,
        };
        self.finish(&summary).await;
        Ok(summary)
    }

    /// Re-resolve categories for warehouse rows. Never touches refund fields
    /// or the watermark.
    ///
    /// `Missing` only fills rows that are still null or blank and skips
    /// products that resolve to nothing. `All` rewrites every referenced
    /// product, including back to null when the product is gone.
    pub async fn repair_categories(&self, scope: RepairScope) -> Result<RepairStats, SyncError> {
        let force = scope.is_force();
        let ids = self.warehouse.products_needing_categories(force).await?;
        if ids.is_empty() {
            info!(force, "no products need category repair");
            return Ok(RepairStats::default());
        }

        let lookup = self.products.resolve(ids.iter().copied()).await;
        let snapshots: BTreeMap<i64, Option<String>> = ids
            .iter()
            .filter(|id| **id > 0)
            .map(|id| (*id, category_snapshot(lookup.get(id))))
            .filter(|(_, snapshot)| force || snapshot.is_some())
            .collect();
        let resolved = snapshots.values().filter(|s| s.is_some()).count();

        let rows_updated = self
            .warehouse
            .update_category_snapshots(&snapshots, force)
            .await?;
        info!(products = ids.len(), resolved, rows_updated, force, "category repair done");

        Ok(RepairStats {
            products: ids.len(),
            resolved,
            rows_updated,
        })
    }

    async fn finish(&self, summary: &RunSummary) {
        info!(
            run_id = %summary.run_id,
            mode = ?summary.mode,
            outcome = ?summary.outcome,
            orders = summary.orders_loaded,
            items = summary.items_loaded,
            "sync run finished"
        );
        if let Err(err) = self.reporter.record(summary).await {
            warn!(run_id = %summary.run_id, error = %err, "failed to record run summary");
        }
    }
}

pub async fn run_incremental_from_env(policy: RepairPolicy) -> Result<RunSummary, SyncError> {
    let config = SyncConfig::from_env()?;
    let pipeline = SyncPipeline::from_config(&config).await?;
    pipeline.run_incremental(policy).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shopsync_core::OrderRecord;

    fn order_at(order_id: i64, hour: Option<u32>) -> OrderRecord {
        OrderRecord {
            order_id,
            order_date: hour.and_then(|h| Utc.with_ymd_and_hms(2025, 5, 1, h, 0, 0).single()),
            status: None,
            currency: None,
            customer_id: None,
            discount_total: 0.0,
            discount_tax: 0.0,
            shipping_total: 0.0,
            shipping_tax: 0.0,
            cart_tax: 0.0,
            total_tax: 0.0,
            gross_total: 0.0,
            net_total: 0.0,
            refund_total: 0.0,
            net_after_refunds: None,
            billing_country: None,
            billing_city: None,
        }
    }

    #[test]
    fn watermark_is_one_minute_past_the_newest_order() {
        let batch = OrderBatch {
            orders: vec![order_at(1, Some(8)), order_at(2, None), order_at(3, Some(9))],
            items: vec![],
        };
        let watermark = batch_watermark(&batch).unwrap().unwrap();
        assert_eq!(
            watermark.since,
            Utc.with_ymd_and_hms(2025, 5, 1, 9, 1, 0).unwrap()
        );
    }

    #[test]
    fn unsorted_batches_are_rejected() {
        let batch = OrderBatch {
            orders: vec![order_at(1, Some(10)), order_at(2, Some(9))],
            items: vec![],
        };
        assert!(matches!(
            batch_watermark(&batch),
            Err(SyncError::UnsortedBatch { .. })
        ));
    }

    #[test]
    fn undated_batches_have_no_watermark() {
        let batch = OrderBatch {
            orders: vec![order_at(1, None)],
            items: vec![],
        };
        assert_eq!(batch_watermark(&batch).unwrap(), None);
        assert_eq!(batch_watermark(&OrderBatch::default()).unwrap(), None);
    }

    #[test]
    fn default_policies() {
        assert_eq!(RepairPolicy::default(), RepairPolicy::WhenIdle);
        assert_eq!(RetryPolicy::default().attempts, 3);
        assert!(RepairScope::All.is_force());
        assert!(!RepairScope::Missing.is_force());
    }
}
