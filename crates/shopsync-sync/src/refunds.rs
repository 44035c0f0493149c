//! Per-order refund history -> order totals and per-item refunded amounts.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use shopsync_adapters::{json_array, json_f64, json_i64, CommerceSource};
use shopsync_core::{OrderRefunds, RefundKey, RefundLookup};
use tracing::warn;

/// Fold refund events into one order-level result.
///
/// Amounts are summed as magnitudes: the upstream reports item lines of a
/// refund with negative quantity/total, the event amount as a positive value.
/// Unparseable amounts are skipped without discarding the rest of the event.
pub fn accumulate_refunds(events: &[JsonValue]) -> OrderRefunds {
    let mut out = OrderRefunds::default();
    for event in events {
        match json_f64(event, &["amount"]) {
            Some(amount) => out.refund_total += amount.abs(),
            None => warn!(refund_id = ?json_i64(event, &["id"]), "refund event without a usable amount"),
        }

        for line in json_array(event, &["line_items"]) {
            let key = RefundKey::new(
                json_i64(line, &["product_id"]),
                json_i64(line, &["variation_id"]),
            );
            let entry = out.items.entry(key).or_default();
            if let Some(quantity) = json_i64(line, &["quantity"]) {
                entry.quantity += quantity.abs();
            }
            if let Some(total) = json_f64(line, &["total"]) {
                entry.total += total.abs();
            }
        }
    }
    out
}

pub struct RefundReconciler {
    source: Arc<dyn CommerceSource>,
}

impl RefundReconciler {
    pub fn new(source: Arc<dyn CommerceSource>) -> Self {
        Self { source }
    }

    /// Resolve refunds for every order in `order_ids`. A failed fetch yields a
    /// zero-refund entry for that order only.
    pub async fn resolve(&self, order_ids: &[i64]) -> RefundLookup {
        let mut out = RefundLookup::new();
        for &order_id in order_ids {
            if out.contains_key(&order_id) {
                continue;
            }
            let refunds = match self.source.fetch_refunds(order_id).await {
                Ok(events) => accumulate_refunds(&events),
                Err(err) => {
                    warn!(order_id, error = %err, "refund lookup failed; treating order as unrefunded");
                    OrderRefunds::default()
                }
            };
            out.insert(order_id, refunds);
        }
        out
    }
}
