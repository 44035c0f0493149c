//! Apply resolved categories and refunds to a normalized batch. Pure, no I/O.

use std::collections::BTreeMap;

use shopsync_core::{
    category_snapshot, ItemRefund, OrderBatch, OrderItemRecord, OrderRecord, ProductLookup,
    RefundKey, RefundLookup,
};

pub fn apply_categories(items: &mut [OrderItemRecord], products: &ProductLookup) {
    for item in items {
        item.category_snapshot = item
            .product_id
            .and_then(|id| category_snapshot(products.get(&id)));
    }
}

pub fn apply_refunds(
    orders: &mut [OrderRecord],
    items: &mut [OrderItemRecord],
    refunds: &RefundLookup,
) {
    for order in orders {
        let refund_total = refunds.get(&order.order_id).map_or(0.0, |r| r.refund_total);
        order.refund_total = refund_total;
        order.net_after_refunds = Some(order.net_total - refund_total);
    }

    // Lines sharing a (product, variation) key draw down one bucket in item
    // order, so the bucket is never attributed twice.
    let mut remaining: BTreeMap<(i64, RefundKey), ItemRefund> = BTreeMap::new();
    for item in items {
        let key = item.refund_key();
        let Some(order_refunds) = refunds.get(&item.order_id) else {
            item.refunded_quantity = 0;
            item.refunded_total = 0.0;
            continue;
        };
        let bucket = remaining
            .entry((item.order_id, key))
            .or_insert_with(|| order_refunds.item(key));
        let taken = take_from_bucket(bucket, item.quantity);
        item.refunded_quantity = taken.quantity;
        item.refunded_total = taken.total;
    }
}

/// Take up to `line_quantity` units from `bucket`, with the matching share of
/// its amount. A bucket without quantities (amount-only refund) goes whole to
/// the first line that draws on it.
fn take_from_bucket(bucket: &mut ItemRefund, line_quantity: i64) -> ItemRefund {
    let quantity = bucket.quantity.min(line_quantity.max(0)).max(0);
    let total = if bucket.quantity > 0 {
        bucket.total * quantity as f64 / bucket.quantity as f64
    } else {
        bucket.total
    };
    bucket.quantity -= quantity;
    bucket.total -= total;
    ItemRefund { quantity, total }
}

/// Produce loadable records from a normalized batch and its resolved enrichment.
pub fn reconcile(
    mut batch: OrderBatch,
    products: &ProductLookup,
    refunds: &RefundLookup,
) -> OrderBatch {
    apply_categories(&mut batch.items, products);
    apply_refunds(&mut batch.orders, &mut batch.items, refunds);
    batch
}
