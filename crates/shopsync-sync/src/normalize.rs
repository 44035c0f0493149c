//! Flatten raw order payloads into `orders` / `order_items` rows.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use shopsync_adapters::{json_array, json_f64, json_i64, json_text, order_created_at};
use shopsync_core::{OrderBatch, OrderItemRecord, OrderRecord};
use tracing::warn;

fn money(value: &JsonValue, key: &str) -> f64 {
    json_f64(value, &[key]).unwrap_or(0.0)
}

pub fn normalize_order(order: &JsonValue) -> Option<(OrderRecord, Vec<OrderItemRecord>)> {
    let order_id = json_i64(order, &["id"])?;
    let gross_total = money(order, "total");
    let total_tax = money(order, "total_tax");

    let record = OrderRecord {
        order_id,
        order_date: order_created_at(order),
        status: json_text(order, &["status"]),
        currency: json_text(order, &["currency"]),
        customer_id: json_i64(order, &["customer_id"]),
        discount_total: money(order, "discount_total"),
        discount_tax: money(order, "discount_tax"),
        shipping_total: money(order, "shipping_total"),
        shipping_tax: money(order, "shipping_tax"),
        cart_tax: money(order, "cart_tax"),
        total_tax,
        gross_total,
        net_total: gross_total - total_tax,
        refund_total: 0.0,
        net_after_refunds: None,
        billing_country: json_text(order, &["billing", "country"]),
        billing_city: json_text(order, &["billing", "city"]),
    };

    let items = json_array(order, &["line_items"])
        .iter()
        .map(|line| OrderItemRecord {
            order_id,
            product_id: json_i64(line, &["product_id"]),
            variation_id: json_i64(line, &["variation_id"]),
            sku: json_text(line, &["sku"]),
            name: json_text(line, &["name"]),
            quantity: json_i64(line, &["quantity"]).unwrap_or(0),
            price: money(line, "price"),
            total: money(line, "total"),
            subtotal: money(line, "subtotal"),
            tax_class: json_text(line, &["tax_class"]),
            category_snapshot: None,
            refunded_quantity: 0,
            refunded_total: 0.0,
        })
        .collect();

    Some((record, items))
}

/// Normalize a page set of raw orders.
///
/// Payloads without an order id are dropped. When an id repeats (an order
/// shifting between pages mid-fetch) the last copy wins. Orders come out
/// sorted ascending by `order_date`.
pub fn normalize_orders(raw: &[JsonValue]) -> OrderBatch {
    let mut position: HashMap<i64, usize> = HashMap::new();
    let mut rows: Vec<(OrderRecord, Vec<OrderItemRecord>)> = Vec::with_capacity(raw.len());

    for payload in raw {
        let Some((order, items)) = normalize_order(payload) else {
            warn!("skipping order payload without a usable id");
            continue;
        };
        match position.get(&order.order_id) {
            Some(&idx) => rows[idx] = (order, items),
            None => {
                position.insert(order.order_id, rows.len());
                rows.push((order, items));
            }
        }
    }

    rows.sort_by_key(|(order, _)| order.order_date);

    let mut batch = OrderBatch::default();
    for (order, items) in rows {
        batch.orders.push(order);
        batch.items.extend(items);
    }
    batch
}
