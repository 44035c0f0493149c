//! Core record types shared by the shopsync crates.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "shopsync-core";

/// Separator used when flattening category names into a snapshot string.
pub const CATEGORY_DELIMITER: &str = " | ";

/// Product/variation id used when the upstream payload carries none.
pub const NO_ID: i64 = 0;

/// One row of the `orders` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: i64,
    pub order_date: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub currency: Option<String>,
    pub customer_id: Option<i64>,
    pub discount_total: f64,
    pub discount_tax: f64,
    pub shipping_total: f64,
    pub shipping_tax: f64,
    pub cart_tax: f64,
    pub total_tax: f64,
    pub gross_total: f64,
    /// `gross_total - total_tax`, before refunds.
    pub net_total: f64,
    pub refund_total: f64,
    /// Stays `None` until refund reconciliation has run for this order.
    pub net_after_refunds: Option<f64>,
    pub billing_country: Option<String>,
    pub billing_city: Option<String>,
}

/// One row of the `order_items` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItemRecord {
    pub order_id: i64,
    pub product_id: Option<i64>,
    pub variation_id: Option<i64>,
    pub sku: Option<String>,
    pub name: Option<String>,
    pub quantity: i64,
    pub price: f64,
    pub total: f64,
    pub subtotal: f64,
    pub tax_class: Option<String>,
    /// Category names captured at enrichment time. `None` means no data.
    pub category_snapshot: Option<String>,
    pub refunded_quantity: i64,
    pub refunded_total: f64,
}

impl OrderItemRecord {
    pub fn refund_key(&self) -> RefundKey {
        RefundKey::new(self.product_id, self.variation_id)
    }
}

/// Orders and their line items moving through one pipeline batch.
///
/// `orders` is kept sorted ascending by `order_date`; rows without a date sort first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBatch {
    pub orders: Vec<OrderRecord>,
    pub items: Vec<OrderItemRecord>,
}

impl OrderBatch {
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.items.is_empty()
    }

    pub fn order_ids(&self) -> Vec<i64> {
        self.orders.iter().map(|o| o.order_id).collect()
    }

    /// Distinct, positive product ids referenced by the batch items, ascending.
    pub fn product_ids(&self) -> Vec<i64> {
        self.items
            .iter()
            .filter_map(|item| item.product_id)
            .filter(|id| *id > NO_ID)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn items_for(&self, order_id: i64) -> impl Iterator<Item = &OrderItemRecord> {
        self.items.iter().filter(move |item| item.order_id == order_id)
    }
}

/// Outcome of a best-effort upstream lookup.
///
/// Callers that only need enrichment treat `NotFound` and `Failed` the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution<T> {
    Found(T),
    NotFound,
    Failed(String),
}

impl<T> Resolution<T> {
    pub fn found(&self) -> Option<&T> {
        match self {
            Resolution::Found(value) => Some(value),
            Resolution::NotFound | Resolution::Failed(_) => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found(_))
    }
}

/// Product id -> category names, as resolved for one batch.
pub type ProductLookup = BTreeMap<i64, Resolution<Vec<String>>>;

/// Flatten a product resolution into the denormalized snapshot stored on items.
///
/// Returns `None` for unresolved products and for products without categories.
pub fn category_snapshot(resolution: Option<&Resolution<Vec<String>>>) -> Option<String> {
    let names = resolution.and_then(Resolution::found)?;
    let names: Vec<&str> = names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join(CATEGORY_DELIMITER))
    }
}

/// (product, variation) bucket for item-level refunds. Missing ids map to `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefundKey {
    pub product_id: i64,
    pub variation_id: i64,
}

impl RefundKey {
    pub fn new(product_id: Option<i64>, variation_id: Option<i64>) -> Self {
        Self {
            product_id: product_id.unwrap_or(NO_ID),
            variation_id: variation_id.unwrap_or(NO_ID),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ItemRefund {
    pub quantity: i64,
    pub total: f64,
}

/// Refund history of one order, summed across all of its refund events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderRefunds {
    pub refund_total: f64,
    pub items: BTreeMap<RefundKey, ItemRefund>,
}

impl OrderRefunds {
    pub fn item(&self, key: RefundKey) -> ItemRefund {
        self.items.get(&key).copied().unwrap_or_default()
    }

    /// Part of `refund_total` attributed to individual line items.
    pub fn attributed_total(&self) -> f64 {
        self.items.values().map(|r| r.total).sum()
    }
}

/// Order id -> refund resolution, as resolved for one batch.
pub type RefundLookup = BTreeMap<i64, OrderRefunds>;

/// Synchronization cursor: orders created after `since` have not been loaded yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Watermark {
    pub since: DateTime<Utc>,
}

impl Watermark {
    pub fn new(since: DateTime<Utc>) -> Self {
        Self { since }
    }

    /// Cursor that sits one minute past an order timestamp, so the boundary
    /// order is not fetched again.
    pub fn after_order(order_date: DateTime<Utc>) -> Self {
        Self {
            since: order_date
                .checked_add_signed(Duration::minutes(1))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// First-run cursor: `now - lookback`, clamped to the earliest
    /// representable instant.
    pub fn lookback_from(now: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            since: now
                .checked_sub_signed(lookback)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}
