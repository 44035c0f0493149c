//! SQLite warehouse: idempotent replace-by-order loads and category repair queries.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Serialize;
use shopsync_core::{OrderBatch, OrderItemRecord, OrderRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, info};

pub const ORDERS_TABLE: &str = "orders";
pub const ORDER_ITEMS_TABLE: &str = "order_items";

/// Fixed `orders` column set with SQLite storage types, in table order.
pub const ORDER_COLUMNS: [(&str, &str); 17] = [
    ("order_id", "INTEGER"),
    ("order_date", "TEXT"),
    ("status", "TEXT"),
    ("currency", "TEXT"),
    ("customer_id", "INTEGER"),
    ("discount_total", "REAL"),
    ("discount_tax", "REAL"),
    ("shipping_total", "REAL"),
    ("shipping_tax", "REAL"),
    ("cart_tax", "REAL"),
    ("total_tax", "REAL"),
    ("gross_total", "REAL"),
    ("net_total", "REAL"),
    ("refund_total", "REAL"),
    ("net_after_refunds", "REAL"),
    ("billing_country", "TEXT"),
    ("billing_city", "TEXT"),
];

/// Fixed `order_items` column set with SQLite storage types, in table order.
pub const ORDER_ITEM_COLUMNS: [(&str, &str); 13] = [
    ("order_id", "INTEGER"),
    ("product_id", "INTEGER"),
    ("variation_id", "INTEGER"),
    ("sku", "TEXT"),
    ("name", "TEXT"),
    ("quantity", "INTEGER"),
    ("price", "REAL"),
    ("total", "REAL"),
    ("subtotal", "REAL"),
    ("tax_class", "TEXT"),
    ("category_snapshot", "TEXT"),
    ("refunded_quantity", "INTEGER"),
    ("refunded_total", "REAL"),
];

// Stays well below SQLITE_MAX_VARIABLE_NUMBER on older builds.
const KEY_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub orders: usize,
    pub items: usize,
}

#[derive(Debug, Clone)]
pub struct Warehouse {
    pool: SqlitePool,
}

fn create_table_sql(table: &str, columns: &[(&str, &str)], primary_key: bool) -> String {
    let defs = columns
        .iter()
        .map(|(name, ty)| match *name {
            "order_id" if primary_key => format!("{name} {ty} NOT NULL PRIMARY KEY"),
            "order_id" => format!("{name} {ty} NOT NULL"),
            _ => format!("{name} {ty}"),
        })
        .collect::<Vec<_>>()
        .join(",\n    ");
    format!("CREATE TABLE IF NOT EXISTS {table} (\n    {defs}\n)")
}

fn insert_sql(table: &str, columns: &[(&str, &str)]) -> String {
    let names = columns.iter().map(|(n, _)| *n).collect::<Vec<_>>();
    let placeholders = vec!["?"; names.len()].join(", ");
    format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        names.join(", ")
    )
}

fn select_sql(table: &str, columns: &[(&str, &str)]) -> String {
    let names = columns.iter().map(|(n, _)| *n).collect::<Vec<_>>();
    format!("SELECT {} FROM {table}", names.join(", "))
}

impl Warehouse {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("parsing warehouse url {url}"))?
            .create_if_missing(true);

        let filename = options.get_filename().to_path_buf();
        if filename != Path::new(":memory:") {
            if let Some(parent) = filename.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating warehouse directory {}", parent.display()))?;
            }
        }

        // Single writer; one connection also keeps in-memory databases alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to warehouse {url}"))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create missing tables and add any missing column of the fixed sets.
    /// Returns the `table.column` names that were added.
    pub async fn ensure_schema(&self) -> Result<Vec<String>> {
        sqlx::query(&create_table_sql(ORDERS_TABLE, &ORDER_COLUMNS, true))
            .execute(&self.pool)
            .await
            .context("creating orders table")?;
        sqlx::query(&create_table_sql(ORDER_ITEMS_TABLE, &ORDER_ITEM_COLUMNS, false))
            .execute(&self.pool)
            .await
            .context("creating order_items table")?;

        let mut added = Vec::new();
        for (table, columns) in [
            (ORDERS_TABLE, &ORDER_COLUMNS[..]),
            (ORDER_ITEMS_TABLE, &ORDER_ITEM_COLUMNS[..]),
        ] {
            let existing = sqlx::query(&format!("PRAGMA table_info('{table}')"))
                .fetch_all(&self.pool)
                .await
                .with_context(|| format!("reading columns of {table}"))?
                .iter()
                .map(|row| row.try_get::<String, _>("name"))
                .collect::<Result<BTreeSet<_>, _>>()?;

            for (name, ty) in columns {
                if existing.contains(*name) {
                    continue;
                }
                sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {name} {ty}"))
                    .execute(&self.pool)
                    .await
                    .with_context(|| format!("adding column {table}.{name}"))?;
                info!(table, column = *name, "added missing warehouse column");
                added.push(format!("{table}.{name}"));
            }
        }

        for sql in [
            "CREATE INDEX IF NOT EXISTS idx_order_items_order_id ON order_items (order_id)",
            "CREATE INDEX IF NOT EXISTS idx_order_items_product_id ON order_items (product_id)",
        ] {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .context("creating order_items index")?;
        }
        Ok(added)
    }

    /// Replace every order in `batch` (and all of its items) in one transaction.
    ///
    /// Existing rows are deleted by order id and the batch inserted, so loading
    /// the same batch twice leaves the same state as loading it once. An order
    /// present in the batch loses any prior items not in the batch. Empty
    /// batches touch nothing.
    pub async fn load(&self, batch: &OrderBatch) -> Result<LoadStats> {
        if batch.is_empty() {
            return Ok(LoadStats::default());
        }

        let order_keys: Vec<i64> = batch
            .orders
            .iter()
            .map(|o| o.order_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let item_keys: Vec<i64> = batch
            .orders
            .iter()
            .map(|o| o.order_id)
            .chain(batch.items.iter().map(|i| i.order_id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut tx = self.pool.begin().await.context("beginning load transaction")?;

        delete_by_order_ids(&mut tx, ORDERS_TABLE, &order_keys).await?;
        for order in &batch.orders {
            insert_order(&mut tx, order).await?;
        }

        delete_by_order_ids(&mut tx, ORDER_ITEMS_TABLE, &item_keys).await?;
        for item in &batch.items {
            insert_item(&mut tx, item).await?;
        }

        tx.commit().await.context("committing load transaction")?;

        let stats = LoadStats {
            orders: batch.orders.len(),
            items: batch.items.len(),
        };
        info!(orders = stats.orders, items = stats.items, "warehouse load committed");
        Ok(stats)
    }

    /// Distinct product ids whose item rows lack a category snapshot, or every
    /// referenced product id when `force` is set.
    pub async fn products_needing_categories(&self, force: bool) -> Result<Vec<i64>> {
        let sql = if force {
            "SELECT DISTINCT product_id FROM order_items
             WHERE product_id IS NOT NULL
             ORDER BY product_id"
        } else {
            "SELECT DISTINCT product_id FROM order_items
             WHERE product_id IS NOT NULL
               AND (category_snapshot IS NULL OR TRIM(category_snapshot) = '')
             ORDER BY product_id"
        };
        let ids: Vec<i64> = sqlx::query_scalar(sql)
            .fetch_all(&self.pool)
            .await
            .context("querying products needing categories")?;
        Ok(ids)
    }

    /// Write category snapshots per product id. Without `force` only rows whose
    /// snapshot is still null or blank are touched. Returns rows updated.
    pub async fn update_category_snapshots(
        &self,
        snapshots: &BTreeMap<i64, Option<String>>,
        force: bool,
    ) -> Result<u64> {
        if snapshots.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.context("beginning category update")?;
        let mut updated = 0u64;
        for (product_id, snapshot) in snapshots {
            let result = sqlx::query(
                "UPDATE order_items SET category_snapshot = ?1
                 WHERE product_id = ?2
                   AND (?3 OR category_snapshot IS NULL OR TRIM(category_snapshot) = '')",
            )
            .bind(snapshot.as_deref())
            .bind(*product_id)
            .bind(force)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("updating category snapshot for product {product_id}"))?;
            updated += result.rows_affected();
        }
        tx.commit().await.context("committing category update")?;
        debug!(products = snapshots.len(), rows = updated, force, "category snapshots updated");
        Ok(updated)
    }

    pub async fn count_orders(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM orders")
            .fetch_one(&self.pool)
            .await
            .context("counting orders")
    }

    pub async fn count_items(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM order_items")
            .fetch_one(&self.pool)
            .await
            .context("counting order items")
    }

    pub async fn fetch_orders(&self) -> Result<Vec<OrderRecord>> {
        let sql = format!("{} ORDER BY order_id", select_sql(ORDERS_TABLE, &ORDER_COLUMNS));
        sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .context("reading orders")?
            .iter()
            .map(order_from_row)
            .collect::<Result<Vec<_>, _>>()
            .context("decoding orders")
    }

    pub async fn fetch_items(&self) -> Result<Vec<OrderItemRecord>> {
        let sql = format!(
            "{} ORDER BY order_id, product_id, variation_id, rowid",
            select_sql(ORDER_ITEMS_TABLE, &ORDER_ITEM_COLUMNS)
        );
        sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .context("reading order items")?
            .iter()
            .map(item_from_row)
            .collect::<Result<Vec<_>, _>>()
            .context("decoding order items")
    }
}

async fn delete_by_order_ids(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    order_ids: &[i64],
) -> Result<()> {
    for chunk in order_ids.chunks(KEY_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!("DELETE FROM {table} WHERE order_id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in chunk {
            query = query.bind(*id);
        }
        query
            .execute(&mut **tx)
            .await
            .with_context(|| format!("deleting prior rows from {table}"))?;
    }
    Ok(())
}

async fn insert_order(tx: &mut Transaction<'_, Sqlite>, order: &OrderRecord) -> Result<()> {
    sqlx::query(&insert_sql(ORDERS_TABLE, &ORDER_COLUMNS))
        .bind(order.order_id)
        .bind(order.order_date)
        .bind(order.status.as_deref())
        .bind(order.currency.as_deref())
        .bind(order.customer_id)
        .bind(order.discount_total)
        .bind(order.discount_tax)
        .bind(order.shipping_total)
        .bind(order.shipping_tax)
        .bind(order.cart_tax)
        .bind(order.total_tax)
        .bind(order.gross_total)
        .bind(order.net_total)
        .bind(order.refund_total)
        .bind(order.net_after_refunds)
        .bind(order.billing_country.as_deref())
        .bind(order.billing_city.as_deref())
        .execute(&mut **tx)
        .await
        .with_context(|| format!("inserting order {}", order.order_id))?;
    Ok(())
}

async fn insert_item(tx: &mut Transaction<'_, Sqlite>, item: &OrderItemRecord) -> Result<()> {
    sqlx::query(&insert_sql(ORDER_ITEMS_TABLE, &ORDER_ITEM_COLUMNS))
        .bind(item.order_id)
        .bind(item.product_id)
        .bind(item.variation_id)
        .bind(item.sku.as_deref())
        .bind(item.name.as_deref())
        .bind(item.quantity)
        .bind(item.price)
        .bind(item.total)
        .bind(item.subtotal)
        .bind(item.tax_class.as_deref())
        .bind(item.category_snapshot.as_deref())
        .bind(item.refunded_quantity)
        .bind(item.refunded_total)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("inserting item of order {}", item.order_id))?;
    Ok(())
}

fn real(row: &SqliteRow, column: &str) -> Result<f64, sqlx::Error> {
    Ok(row.try_get::<Option<f64>, _>(column)?.unwrap_or(0.0))
}

fn order_from_row(row: &SqliteRow) -> Result<OrderRecord, sqlx::Error> {
    Ok(OrderRecord {
        order_id: row.try_get("order_id")?,
        order_date: row.try_get("order_date")?,
        status: row.try_get("status")?,
        currency: row.try_get("currency")?,
        customer_id: row.try_get("customer_id")?,
        discount_total: real(row, "discount_total")?,
        discount_tax: real(row, "discount_tax")?,
        shipping_total: real(row, "shipping_total")?,
        shipping_tax: real(row, "shipping_tax")?,
        cart_tax: real(row, "cart_tax")?,
        total_tax: real(row, "total_tax")?,
        gross_total: real(row, "gross_total")?,
        net_total: real(row, "net_total")?,
        refund_total: real(row, "refund_total")?,
        net_after_refunds: row.try_get("net_after_refunds")?,
        billing_country: row.try_get("billing_country")?,
        billing_city: row.try_get("billing_city")?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<OrderItemRecord, sqlx::Error> {
    Ok(OrderItemRecord {
        order_id: row.try_get("order_id")?,
        product_id: row.try_get("product_id")?,
        variation_id: row.try_get("variation_id")?,
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        quantity: row.try_get::<Option<i64>, _>("quantity")?.unwrap_or(0),
        price: real(row, "price")?,
        total: real(row, "total")?,
        subtotal: real(row, "subtotal")?,
        tax_class: row.try_get("tax_class")?,
        category_snapshot: row.try_get("category_snapshot")?,
        refunded_quantity: row.try_get::<Option<i64>, _>("refunded_quantity")?.unwrap_or(0),
        refunded_total: real(row, "refunded_total")?,
    })
}
