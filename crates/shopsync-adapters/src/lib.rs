//! Upstream commerce source contract, the WooCommerce REST implementation,
//! and a fixture-backed source for offline runs and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use shopsync_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

pub const CRATE_NAME: &str = "shopsync-adapters";

/// Upper bound the WooCommerce REST API accepts for `per_page`.
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unexpected payload from {resource}: {detail}")]
    Payload { resource: String, detail: String },
    #[error("invalid source configuration: {0}")]
    Config(String),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Paged read access to the upstream store. Payloads stay raw JSON; shaping
/// them into records is the normalizer's job.
#[async_trait]
pub trait CommerceSource: Send + Sync {
    fn source_id(&self) -> &str;

    /// All orders created strictly after `after`, ascending by creation time.
    async fn fetch_orders(
        &self,
        after: DateTime<Utc>,
        status: Option<&str>,
    ) -> Result<Vec<JsonValue>, AdapterError>;

    /// One batch lookup. Products the upstream does not know are simply absent.
    async fn fetch_products(&self, ids: &[i64]) -> Result<Vec<JsonValue>, AdapterError>;

    /// Single full-detail lookup; `Ok(None)` when the product no longer exists.
    async fn fetch_product(&self, id: i64) -> Result<Option<JsonValue>, AdapterError>;

    /// Refund events recorded against one order.
    async fn fetch_refunds(&self, order_id: i64) -> Result<Vec<JsonValue>, AdapterError>;
}

// ---------------------------------------------------------------------------
// Lenient JSON access
// ---------------------------------------------------------------------------

pub fn json_value<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

pub fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_value(value, path).and_then(|v| v.as_str())
}

/// Trimmed string value; empty strings count as absent.
pub fn json_text(value: &JsonValue, path: &[&str]) -> Option<String> {
    json_str(value, path)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numbers arrive either as JSON numbers or as decimal strings (`"12.50"`).
pub fn json_f64(value: &JsonValue, path: &[&str]) -> Option<f64> {
    let parsed = match json_value(value, path)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

pub fn json_i64(value: &JsonValue, path: &[&str]) -> Option<i64> {
    match json_value(value, path)? {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

pub fn json_array<'a>(value: &'a JsonValue, path: &[&str]) -> &'a [JsonValue] {
    json_value(value, path)
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn json_timestamp(value: &JsonValue, path: &[&str]) -> Option<DateTime<Utc>> {
    json_str(value, path).and_then(parse_timestamp)
}

/// Accepts RFC 3339, zone-less ISO date-times (read as UTC), and bare dates.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Order creation time: the GMT field first, the site-local one as fallback.
pub fn order_created_at(order: &JsonValue) -> Option<DateTime<Utc>> {
    json_timestamp(order, &["date_created_gmt"]).or_else(|| json_timestamp(order, &["date_created"]))
}

/// Category names carried by a product payload (`categories: [{name}]`).
pub fn product_category_names(product: &JsonValue) -> Vec<String> {
    json_array(product, &["categories"])
        .iter()
        .filter_map(|c| json_text(c, &["name"]))
        .collect()
}

// ---------------------------------------------------------------------------
// WooCommerce REST v3
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WooCommerceConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub per_page: usize,
}

impl WooCommerceConfig {
    pub fn validate(&self) -> Result<(), AdapterError> {
        let mut missing = Vec::new();
        if self.base_url.trim().is_empty() {
            missing.push("base url");
        }
        if self.consumer_key.trim().is_empty() {
            missing.push("consumer key");
        }
        if self.consumer_secret.trim().is_empty() {
            missing.push("consumer secret");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AdapterError::Config(format!("missing {}", missing.join(", "))))
        }
    }
}

#[derive(Debug)]
pub struct WooCommerceSource {
    config: WooCommerceConfig,
    http: HttpFetcher,
}

impl WooCommerceSource {
    pub fn new(config: WooCommerceConfig, http: HttpFetcher) -> Result<Self, AdapterError> {
        config.validate()?;
        Ok(Self { config, http })
    }

    pub fn endpoint(&self, path: &str) -> String {
        woo_endpoint(&self.config.base_url, path)
    }

    fn page_size(&self) -> usize {
        self.config.per_page.clamp(1, MAX_PAGE_SIZE)
    }

    fn query(&self, params: &[(&str, String)]) -> Vec<(String, String)> {
        // Query-string auth survives hosts whose proxies strip Basic auth headers.
        let mut query = vec![
            ("consumer_key".to_string(), self.config.consumer_key.clone()),
            ("consumer_secret".to_string(), self.config.consumer_secret.clone()),
        ];
        query.extend(params.iter().map(|(k, v)| (k.to_string(), v.clone())));
        query
    }

    async fn get_json(
        &self,
        resource: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<JsonValue, AdapterError> {
        let response = self
            .http
            .get(resource, &self.endpoint(path), &self.query(params))
            .await?;
        Ok(response.json::<JsonValue>()?)
    }

    async fn paged(
        &self,
        resource: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<JsonValue>, AdapterError> {
        let per_page = self.page_size();
        let mut out = Vec::new();
        let mut page = 1usize;
        loop {
            let mut page_params = params.to_vec();
            page_params.push(("page", page.to_string()));
            page_params.push(("per_page", per_page.to_string()));

            let response = self
                .http
                .get(resource, &self.endpoint(path), &self.query(&page_params))
                .await?;
            let rows = expect_array(resource, response.json::<JsonValue>()?)?;
            let fetched = rows.len();
            debug!(resource, page, fetched, total_pages = ?response.total_pages, "fetched page");
            out.extend(rows);
            if is_last_page(page, fetched, per_page, response.total_pages) {
                break;
            }
            page += 1;
        }
        Ok(out)
    }
}

/// A short page ends the collection; so does reaching the advertised page count.
fn is_last_page(page: usize, fetched: usize, per_page: usize, total_pages: Option<u32>) -> bool {
    fetched < per_page || total_pages.is_some_and(|total| page >= total as usize)
}

pub fn woo_endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/wp-json/wc/v3/{}",
        base_url.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn expect_array(resource: &str, data: JsonValue) -> Result<Vec<JsonValue>, AdapterError> {
    match data {
        JsonValue::Array(rows) => Ok(rows),
        JsonValue::Null => Ok(Vec::new()),
        other => Err(AdapterError::Payload {
            resource: resource.to_string(),
            detail: format!("expected a JSON array, got {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[async_trait]
impl CommerceSource for WooCommerceSource {
    fn source_id(&self) -> &str {
        "woocommerce"
    }

    async fn fetch_orders(
        &self,
        after: DateTime<Utc>,
        status: Option<&str>,
    ) -> Result<Vec<JsonValue>, AdapterError> {
        // Full payloads only: `_fields` projections drop nested line item ids on some hosts.
        let mut params = vec![
            ("after", after.format("%Y-%m-%dT%H:%M:%S").to_string()),
            ("dates_are_gmt", "true".to_string()),
            ("orderby", "date".to_string()),
            ("order", "asc".to_string()),
        ];
        if let Some(status) = status {
            params.push(("status", status.to_string()));
        }
        self.paged("orders", "orders", &params).await
    }

    async fn fetch_products(&self, ids: &[i64]) -> Result<Vec<JsonValue>, AdapterError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let include = ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let params = [
            ("include", include),
            ("per_page", ids.len().min(MAX_PAGE_SIZE).to_string()),
            ("status", "any".to_string()),
            ("context", "edit".to_string()),
        ];
        let data = self.get_json("products", "products", &params).await?;
        expect_array("products", data)
    }

    async fn fetch_product(&self, id: i64) -> Result<Option<JsonValue>, AdapterError> {
        let params = [("status", "any".to_string()), ("context", "edit".to_string())];
        let data = match self
            .get_json("products", &format!("products/{id}"), &params)
            .await
        {
            Ok(data) => data,
            Err(AdapterError::Fetch(err)) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(match data {
            JsonValue::Array(rows) => rows.into_iter().next(),
            JsonValue::Null => None,
            other => Some(other),
        })
    }

    async fn fetch_refunds(&self, order_id: i64) -> Result<Vec<JsonValue>, AdapterError> {
        self.paged("refunds", &format!("orders/{order_id}/refunds"), &[])
            .await
    }
}

// ---------------------------------------------------------------------------
// Fixture source
// ---------------------------------------------------------------------------

/// Canned upstream state, usually read from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureCatalog {
    #[serde(default)]
    pub orders: Vec<JsonValue>,
    #[serde(default)]
    pub products: Vec<JsonValue>,
    /// Refund events keyed by order id.
    #[serde(default)]
    pub refunds: BTreeMap<String, Vec<JsonValue>>,
    /// Mimic hosts whose batch endpoint drops nested category data.
    #[serde(default)]
    pub batch_omits_categories: bool,
}

/// Number of calls served per capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixtureCalls {
    pub orders: usize,
    pub product_batches: usize,
    pub product_singles: usize,
    pub refunds: usize,
}

#[derive(Debug, Default)]
struct FixtureFaults {
    order_failures: usize,
    failing_batches: bool,
    failing_products: BTreeSet<i64>,
    failing_refunds: BTreeSet<i64>,
}

#[derive(Debug, Default)]
struct FixtureState {
    catalog: FixtureCatalog,
    faults: FixtureFaults,
    calls: FixtureCalls,
}

#[derive(Debug, Default)]
pub struct FixtureSource {
    state: Mutex<FixtureState>,
}

impl FixtureSource {
    pub fn new(catalog: FixtureCatalog) -> Self {
        Self {
            state: Mutex::new(FixtureState {
                catalog,
                ..Default::default()
            }),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(read_json_file(path)?))
    }

    /// Fail the next `n` order fetches before serving normally.
    pub fn with_order_failures(mut self, n: usize) -> Self {
        self.state.get_mut().faults.order_failures = n;
        self
    }

    pub fn with_failing_product_batches(mut self) -> Self {
        self.state.get_mut().faults.failing_batches = true;
        self
    }

    pub fn with_failing_product(mut self, id: i64) -> Self {
        self.state.get_mut().faults.failing_products.insert(id);
        self
    }

    pub fn with_failing_refunds(mut self, order_id: i64) -> Self {
        self.state.get_mut().faults.failing_refunds.insert(order_id);
        self
    }

    pub async fn push_order(&self, order: JsonValue) {
        self.state.lock().await.catalog.orders.push(order);
    }

    pub async fn set_refunds(&self, order_id: i64, events: Vec<JsonValue>) {
        self.state
            .lock()
            .await
            .catalog
            .refunds
            .insert(order_id.to_string(), events);
    }

    pub async fn set_order_failures(&self, n: usize) {
        self.state.lock().await.faults.order_failures = n;
    }

    pub async fn calls(&self) -> FixtureCalls {
        self.state.lock().await.calls
    }
}

#[async_trait]
impl CommerceSource for FixtureSource {
    fn source_id(&self) -> &str {
        "fixture"
    }

    async fn fetch_orders(
        &self,
        after: DateTime<Utc>,
        status: Option<&str>,
    ) -> Result<Vec<JsonValue>, AdapterError> {
        let mut state = self.state.lock().await;
        state.calls.orders += 1;
        if state.faults.order_failures > 0 {
            state.faults.order_failures -= 1;
            return Err(AdapterError::Message(
                "fixture: injected order fetch failure".to_string(),
            ));
        }

        let mut orders: Vec<(DateTime<Utc>, JsonValue)> = state
            .catalog
            .orders
            .iter()
            .filter(|o| status.map_or(true, |s| json_str(o, &["status"]) == Some(s)))
            .filter_map(|o| order_created_at(o).map(|ts| (ts, o.clone())))
            .filter(|(ts, _)| *ts > after)
            .collect();
        orders.sort_by_key(|(ts, _)| *ts);
        Ok(orders.into_iter().map(|(_, o)| o).collect())
    }

    async fn fetch_products(&self, ids: &[i64]) -> Result<Vec<JsonValue>, AdapterError> {
        let mut state = self.state.lock().await;
        state.calls.product_batches += 1;
        if state.faults.failing_batches {
            return Err(AdapterError::Message(
                "fixture: injected product batch failure".to_string(),
            ));
        }
        let strip = state.catalog.batch_omits_categories;
        Ok(state
            .catalog
            .products
            .iter()
            .filter(|p| json_i64(p, &["id"]).is_some_and(|id| ids.contains(&id)))
            .map(|p| {
                let mut p = p.clone();
                if strip {
                    if let Some(obj) = p.as_object_mut() {
                        obj.insert("categories".to_string(), JsonValue::Array(Vec::new()));
                    }
                }
                p
            })
            .collect())
    }

    async fn fetch_product(&self, id: i64) -> Result<Option<JsonValue>, AdapterError> {
        let mut state = self.state.lock().await;
        state.calls.product_singles += 1;
        if state.faults.failing_products.contains(&id) {
            return Err(AdapterError::Message(format!(
                "fixture: injected failure for product {id}"
            )));
        }
        Ok(state
            .catalog
            .products
            .iter()
            .find(|p| json_i64(p, &["id"]) == Some(id))
            .cloned())
    }

    async fn fetch_refunds(&self, order_id: i64) -> Result<Vec<JsonValue>, AdapterError> {
        let mut state = self.state.lock().await;
        state.calls.refunds += 1;
        if state.faults.failing_refunds.contains(&order_id) {
            return Err(AdapterError::Message(format!(
                "fixture: injected refund failure for order {order_id}"
            )));
        }
        Ok(state
            .catalog
            .refunds
            .get(&order_id.to_string())
            .cloned()
            .unwrap_or_default())
    }
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, d, h, 0, 0).single().unwrap()
    }

    #[test]
    fn numeric_accessors_coerce_strings_and_reject_garbage() {
        let v = json!({
            "total": "129.90",
            "tax": 9.5,
            "bad": "n/a",
            "qty": "3",
            "qty_float": 2.0,
            "nested": {"id": "17"},
            "nothing": null,
        });
        assert_eq!(json_f64(&v, &["total"]), Some(129.90));
        assert_eq!(json_f64(&v, &["tax"]), Some(9.5));
        assert_eq!(json_f64(&v, &["bad"]), None);
        assert_eq!(json_f64(&v, &["missing"]), None);
        assert_eq!(json_f64(&v, &["nothing"]), None);
        assert_eq!(json_i64(&v, &["qty"]), Some(3));
        assert_eq!(json_i64(&v, &["qty_float"]), Some(2));
        assert_eq!(json_i64(&v, &["nested", "id"]), Some(17));
        assert_eq!(json_i64(&v, &["bad"]), None);
    }

    #[test]
    fn paging_stops_on_short_page_or_advertised_total() {
        assert!(!is_last_page(1, 100, 100, None));
        assert!(is_last_page(3, 42, 100, None));
        assert!(is_last_page(2, 100, 100, Some(2)));
        assert!(!is_last_page(1, 100, 100, Some(2)));
        assert!(is_last_page(1, 0, 100, Some(0)));
    }

    #[test]
    fn text_accessor_treats_blank_as_absent() {
        let v = json!({"a": "  GR ", "b": "", "c": 5});
        assert_eq!(json_text(&v, &["a"]).as_deref(), Some("GR"));
        assert_eq!(json_text(&v, &["b"]), None);
        assert_eq!(json_text(&v, &["c"]), None);
    }

    #[test]
    fn timestamps_accept_common_upstream_shapes() {
        let expected = Utc.with_ymd_and_hms(2025, 5, 2, 8, 30, 0).single().unwrap();
        assert_eq!(parse_timestamp("2025-05-02T08:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-05-02 08:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-05-02T11:30:00+03:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-05-02T08:30:00Z"), Some(expected));
        assert_eq!(
            parse_timestamp("2025-05-02"),
            Some(Utc.with_ymd_and_hms(2025, 5, 2, 0, 0, 0).single().unwrap())
        );
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn created_at_prefers_gmt_field() {
        let both = json!({"date_created_gmt": "2025-05-02T08:30:00", "date_created": "2025-05-02T11:30:00"});
        let local_only = json!({"date_created": "2025-05-02T11:30:00"});
        let broken_gmt = json!({"date_created_gmt": "??", "date_created": "2025-05-02T11:30:00"});
        assert_eq!(order_created_at(&both).unwrap().format("%H").to_string(), "08");
        assert_eq!(order_created_at(&local_only).unwrap().format("%H").to_string(), "11");
        assert_eq!(order_created_at(&broken_gmt).unwrap().format("%H").to_string(), "11");
        assert_eq!(order_created_at(&json!({})), None);
    }

    #[test]
    fn category_names_skip_blank_entries() {
        let p = json!({"id": 4, "categories": [{"name": "Shoes"}, {"name": ""}, {"id": 3}, {"name": "Sale"}]});
        assert_eq!(product_category_names(&p), vec!["Shoes", "Sale"]);
        assert!(product_category_names(&json!({"id": 4})).is_empty());
    }

    #[test]
    fn woo_endpoint_joins_base_and_path() {
        assert_eq!(
            woo_endpoint("https://shop.test/", "/orders/5/refunds"),
            "https://shop.test/wp-json/wc/v3/orders/5/refunds"
        );
    }

    #[test]
    fn woo_config_requires_credentials() {
        let config = WooCommerceConfig {
            base_url: "https://shop.test".into(),
            consumer_key: "ck_x".into(),
            consumer_secret: " ".into(),
            per_page: 100,
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("consumer secret"), "got: {err}");
    }

    fn catalog() -> FixtureCatalog {
        FixtureCatalog {
            orders: vec![
                json!({"id": 2, "status": "completed", "date_created_gmt": "2025-05-03T10:00:00"}),
                json!({"id": 1, "status": "processing", "date_created_gmt": "2025-05-01T10:00:00"}),
                json!({"id": 3, "status": "completed", "date_created_gmt": "2025-05-04T10:00:00"}),
            ],
            products: vec![json!({"id": 42, "categories": [{"name": "Shoes"}]})],
            refunds: BTreeMap::from([("3".to_string(), vec![json!({"amount": "5.00"})])]),
            batch_omits_categories: true,
        }
    }

    #[tokio::test]
    async fn fixture_orders_are_filtered_and_ascending() {
        let source = FixtureSource::new(catalog());
        let orders = source.fetch_orders(ts(1, 10), None).await.unwrap();
        let ids: Vec<_> = orders.iter().filter_map(|o| json_i64(o, &["id"])).collect();
        assert_eq!(ids, vec![2, 3]);

        let completed = source.fetch_orders(ts(1, 0), Some("processing")).await.unwrap();
        assert_eq!(completed.len(), 1);
    }

    #[tokio::test]
    async fn fixture_batch_can_strip_categories() {
        let source = FixtureSource::new(catalog());
        let batch = source.fetch_products(&[42, 43]).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert!(product_category_names(&batch[0]).is_empty());

        let single = source.fetch_product(42).await.unwrap().unwrap();
        assert_eq!(product_category_names(&single), vec!["Shoes"]);
        assert!(source.fetch_product(43).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fixture_faults_are_injected_and_counted() {
        let source = FixtureSource::new(catalog())
            .with_order_failures(2)
            .with_failing_refunds(3)
            .with_failing_product(42);

        assert!(source.fetch_orders(ts(1, 0), None).await.is_err());
        assert!(source.fetch_orders(ts(1, 0), None).await.is_err());
        assert_eq!(source.fetch_orders(ts(1, 0), None).await.unwrap().len(), 3);
        assert!(source.fetch_refunds(3).await.is_err());
        assert!(source.fetch_refunds(2).await.unwrap().is_empty());
        assert!(source.fetch_product(42).await.is_err());

        let calls = source.calls().await;
        assert_eq!(calls.orders, 3);
        assert_eq!(calls.refunds, 2);
        assert_eq!(calls.product_singles, 1);
        assert_eq!(calls.product_batches, 0);
    }
}
