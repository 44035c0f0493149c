//! Product id -> category resolution, batch first with a per-id fallback.

use std::collections::BTreeSet;
use std::sync::Arc;

use shopsync_adapters::{json_i64, product_category_names, CommerceSource};
use shopsync_core::{ProductLookup, Resolution};
use tracing::{debug, warn};

pub const PRODUCT_BATCH_SIZE: usize = 100;

pub struct ProductResolver {
    source: Arc<dyn CommerceSource>,
    batch_size: usize,
}

impl ProductResolver {
    pub fn new(source: Arc<dyn CommerceSource>) -> Self {
        Self {
            source,
            batch_size: PRODUCT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Resolve categories for `ids`, best effort. Every requested id gets an entry.
    ///
    /// Batch responses with an empty category list are treated as suspect: some
    /// hosts omit nested data on the batch endpoint, so those ids are fetched
    /// again one by one and a successful single fetch replaces the batch entry.
    /// Transport failures never escape; they surface as `Resolution::Failed`.
    pub async fn resolve<I>(&self, ids: I) -> ProductLookup
    where
        I: IntoIterator<Item = i64>,
    {
        let ids: Vec<i64> = ids
            .into_iter()
            .filter(|id| *id > 0)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut out = ProductLookup::new();
        if ids.is_empty() {
            return out;
        }

        for group in ids.chunks(self.batch_size) {
            match self.source.fetch_products(group).await {
                Ok(payloads) => {
                    for payload in payloads {
                        let Some(id) = json_i64(&payload, &["id"]) else {
                            continue;
                        };
                        out.insert(id, Resolution::Found(product_category_names(&payload)));
                    }
                }
                Err(err) => {
                    warn!(error = %err, size = group.len(), "product batch lookup failed; falling back to single lookups");
                }
            }
        }

        let fallback: Vec<i64> = ids
            .iter()
            .copied()
            .filter(|id| !matches!(out.get(id), Some(Resolution::Found(names)) if !names.is_empty()))
            .collect();
        debug!(requested = ids.len(), fallback = fallback.len(), "product batch phase done");

        for id in fallback {
            match self.source.fetch_product(id).await {
                Ok(Some(payload)) => {
                    out.insert(id, Resolution::Found(product_category_names(&payload)));
                }
                Ok(None) => {
                    out.entry(id).or_insert(Resolution::NotFound);
                }
                Err(err) => {
                    warn!(product_id = id, error = %err, "single product lookup failed");
                    out.entry(id).or_insert(Resolution::Failed(err.to_string()));
                }
            }
        }

        out
    }
}
