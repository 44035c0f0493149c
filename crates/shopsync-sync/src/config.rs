use std::path::PathBuf;
use std::time::Duration;

use shopsync_adapters::{WooCommerceConfig, MAX_PAGE_SIZE};

use crate::SyncError;

pub const DEFAULT_WAREHOUSE_URL: &str = "sqlite://./data/warehouse.db";

/// Everything a sync run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    /// Serve upstream data from a fixture catalogue instead of the REST API.
    pub fixture_path: Option<PathBuf>,
    pub warehouse_url: String,
    pub state_path: PathBuf,
    pub reports_dir: PathBuf,
    pub default_lookback_days: i64,
    pub order_status: Option<String>,
    pub order_fetch_attempts: usize,
    pub order_fetch_retry_delay: Duration,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Only the warehouse location. Schema migration needs nothing else, so it
    /// runs without upstream credentials.
    pub fn warehouse_url_from_env() -> String {
        Self::warehouse_url_from_lookup(|key| std::env::var(key).ok())
    }

    pub fn warehouse_url_from_lookup<F>(lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        non_blank(lookup("WAREHOUSE_URL")).unwrap_or_else(|| DEFAULT_WAREHOUSE_URL.to_string())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| non_blank(lookup(key));

        let fixture_path = var("SHOPSYNC_FIXTURE_PATH").map(PathBuf::from);
        let base_url = var("WC_BASE_URL").unwrap_or_default();
        let consumer_key = var("WC_CONSUMER_KEY").unwrap_or_default();
        let consumer_secret = var("WC_CONSUMER_SECRET").unwrap_or_default();

        if fixture_path.is_none() {
            let missing: Vec<&str> = [
                ("WC_BASE_URL", &base_url),
                ("WC_CONSUMER_KEY", &consumer_key),
                ("WC_CONSUMER_SECRET", &consumer_secret),
            ]
            .into_iter()
            .filter(|(_, v)| v.is_empty())
            .map(|(k, _)| k)
            .collect();
            if !missing.is_empty() {
                return Err(SyncError::Config(format!(
                    "missing upstream credentials: set {}",
                    missing.join(", ")
                )));
            }
        }

        let order_fetch_attempts: usize = parse_var(&var, "ORDER_FETCH_ATTEMPTS", 3)?;
        if order_fetch_attempts == 0 {
            return Err(SyncError::Config(
                "ORDER_FETCH_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        let default_lookback_days: i64 = parse_var(&var, "DEFAULT_LOOKBACK_DAYS", 30)?;
        if default_lookback_days < 0 {
            return Err(SyncError::Config(
                "DEFAULT_LOOKBACK_DAYS must not be negative".to_string(),
            ));
        }
        if chrono::Duration::try_days(default_lookback_days).is_none() {
            return Err(SyncError::Config(format!(
                "DEFAULT_LOOKBACK_DAYS {default_lookback_days} is out of range"
            )));
        }

        Ok(Self {
            base_url,
            consumer_key,
            consumer_secret,
            fixture_path,
            warehouse_url: Self::warehouse_url_from_lookup(&lookup),
            state_path: var("STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/state.json")),
            reports_dir: var("REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./reports")),
            default_lookback_days,
            order_status: var("ORDER_STATUS"),
            order_fetch_attempts,
            order_fetch_retry_delay: Duration::from_secs(parse_var(
                &var,
                "ORDER_FETCH_RETRY_DELAY_SECS",
                30,
            )?),
            http_timeout_secs: parse_var(&var, "SHOPSYNC_HTTP_TIMEOUT_SECS", 60)?,
            user_agent: var("SHOPSYNC_USER_AGENT")
                .unwrap_or_else(|| format!("shopsync/{}", env!("CARGO_PKG_VERSION"))),
            scheduler_enabled: var("SHOPSYNC_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: var("SYNC_CRON").unwrap_or_else(|| "0 0 * * * *".to_string()),
        })
    }

    pub fn woocommerce(&self) -> WooCommerceConfig {
        WooCommerceConfig {
            base_url: self.base_url.clone(),
            consumer_key: self.consumer_key.clone(),
            consumer_secret: self.consumer_secret.clone(),
            per_page: MAX_PAGE_SIZE,
        }
    }

    pub fn default_lookback(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.default_lookback_days).unwrap_or(chrono::Duration::MAX)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> Result<T, SyncError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| SyncError::Config(format!("{key}={raw:?} is not a valid number"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const CREDS: [(&str, &str); 3] = [
        ("WC_BASE_URL", "https://shop.test"),
        ("WC_CONSUMER_KEY", "ck_1"),
        ("WC_CONSUMER_SECRET", "cs_1"),
    ];

    #[test]
    fn defaults_apply_when_only_credentials_are_set() {
        let config = SyncConfig::from_lookup(lookup(&CREDS)).expect("config");
        assert_eq!(config.warehouse_url, "sqlite://./data/warehouse.db");
        assert_eq!(config.state_path, PathBuf::from("./data/state.json"));
        assert_eq!(config.default_lookback_days, 30);
        assert_eq!(config.order_fetch_attempts, 3);
        assert_eq!(config.order_fetch_retry_delay, Duration::from_secs(30));
        assert_eq!(config.order_status, None);
        assert!(!config.scheduler_enabled);
        assert_eq!(config.woocommerce().per_page, 100);
    }

    #[test]
    fn warehouse_url_resolves_without_credentials() {
        assert_eq!(
            SyncConfig::warehouse_url_from_lookup(lookup(&[])),
            DEFAULT_WAREHOUSE_URL
        );
        assert_eq!(
            SyncConfig::warehouse_url_from_lookup(lookup(&[("WAREHOUSE_URL", " sqlite::memory: ")])),
            "sqlite::memory:"
        );
        assert!(SyncConfig::from_lookup(lookup(&[])).is_err());
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let err = SyncConfig::from_lookup(lookup(&[("WC_BASE_URL", "https://shop.test")]))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("WC_CONSUMER_KEY"), "got: {msg}");
        assert!(msg.contains("WC_CONSUMER_SECRET"), "got: {msg}");
        assert!(!msg.contains("WC_BASE_URL"), "got: {msg}");
    }

    #[test]
    fn fixture_mode_does_not_need_credentials() {
        let config =
            SyncConfig::from_lookup(lookup(&[("SHOPSYNC_FIXTURE_PATH", "fixtures/shop-sample.json")]))
                .expect("config");
        assert_eq!(
            config.fixture_path,
            Some(PathBuf::from("fixtures/shop-sample.json"))
        );
    }

    #[test]
    fn malformed_numbers_are_rejected_not_defaulted() {
        let mut pairs = CREDS.to_vec();
        pairs.push(("ORDER_FETCH_ATTEMPTS", "three"));
        assert!(SyncConfig::from_lookup(lookup(&pairs)).is_err());

        let mut pairs = CREDS.to_vec();
        pairs.push(("ORDER_FETCH_ATTEMPTS", "0"));
        assert!(SyncConfig::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn lookback_days_beyond_duration_range_are_rejected() {
        let mut pairs = CREDS.to_vec();
        pairs.push(("DEFAULT_LOOKBACK_DAYS", "9223372036854775807"));
        let err = SyncConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("DEFAULT_LOOKBACK_DAYS"), "got: {err}");
    }

    #[test]
    fn overrides_are_read() {
        let mut pairs = CREDS.to_vec();
        pairs.extend([
            ("ORDER_STATUS", "completed"),
            ("DEFAULT_LOOKBACK_DAYS", "7"),
            ("ORDER_FETCH_RETRY_DELAY_SECS", "0"),
            ("SHOPSYNC_SCHEDULER_ENABLED", "true"),
        ]);
        let config = SyncConfig::from_lookup(lookup(&pairs)).expect("config");
        assert_eq!(config.order_status.as_deref(), Some("completed"));
        assert_eq!(config.default_lookback(), chrono::Duration::days(7));
        assert_eq!(config.order_fetch_retry_delay, Duration::ZERO);
        assert!(config.scheduler_enabled);
    }
}
