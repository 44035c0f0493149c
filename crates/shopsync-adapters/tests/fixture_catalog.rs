use chrono::{TimeZone, Utc};
use serde_json::json;
use shopsync_adapters::{
    json_i64, product_category_names, CommerceSource, FixtureCatalog, FixtureSource,
};

fn sample_path() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/shop-sample.json")
}

#[tokio::test]
async fn shipped_sample_fixture_loads_and_serves_orders() {
    let source = FixtureSource::from_path(sample_path()).expect("sample fixture");
    let since = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).single().unwrap();

    let orders = source.fetch_orders(since, None).await.unwrap();
    let ids: Vec<_> = orders.iter().filter_map(|o| json_i64(o, &["id"])).collect();
    assert_eq!(ids, vec![1001, 1002]);

    let products = source.fetch_products(&[42, 77, 90]).await.unwrap();
    assert_eq!(products.len(), 2);
    assert!(source.fetch_product(90).await.unwrap().is_none());
    assert_eq!(source.fetch_refunds(1001).await.unwrap().len(), 1);
}

#[tokio::test]
async fn catalog_round_trips_through_a_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("catalog.json");
    let catalog = FixtureCatalog {
        products: vec![json!({"id": 8, "categories": [{"name": "Tea"}]})],
        ..Default::default()
    };
    std::fs::write(&path, serde_json::to_vec(&catalog).unwrap()).unwrap();

    let source = FixtureSource::from_path(&path).expect("load");
    let product = source.fetch_product(8).await.unwrap().expect("product 8");
    assert_eq!(product_category_names(&product), vec!["Tea"]);
}

#[test]
fn missing_fixture_file_reports_path() {
    let err = FixtureSource::from_path("/definitely/not/here.json").unwrap_err();
    assert!(format!("{err:#}").contains("/definitely/not/here.json"));
}
