use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::json_encoded;
use httptest::{Expectation, Server};
use secrecy::SecretString;
use serde_json::{json, Value};
use tempfile::tempdir;

use amap_geocoder::{AppConfig, AppError, GeocodingService, GeocodingStatus, StrategyKind};

const GEOCODE_PATH: &str = "/v3/geocode/geo";

fn pudong_response() -> Value {
    json!({
        "status": "1",
        "info": "OK",
        "infocode": "10000",
        "count": "1",
        "geocodes": [{
            "formatted_address": "上海市浦东新区",
            "country": "中国",
            "province": "上海市",
            "citycode": "021",
            "city": "上海市",
            "district": "浦东新区",
            "township": [],
            "neighborhood": { "name": [], "type": [] },
            "building": { "name": [], "type": [] },
            "adcode": "310115",
            "street": [],
            "number": [],
            "location": "121.544346,31.221461",
            "level": "区县"
        }]
    })
}

fn config_for(server: &Server, database_path: String) -> AppConfig {
    AppConfig {
        amap_api_key: Some(SecretString::new("test-key".into())),
        geocode_endpoint: server.url(GEOCODE_PATH).to_string(),
        database_path,
        batch_window_delay_ms: 10,
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn resolves_and_persists_a_fuzzy_address() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", GEOCODE_PATH),
            request::query(url_decoded(contains(("key", "test-key")))),
            request::query(url_decoded(contains(("address", "上海浦东一带")))),
            request::query(url_decoded(contains(("output", "JSON")))),
        ])
        .times(2)
        .respond_with(json_encoded(pudong_response())),
    );

    let dir = tempdir().unwrap();
    let db_path = dir.path().join("roundtrip.db").to_string_lossy().to_string();
    let service = GeocodingService::from_config(config_for(&server, db_path)).expect("service");
    let session = service.authorize(None).expect("open session");

    let resolution = session.resolve("  上海浦东一带！", None).await.expect("resolve");
    assert_eq!(resolution.strategy, StrategyKind::Direct);
    assert_eq!(resolution.attempts, 1);
    assert_eq!(resolution.confidence, 0.6);
    assert_eq!(resolution.candidate.adcode.as_deref(), Some("310115"));
    assert!(resolution.candidate.township.is_none());

    let record = session
        .create_pending("Riverside", "上海浦东一带")
        .expect("create record");
    let outcome = session
        .geocode_location(&record.id, None)
        .await
        .expect("geocode location");
    assert_eq!(outcome.status, GeocodingStatus::Success);
    assert!(outcome.persistence_error.is_none());

    let stats = session.stats().expect("stats");
    assert_eq!(stats.total, 1);
    assert_eq!(stats.success, 1);
}

#[tokio::test]
async fn provider_rejection_exhausts_every_strategy() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", GEOCODE_PATH))
            .times(4)
            .respond_with(json_encoded(json!({
                "status": "0",
                "info": "INVALID_USER_KEY",
                "infocode": "10001"
            }))),
    );

    let dir = tempdir().unwrap();
    let db_path = dir.path().join("rejected.db").to_string_lossy().to_string();
    let service = GeocodingService::from_config(config_for(&server, db_path)).expect("service");
    let session = service.authorize(None).expect("open session");

    let err = session
        .resolve("北京市朝阳区建国路88号", None)
        .await
        .unwrap_err();
    match err.last_cause() {
        AppError::Provider { info, infocode, .. } => {
            assert_eq!(info, "INVALID_USER_KEY");
            assert_eq!(infocode.as_deref(), Some("10001"));
        }
        other => panic!("unexpected cause: {other:?}"),
    }
}

#[tokio::test]
async fn batch_resolves_each_address_once() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", GEOCODE_PATH))
            .times(7)
            .respond_with(json_encoded(pudong_response())),
    );

    let dir = tempdir().unwrap();
    let db_path = dir.path().join("batch.db").to_string_lossy().to_string();
    let service = GeocodingService::from_config(config_for(&server, db_path)).expect("service");
    let session = service.authorize(None).expect("open session");

    let addresses: Vec<String> = (1..=7).map(|i| format!("上海市浦东新区世纪大道{i}号")).collect();
    let entries = session.resolve_batch(&addresses).await;
    assert_eq!(entries.len(), 7);
    assert!(entries.iter().all(|entry| entry.success));
    assert_eq!(entries[3].address, addresses[3]);
}
