mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use common::init_logging;
use fleet_core::{
    CandidateRecord, Credential, DiscoveredAttribute, HostKey, HostSpec, InventoryFilter,
    ProbeTarget, VerifiedHost,
};
use fleet_engine::{ClientSettings, FailureKind, FleetApi, OperationKind, ReqwestFleetApi};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ReqwestFleetApi {
    ReqwestFleetApi::new(&ClientSettings {
        base_url: server.uri(),
        ..ClientSettings::default()
    })
    .unwrap()
}

fn host(addr: &str) -> HostSpec {
    HostSpec {
        address: addr.parse().unwrap(),
        port: 22,
        username: "root".to_string(),
        credential: Credential::Password("pw".to_string()),
        hostname: None,
        os: None,
        description: None,
        extra: BTreeMap::new(),
    }
}

fn verified(addr: &str) -> VerifiedHost {
    let mut record = CandidateRecord::new(1, 2, host(addr));
    record.begin_testing().unwrap();
    record.succeed(None).unwrap();
    VerifiedHost::try_from(record).unwrap()
}

#[tokio::test]
async fn inventory_sends_filter_and_reads_page() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/servers"))
        .and(query_param("page", "2"))
        .and(query_param("page_size", "25"))
        .and(query_param("search", "web"))
        .and(query_param("group_id", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "id": 7, "hostname": "web-1", "ip": "10.0.0.7" }],
            "total": 31
        })))
        .expect(1)
        .mount(&server)
        .await;

    let filter = InventoryFilter {
        group_id: Some(3),
        ..InventoryFilter::default()
    }
    .with_search("web");
    let page = client(&server).inventory(&filter, 2, 25).await.unwrap();

    assert_eq!(page.total_count, 31);
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.records[0].id, 7);
    assert_eq!(page.records[0].address, "10.0.0.7");
}

#[tokio::test]
async fn existence_check_inverts_validity() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/servers/exists"))
        .and(query_param("ip", "10.0.0.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "valid": false,
            "message": "already registered as db-1"
        })))
        .mount(&server)
        .await;

    let verdict = client(&server)
        .exists_by_key(&HostKey::from_reported("10.0.0.1"))
        .await
        .unwrap();

    assert!(verdict.exists);
    assert_eq!(verdict.message.as_deref(), Some("already registered as db-1"));
}

#[tokio::test]
async fn connectivity_results_carry_discovered_attributes() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/servers/test-connection"))
        .and(body_partial_json(json!({
            "targets": [{ "ip": "10.0.0.1", "port": 22, "username": "root", "password": "pw" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "ip": "10.0.0.1",
                "status": "success",
                "discovered": { "hostname": "db-1", "os_type": "debian", "kernel": "6.1" }
            }],
            "successful_count": 1
        })))
        .mount(&server)
        .await;

    let target = ProbeTarget {
        key: HostKey::from_reported("10.0.0.1"),
        host: host("10.0.0.1"),
    };
    let report = client(&server).test_connectivity(&[target]).await.unwrap();

    assert_eq!(report.successful_count, 1);
    let result = &report.results[0];
    assert!(result.succeeded);
    assert_eq!(result.key, HostKey::from_reported("10.0.0.1"));
    assert_eq!(
        result.discovered,
        vec![
            DiscoveredAttribute::Hostname("db-1".to_string()),
            DiscoveredAttribute::OperatingSystem("debian".to_string()),
            DiscoveredAttribute::Other {
                key: "kernel".to_string(),
                value: "6.1".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn batch_create_rejection_keeps_backend_message() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/servers/batch"))
        .and(body_partial_json(json!({ "group_id": 5 })))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({ "message": "duplicate ip 10.0.0.1" })),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .create_batch(&[verified("10.0.0.1")], Some(5))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::HttpStatus(409));
    assert_eq!(err.message, "duplicate ip 10.0.0.1");
}

#[tokio::test]
async fn trigger_without_ids_sends_null() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/scans/trigger"))
        .and(body_json(json!({ "ids": null, "batch_size": 50 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accepted": true })))
        .expect(1)
        .mount(&server)
        .await;

    let accepted = client(&server)
        .trigger_operation(&OperationKind::Scan, None, 50)
        .await
        .unwrap();
    assert!(accepted);
}

#[tokio::test]
async fn trigger_with_ids_uses_named_operation_path() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/patches/trigger"))
        .and(body_json(json!({ "ids": [1, 2, 3], "batch_size": 10 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accepted": false })))
        .mount(&server)
        .await;

    let accepted = client(&server)
        .trigger_operation(
            &OperationKind::Named("patches".to_string()),
            Some(&[1, 2, 3][..]),
            10,
        )
        .await
        .unwrap();
    assert!(!accepted);
}

#[tokio::test]
async fn bearer_token_is_attached() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/servers"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "records": [], "total_count": 0 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let api = ReqwestFleetApi::new(&ClientSettings {
        base_url: server.uri(),
        bearer_token: Some("s3cret".to_string()),
        ..ClientSettings::default()
    })
    .unwrap();
    assert_eq!(api.count(&InventoryFilter::default()).await.unwrap(), 0);
}

#[tokio::test]
async fn slow_backend_times_out() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/servers/exists"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(250))
                .set_body_json(json!({ "valid": true })),
        )
        .mount(&server)
        .await;

    let api = ReqwestFleetApi::new(&ClientSettings {
        base_url: server.uri(),
        request_timeout: Duration::from_millis(50),
        ..ClientSettings::default()
    })
    .unwrap();
    let err = api
        .exists_by_key(&HostKey::from_reported("10.0.0.1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Timeout);
}

#[tokio::test]
async fn malformed_body_is_a_decode_failure() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = client(&server)
        .inventory(&InventoryFilter::default(), 1, 10)
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::Decode);
}

#[test]
fn unparsable_base_url_is_rejected() {
    let err = ReqwestFleetApi::new(&ClientSettings {
        base_url: "not a url".to_string(),
        ..ClientSettings::default()
    })
    .unwrap_err();
    assert_eq!(err.kind, FailureKind::InvalidUrl);
}
