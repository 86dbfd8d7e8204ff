#![allow(clippy::unwrap_used)]
// FarmTopology over the REST backend, against a wiremock server.

use std::sync::Arc;

use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use canopy_core::{
    AuthCredentials, AutoConfirm, FarmConfig, FarmStore, FarmTopology, NodeKind, RestBackend,
    TracingNotifier,
};

const FARM: &str = "farm-1";

async fn farm_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/rows"))
        .and(query_param("farm_id", "eq.farm-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "r1", "farm_id": FARM, "name": "Row 1", "position": 0,
            "racks": [{
                "id": "k1", "row_id": "r1", "name": "Rack 1", "position": 0,
                "shelves": [{ "id": "s1", "rack_id": "k1", "name": "Shelf 1", "position": 0 }]
            }]
        }])))
        .mount(&server)
        .await;
    server
}

fn topology(server: &MockServer) -> FarmTopology {
    let config = FarmConfig::new(
        server.uri().parse().unwrap(),
        AuthCredentials::anon(SecretString::from("anon-key")),
        FARM,
    );
    let backend = Arc::new(RestBackend::new(&config).unwrap());
    FarmTopology::new(
        Arc::new(FarmStore::new(FARM)),
        backend.clone(),
        backend,
        Arc::new(TracingNotifier),
        Arc::new(AutoConfirm(true)),
    )
}

fn expect_assignment_delete(target_type: &str, ids: &str, removed: serde_json::Value) -> Mock {
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/device_assignments"))
        .and(query_param("farm_id", "eq.farm-1"))
        .and(query_param("target_type", format!("eq.{target_type}")))
        .and(query_param("target_id", format!("in.({ids})")))
        .respond_with(ResponseTemplate::new(200).set_body_json(removed))
        .expect(1)
}

#[tokio::test]
async fn deleting_a_row_deletes_assignments_of_its_subtree() {
    let server = farm_server().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/rows"))
        .and(query_param("id", "eq.r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "r1" }])))
        .expect(1)
        .mount(&server)
        .await;
    expect_assignment_delete("row", "r1", json!([])).mount(&server).await;
    expect_assignment_delete("rack", "k1", json!([])).mount(&server).await;
    expect_assignment_delete("shelf", "s1", json!([{ "id": "a1" }]))
        .mount(&server)
        .await;

    let topology = topology(&server);
    topology.load().await.unwrap();
    let report = topology.remove_child(NodeKind::Row, &"r1".into()).await.unwrap();

    assert_eq!((report.rows, report.racks, report.shelves), (1, 1, 1));
    assert!(topology.store().find_node(&"s1".into()).is_none());
    server.verify().await;
}

#[tokio::test]
async fn failed_node_delete_leaves_assignments_alone() {
    let server = farm_server().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/shelves"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "code": "PGRST000", "message": "database unavailable"
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/device_assignments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let topology = topology(&server);
    topology.load().await.unwrap();
    let result = topology.remove_child(NodeKind::Shelf, &"s1".into()).await;

    assert!(result.is_err());
    assert!(topology.store().find_node(&"s1".into()).is_some());
    server.verify().await;
}
