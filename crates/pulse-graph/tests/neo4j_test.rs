//! Neo4j store against a mocked transactional endpoint.

use pulse_core::{EdgeType, EntityType, Error, GraphQuery, GraphStore, NodeRef, PropertyMap};
use pulse_graph::{Neo4jConfig, Neo4jGraphStore};
use serde_json::json;
use wiremock::matchers::{basic_auth, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store(server: &MockServer) -> Neo4jGraphStore {
    Neo4jGraphStore::new(Neo4jConfig::new(server.uri(), "neo4j", "secret").with_database("acme"))
}

fn result(columns: &[&str], rows: serde_json::Value) -> ResponseTemplate {
    let data: Vec<_> = rows
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|row| json!({ "row": row, "meta": [] }))
        .collect();
    ResponseTemplate::new(200).set_body_json(json!({
        "results": [{ "columns": columns, "data": data }],
        "errors": []
    }))
}

#[tokio::test]
async fn merge_node_reports_creation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/db/acme/tx/commit"))
        .and(basic_auth("neo4j", "secret"))
        .and(body_string_contains("MERGE (n:Actor {name: $name})"))
        .respond_with(result(&["created"], json!([[true]])))
        .expect(1)
        .mount(&server)
        .await;

    let mut props = PropertyMap::new();
    props.insert("description".into(), json!("Product lead"));
    let created = store(&server)
        .merge_node(&NodeRef::new(EntityType::Actor, "Alice"), &props)
        .await
        .unwrap();
    assert!(created);
}

#[tokio::test]
async fn merge_edge_without_rows_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/db/acme/tx/commit"))
        .and(body_string_contains("MERGE (a)-[r:AT_TIME]->(b)"))
        .respond_with(result(&["created"], json!([])))
        .mount(&server)
        .await;

    let err = store(&server)
        .merge_edge(
            &NodeRef::new(EntityType::Event, "launch"),
            &NodeRef::new(EntityType::Time, "2024-05-01"),
            EdgeType::AtTime,
            &PropertyMap::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn increment_returns_new_value() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("coalesce(n.event_count, 0) + $by"))
        .respond_with(result(&["value"], json!([[7]])))
        .mount(&server)
        .await;

    let value = store(&server)
        .increment(&NodeRef::topic("ops"), "event_count", 1)
        .await
        .unwrap();
    assert_eq!(value, 7);
}

#[tokio::test]
async fn invalid_property_key_is_rejected_before_request() {
    let server = MockServer::start().await;
    let mut props = PropertyMap::new();
    props.insert("x} DETACH DELETE n //".into(), json!(1));
    let err = store(&server)
        .set_properties(&NodeRef::topic("ops"), &props)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn cypher_errors_become_graph_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [],
            "errors": [{ "code": "Neo.ClientError.Statement.SyntaxError", "message": "bad" }]
        })))
        .mount(&server)
        .await;

    let err = store(&server).run(GraphQuery::Topics).await.unwrap_err();
    match err {
        Error::Graph(msg) => assert!(msg.contains("SyntaxError")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn rows_are_keyed_by_column() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("MATCH (t:Topic)"))
        .respond_with(result(
            &["name", "event_count", "summary"],
            json!([["hiring", 3, null], ["ops", 51, "Ops work"]]),
        ))
        .mount(&server)
        .await;

    let rows = store(&server).run(GraphQuery::Topics).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["name"], "ops");
    assert_eq!(rows[1]["event_count"], 51);
    assert!(rows[0]["summary"].is_null());
}

#[tokio::test]
async fn node_query_unwraps_properties() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("RETURN properties(n) AS props"))
        .respond_with(result(
            &["props"],
            json!([[{ "name": "ops", "split_pending": true }]]),
        ))
        .mount(&server)
        .await;

    let rows = store(&server)
        .run(GraphQuery::Node(NodeRef::topic("ops")))
        .await
        .unwrap();
    assert_eq!(rows[0]["split_pending"], true);
}
