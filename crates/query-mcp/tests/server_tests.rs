//! Tool results produced by the MCP server

use analyst_query::{BackendError, QueryBackend, QueryResult};
use analyst_query_mcp::{ClickHouseServer, TOOL_NAME};
use async_trait::async_trait;
use mockall::mock;
use rmcp::model::CallToolResult;
use serde_json::{json, Value};

mock! {
    pub Backend {}

    #[async_trait]
    impl QueryBackend for Backend {
        async fn ping(&self) -> Result<(), BackendError>;
        async fn query(&self, sql: &str) -> Result<QueryResult, BackendError>;
    }
}

fn as_json(result: &CallToolResult) -> Value {
    serde_json::to_value(result).unwrap()
}

fn text_of(result: &CallToolResult) -> String {
    as_json(result)["content"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

fn is_error(result: &CallToolResult) -> bool {
    as_json(result)["isError"].as_bool().unwrap_or(false)
}

#[test]
fn test_tool_name() {
    assert_eq!(TOOL_NAME, "execute_clickhouse_query");
}

#[tokio::test]
async fn test_select_returns_rows() {
    let mut backend = MockBackend::new();
    backend.expect_ping().returning(|| Ok(()));
    backend.expect_query().times(1).returning(|_| {
        Ok(QueryResult {
            column_names: vec!["count".to_string()],
            rows: vec![vec![json!(42)]],
        })
    });

    let server = ClickHouseServer::new(backend);
    let result = server.run_query("SELECT count() AS count FROM events").await;

    assert!(!is_error(&result));
    let rows: Value = serde_json::from_str(&text_of(&result)).unwrap();
    assert_eq!(rows, json!([{"count": 42}]));
}

#[tokio::test]
async fn test_write_query_is_error_result() {
    let mut backend = MockBackend::new();
    backend.expect_ping().times(0);
    backend.expect_query().times(0);

    let server = ClickHouseServer::new(backend);
    let result = server.run_query("TRUNCATE TABLE events").await;

    assert!(is_error(&result));
    assert_eq!(
        text_of(&result),
        "Error: Only SELECT, SHOW, and DESCRIBE queries are allowed."
    );
}

#[tokio::test]
async fn test_connection_failure_is_error_result() {
    let mut backend = MockBackend::new();
    backend
        .expect_ping()
        .returning(|| Err(BackendError::Decode("refused".to_string())));

    let server = ClickHouseServer::new(backend);
    let result = server.run_query("SELECT 1").await;

    assert!(is_error(&result));
    assert_eq!(text_of(&result), "Error: ClickHouse connection failed.");
}

#[tokio::test]
async fn test_cloned_server_shares_guard() {
    let mut backend = MockBackend::new();
    backend.expect_ping().times(2).returning(|| Ok(()));
    backend
        .expect_query()
        .times(2)
        .returning(|_| Ok(QueryResult::default()));

    let server = ClickHouseServer::new(backend);
    let clone = server.clone();

    assert_eq!(text_of(&server.run_query("SHOW DATABASES").await), "[]");
    assert_eq!(text_of(&clone.run_query("SHOW DATABASES").await), "[]");
}
