//! Read-only SQL access to ClickHouse
//!
//! [`QueryGuard`] is the only way queries reach a [`QueryBackend`]. It checks
//! the statement keyword before anything touches the network and renders rows
//! as a JSON array of objects.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub mod clickhouse;

pub use clickhouse::ClickHouseBackend;

/// Statement keywords a query may start with
pub const ALLOWED_STATEMENTS: [&str; 3] = ["SELECT", "SHOW", "DESCRIBE"];

/// Errors surfaced to callers of the guard
///
/// The display strings are the observations the model reads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Error: Only SELECT, SHOW, and DESCRIBE queries are allowed.")]
    NotReadOnly,

    #[error("Error: ClickHouse connection failed.")]
    ConnectionFailed,

    #[error("Error querying ClickHouse: {0}")]
    Backend(String),
}

/// Errors raised by a backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("unexpected response format: {0}")]
    Decode(String),
}

/// Column names plus rows, in the order the database returned them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// A database that can be pinged and queried
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn ping(&self) -> Result<(), BackendError>;
    async fn query(&self, sql: &str) -> Result<QueryResult, BackendError>;
}

/// True when the leading keyword is one of [`ALLOWED_STATEMENTS`]
///
/// This is a prefix check, not a parser. `SELECT 1; DROP TABLE t` passes.
pub fn is_read_only(query: &str) -> bool {
    let keyword: String = query
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    let keyword = keyword.to_ascii_uppercase();
    ALLOWED_STATEMENTS.contains(&keyword.as_str())
}

/// Validates queries and formats results
pub struct QueryGuard<B> {
    backend: B,
}

impl<B: QueryBackend> QueryGuard<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run a read-only query and return the rows as pretty-printed JSON
    pub async fn execute_query(&self, query: &str) -> Result<String, QueryError> {
        if !is_read_only(query) {
            warn!("◆ REJECTED NON READ-ONLY QUERY");
            return Err(QueryError::NotReadOnly);
        }

        if let Err(e) = self.backend.ping().await {
            warn!("◆ CLICKHOUSE PING FAILED: {}", e);
            return Err(QueryError::ConnectionFailed);
        }

        debug!("◆ QUERY: {}", query.trim());
        let result = self
            .backend
            .query(query)
            .await
            .map_err(|e| QueryError::Backend(e.to_string()))?;

        render_rows(&result)
    }
}

fn render_rows(result: &QueryResult) -> Result<String, QueryError> {
    if result.rows.is_empty() {
        return Ok("[]".to_string());
    }

    let objects: Vec<Value> = result
        .rows
        .iter()
        .map(|row| {
            let object: Map<String, Value> = result
                .column_names
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect();
            Value::Object(object)
        })
        .collect();

    serde_json::to_string_pretty(&objects).map_err(|e| QueryError::Backend(e.to_string()))
}
