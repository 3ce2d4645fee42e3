//! In-process SQL tool

use analyst_provider::object_schema;
use analyst_query::{QueryBackend, QueryGuard};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::{string_arg, ToolResult, ToolTrait, QUERY_TOOL_DESCRIPTION, QUERY_TOOL_NAME};

/// Runs queries through a query guard without a tool-server process
pub struct ClickHouseQueryTool<B> {
    guard: Arc<QueryGuard<B>>,
}

impl<B: QueryBackend> ClickHouseQueryTool<B> {
    pub fn new(backend: B) -> Self {
        Self {
            guard: Arc::new(QueryGuard::new(backend)),
        }
    }

    pub fn from_guard(guard: Arc<QueryGuard<B>>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl<B: QueryBackend + 'static> ToolTrait for ClickHouseQueryTool<B> {
    fn name(&self) -> &str {
        QUERY_TOOL_NAME
    }

    fn description(&self) -> &str {
        QUERY_TOOL_DESCRIPTION
    }

    fn parameters(&self) -> Value {
        object_schema(vec![(
            "query".to_string(),
            "The SQL query to execute.".to_string(),
            true,
        )])
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let query = string_arg(&args, "query")?;
        debug!("◆ LOCAL QUERY TOOL");
        Ok(self.guard.execute_query(&query).await?)
    }
}
