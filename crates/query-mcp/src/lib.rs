//! ClickHouse MCP server
//!
//! Exposes a single tool, `execute_clickhouse_query`, that runs read-only SQL
//! through a [`QueryGuard`]. Guard errors are returned as tool results with
//! `is_error` set so the calling model can read them.

use std::sync::Arc;

use analyst_query::{QueryBackend, QueryGuard};
use rmcp::{
    model::*,
    schemars::{self, JsonSchema},
    service::{RequestContext, RoleServer},
    ErrorData as McpError, ServerHandler,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const TOOL_NAME: &str = "execute_clickhouse_query";

const TOOL_DESCRIPTION: &str = "Executes a read-only SQL query against the ClickHouse database \
and returns the result as a JSON string. Allowed queries: SELECT, SHOW, DESCRIBE.";

/// Parameters for the query tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryParams {
    /// The SQL query to execute.
    pub query: String,
}

/// MCP server backed by a query guard
pub struct ClickHouseServer<B> {
    guard: Arc<QueryGuard<B>>,
}

impl<B> Clone for ClickHouseServer<B> {
    fn clone(&self) -> Self {
        Self {
            guard: Arc::clone(&self.guard),
        }
    }
}

impl<B> std::fmt::Debug for ClickHouseServer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseServer").finish_non_exhaustive()
    }
}

impl<B: QueryBackend + 'static> ClickHouseServer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            guard: Arc::new(QueryGuard::new(backend)),
        }
    }

    /// Run one query and wrap the outcome as a tool result
    pub async fn run_query(&self, query: &str) -> CallToolResult {
        match self.guard.execute_query(query).await {
            Ok(rows) => CallToolResult::success(vec![Content::text(rows)]),
            Err(e) => {
                debug!("◆ QUERY TOOL ERROR: {}", e);
                CallToolResult::error(vec![Content::text(e.to_string())])
            }
        }
    }

    fn query_tool(&self) -> Tool {
        let schema = schemars::schema_for!(QueryParams);
        let input_schema = match serde_json::to_value(schema).unwrap_or_default() {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };

        Tool {
            name: TOOL_NAME.into(),
            title: Some("Execute ClickHouse Query".into()),
            description: Some(TOOL_DESCRIPTION.into()),
            input_schema,
            output_schema: None,
            annotations: None,
            icons: None,
            meta: None,
        }
    }
}

impl<B: QueryBackend + 'static> ServerHandler for ClickHouseServer<B> {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Read-only access to a ClickHouse database. Use 'execute_clickhouse_query' \
                with a SELECT, SHOW or DESCRIBE statement; rows come back as a JSON array."
                    .into(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: vec![self.query_tool()],
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if request.name.as_ref() != TOOL_NAME {
            return Err(McpError::invalid_params(
                format!("Unknown tool: {}", request.name),
                None,
            ));
        }

        let params: QueryParams = match &request.arguments {
            Some(args) => serde_json::from_value(serde_json::Value::Object(args.clone()))
                .map_err(|e| McpError::invalid_params(format!("Invalid parameters: {}", e), None))?,
            None => {
                return Err(McpError::invalid_params(
                    "Missing 'query' parameter",
                    None,
                ))
            }
        };

        Ok(self.run_query(&params.query).await)
    }
}
