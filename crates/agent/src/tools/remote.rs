//! SQL tool served by an MCP child process
//!
//! The tool server is launched from the tool configuration file and spoken to
//! over its stdin/stdout. Only `execute_clickhouse_query` is taken from it.

use analyst_config::ToolServerConfig;
use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, CallToolResult, RawContent},
    service::RunningService,
    transport::TokioChildProcess,
    RoleClient, ServiceExt,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ToolError, ToolResult, ToolTrait, QUERY_TOOL_DESCRIPTION, QUERY_TOOL_NAME};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote `execute_clickhouse_query`
pub struct McpQueryTool {
    service: RunningService<RoleClient, ()>,
    description: String,
    parameters: Value,
}

/// Spawn the tool server, complete the handshake and find the query tool
pub async fn connect_tool_server(config: &ToolServerConfig) -> Result<McpQueryTool, ToolError> {
    let mut command = Command::new(&config.command);
    command.args(&config.args);
    if let Some(env) = &config.env {
        command.envs(env);
    }

    debug!("◆ SPAWNING TOOL SERVER: {} {:?}", config.command, config.args);
    let transport = TokioChildProcess::new(command)
        .map_err(|e| ToolError::Connection(format!("failed to start {}: {}", config.command, e)))?;

    let handshake = async {
        let service = ()
            .serve(transport)
            .await
            .map_err(|e| ToolError::Connection(e.to_string()))?;
        let tools = service
            .list_all_tools()
            .await
            .map_err(|e| ToolError::Connection(e.to_string()))?;
        Ok::<_, ToolError>((service, tools))
    };

    let (service, tools) = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
        .await
        .map_err(|_| {
            ToolError::Connection(format!(
                "handshake timed out after {}s",
                HANDSHAKE_TIMEOUT.as_secs()
            ))
        })??;

    let tool = tools
        .into_iter()
        .find(|t| t.name.as_ref() == QUERY_TOOL_NAME)
        .ok_or_else(|| {
            ToolError::Connection(format!("tool server does not offer {}", QUERY_TOOL_NAME))
        })?;

    info!("◆ TOOL SERVER CONNECTED: {}", QUERY_TOOL_NAME);
    Ok(McpQueryTool {
        service,
        description: tool
            .description
            .map(|d| d.to_string())
            .unwrap_or_else(|| QUERY_TOOL_DESCRIPTION.to_string()),
        parameters: Value::Object((*tool.input_schema).clone()),
    })
}

/// Join the text parts of a tool result
fn result_text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|content| match &content.raw {
            RawContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl ToolTrait for McpQueryTool {
    fn name(&self) -> &str {
        QUERY_TOOL_NAME
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        if !args.is_object() {
            return Err(ToolError::InvalidArguments(format!(
                "expected an object, got {}",
                args
            )));
        }

        let request: CallToolRequestParam =
            serde_json::from_value(json!({"name": QUERY_TOOL_NAME, "arguments": args}))
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let result = self
            .service
            .call_tool(request)
            .await
            .map_err(|e| ToolError::Connection(e.to_string()))?;

        let text = result_text(&result);
        if result.is_error.unwrap_or(false) {
            return Err(ToolError::Remote(text));
        }
        Ok(text)
    }
}
