//! Tool abstraction and registry
//!
//! Every tool the model can call implements [`ToolTrait`]. Failures are
//! returned as [`ToolError`] values whose text becomes the observation, so a
//! broken tool never stops the loop.

pub mod python;
pub mod query;
pub mod remote;

pub use python::PythonSandboxTool;
pub use query::ClickHouseQueryTool;
pub use remote::{connect_tool_server, McpQueryTool};

use analyst_provider::Tool;
use analyst_query::QueryError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::sandbox::SandboxError;
use crate::AgentError;

/// Name of the read-only SQL tool, local or remote
pub const QUERY_TOOL_NAME: &str = "execute_clickhouse_query";

pub(crate) const QUERY_TOOL_DESCRIPTION: &str = "Executes a read-only SQL query against the \
ClickHouse database and returns the result as a JSON string. Allowed queries: SELECT, SHOW, \
DESCRIBE.";

/// Why a tool call produced no result
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Error: tool '{0}' not found")]
    NotFound(String),

    #[error("Error: invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Error: tool server unavailable: {0}")]
    Connection(String),

    /// Error text reported by the remote tool itself
    #[error("{0}")]
    Remote(String),

    #[error("Error: code execution failed:\n{0}")]
    Execution(String),

    #[error("Error: resource limit exceeded: {0}")]
    ResourceExceeded(String),
}

impl From<SandboxError> for ToolError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Timeout(_) | SandboxError::MemoryExceeded | SandboxError::Killed(_) => {
                ToolError::ResourceExceeded(err.to_string())
            }
            SandboxError::Failed { stderr } => ToolError::Execution(stderr),
            other => ToolError::Execution(other.to_string()),
        }
    }
}

pub type ToolResult = std::result::Result<String, ToolError>;

/// A capability the model can invoke
#[async_trait]
pub trait ToolTrait: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn execute(&self, args: Value) -> ToolResult;

    /// Source code carried by a call, for tools that run code
    fn code_argument(&self, _args: &Value) -> Option<String> {
        None
    }
}

pub fn to_provider_tool(tool: &dyn ToolTrait) -> Tool {
    Tool::new(tool.name(), tool.description(), tool.parameters())
}

/// Pull a required string argument out of a call
pub(crate) fn string_arg(args: &Value, key: &str) -> Result<String, ToolError> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ToolError::InvalidArguments(format!(
            "'{}' must be a string, got {}",
            key, other
        ))),
        None => Err(ToolError::InvalidArguments(format!(
            "missing required argument '{}'",
            key
        ))),
    }
}

/// Tools available to one run, keyed by unique name
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolTrait>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: ToolTrait + 'static>(&mut self, tool: T) -> crate::Result<()> {
        self.register_shared(Arc::new(tool))
    }

    /// Register a tool that is also held elsewhere, e.g. by the sandbox bridge
    pub fn register_shared(&mut self, tool: Arc<dyn ToolTrait>) -> crate::Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        debug!("◆ TOOL REGISTERED: {}", name);
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolTrait>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Definitions offered to the model, ordered by name
    pub fn definitions(&self) -> Vec<Tool> {
        let mut definitions: Vec<Tool> = self
            .tools
            .values()
            .map(|t| to_provider_tool(t.as_ref()))
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub async fn execute(&self, name: &str, args: Value) -> ToolResult {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(args).await
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
