//! Sandboxed Python tool

use analyst_provider::object_schema;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{string_arg, ToolResult, ToolTrait};
use crate::sandbox::CodeSandbox;

/// Runs model-written Python in a [`CodeSandbox`]
pub struct PythonSandboxTool {
    sandbox: CodeSandbox,
}

impl PythonSandboxTool {
    pub fn new(sandbox: CodeSandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl ToolTrait for PythonSandboxTool {
    fn name(&self) -> &str {
        "python"
    }

    fn description(&self) -> &str {
        "Runs Python code in an isolated interpreter with pandas and numpy available and \
        returns everything it prints. Call execute_clickhouse_query(query) inside the code \
        to fetch rows as a JSON string. Use this for multi-step transformations or for \
        combining the results of several queries."
    }

    fn parameters(&self) -> Value {
        object_schema(vec![(
            "code".to_string(),
            "Python source to execute. Print the values you need to see.".to_string(),
            true,
        )])
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let code = string_arg(&args, "code")?;
        debug!("◆ PYTHON SNIPPET: {} BYTES", code.len());
        Ok(self.sandbox.run(&code).await?)
    }

    fn code_argument(&self, args: &Value) -> Option<String> {
        args.get("code").and_then(Value::as_str).map(str::to_string)
    }
}
