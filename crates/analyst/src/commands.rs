//! Analyst command implementations

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use analyst_agent::tools::{connect_tool_server, PythonSandboxTool};
use analyst_agent::{AgentLoop, CodeSandbox, RunOutcome, ToolRegistry, ToolTrait};
use analyst_bus::{EventBus, EventDispatcher, TerminalObserver};
use analyst_config::{tool_config_path, Config, ConfigError, ToolServerConfig};
use analyst_provider::ChatCompletionsProvider;

/// Arguments of a single question
#[derive(Debug, Clone)]
pub struct AskOptions {
    pub question: String,
    pub tools_config: Option<PathBuf>,
    pub model: Option<String>,
    pub max_iterations: Option<u32>,
}

/// Answer one question and print the result
pub async fn ask_command(options: AskOptions) -> Result<RunOutcome> {
    let config = Config::from_env().context("invalid environment configuration")?;
    let tools_path = tool_config_path(options.tools_config.as_deref());

    let tools = build_tools(&config, &tools_path).await?;
    if tools.is_empty() {
        bail!("No tools could be initialized. Exiting.");
    }
    info!("Tools ready: {}", tools.names().join(", "));

    let provider = ChatCompletionsProvider::new(
        config.model.api_base.clone(),
        config.model.api_key.clone(),
        options.model.unwrap_or_else(|| config.model.model.clone()),
    );

    let (bus, events) = EventBus::channel();
    let dispatcher = tokio::spawn(EventDispatcher::new(events, TerminalObserver::stdio()).run());

    let agent = AgentLoop::new(provider, tools, bus)
        .with_max_iterations(
            options
                .max_iterations
                .unwrap_or(config.agent.max_iterations),
        )
        .with_max_messages(config.agent.max_conversation_messages);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted");
            interrupt.cancel();
        }
    });

    let result = agent.run_with_cancel(&options.question, cancel).await;

    // Dropping the loop closes the bus so the dispatcher drains and stops
    drop(agent);
    if let Err(e) = dispatcher.await {
        warn!("Event dispatcher failed: {}", e);
    }

    let run = result?;
    debug!(
        "Run finished after {} iteration(s)",
        run.outcome.iterations()
    );
    Ok(run.outcome)
}

/// Register the remote query tool and the Python tool, whichever are usable
async fn build_tools(config: &Config, tools_path: &Path) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    let query_tool = connect_query_tool(tools_path).await;
    if let Some(tool) = &query_tool {
        registry.register_shared(Arc::clone(tool))?;
    }

    let mut sandbox = CodeSandbox::new(&config.sandbox);
    if sandbox.is_available().await {
        if let Some(tool) = query_tool {
            sandbox = sandbox.with_query_tool(tool);
        }
        registry.register(PythonSandboxTool::new(sandbox))?;
    } else {
        eprintln!(
            "Warning: Python interpreter '{}' is not available. Code execution is disabled.",
            config.sandbox.python
        );
    }

    Ok(registry)
}

async fn connect_query_tool(tools_path: &Path) -> Option<Arc<dyn ToolTrait>> {
    let server = match ToolServerConfig::load_from(tools_path).await {
        Ok(server) => server,
        Err(ConfigError::NotFound(path)) => {
            eprintln!(
                "Warning: {} not found. Database queries are unavailable.",
                path.display()
            );
            return None;
        }
        Err(e) => {
            eprintln!("Warning: could not load {}: {}", tools_path.display(), e);
            return None;
        }
    };

    match connect_tool_server(&server).await {
        Ok(tool) => {
            let tool: Arc<dyn ToolTrait> = Arc::new(tool);
            Some(tool)
        }
        Err(e) => {
            eprintln!("Failed to connect to MCP server: {}", e);
            None
        }
    }
}
