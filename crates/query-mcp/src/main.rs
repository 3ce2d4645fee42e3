//! ClickHouse MCP server binary
//!
//! Serves `execute_clickhouse_query` over stdio. Connection settings come from
//! the `CLICKHOUSE_*` environment variables.

use analyst_config::ClickHouseConfig;
use analyst_query::ClickHouseBackend;
use analyst_query_mcp::ClickHouseServer;
use anyhow::Context;
use rmcp::ServiceExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout belongs to the MCP transport; stderr is shared with the parent
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = ClickHouseConfig::from_env().context("invalid ClickHouse settings")?;
    tracing::info!("Starting ClickHouse MCP server for {}", config.base_url());

    let backend = ClickHouseBackend::new(&config).context("failed to build HTTP client")?;
    let server = ClickHouseServer::new(backend);

    let service = server
        .serve(rmcp::transport::stdio())
        .await
        .inspect_err(|e| {
            tracing::error!("Failed to start MCP service: {}", e);
        })?;

    service.waiting().await?;
    tracing::info!("ClickHouse MCP server shutting down");

    Ok(())
}
