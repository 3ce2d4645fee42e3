//! Configuration for the analyst agent
//!
//! The tool-server launch command is read from a JSON file. Connection
//! settings for the model, the database and the code sandbox come from the
//! environment, each with a default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub mod paths;

pub use paths::{tool_config_path, TOOL_CONFIG_FILE};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("◆ CONFIG READ ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("◆ CONFIG PARSE ERROR: {0}")]
    Json(#[from] serde_json::Error),

    #[error("◆ CONFIG NOT FOUND: {0}")]
    NotFound(PathBuf),

    #[error("◆ INVALID VALUE FOR {key}: {value:?}")]
    Invalid { key: String, value: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// How to launch the tool-server child process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolServerConfig {
    /// Executable path
    pub command: String,
    /// Ordered argument list
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the child
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
}

impl ToolServerConfig {
    /// Load the launch configuration from a JSON file
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        debug!("◆ READING TOOL SERVER CONFIG FROM {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: ToolServerConfig = serde_json::from_str(&content)?;
        Ok(config)
    }
}

/// ClickHouse connection parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClickHouseConfig {
    #[serde(default = "default_clickhouse_host")]
    pub host: String,
    #[serde(default = "default_clickhouse_port")]
    pub port: u16,
    #[serde(default = "default_clickhouse_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            host: default_clickhouse_host(),
            port: default_clickhouse_port(),
            user: default_clickhouse_user(),
            password: String::new(),
        }
    }
}

fn default_clickhouse_host() -> String {
    "localhost".to_string()
}

fn default_clickhouse_port() -> u16 {
    8123
}

fn default_clickhouse_user() -> String {
    "default".to_string()
}

impl ClickHouseConfig {
    /// Read `CLICKHOUSE_*` variables from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read `CLICKHOUSE_*` variables through a lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            host: lookup("CLICKHOUSE_HOST").unwrap_or(defaults.host),
            port: parse_or("CLICKHOUSE_PORT", &lookup, defaults.port)?,
            user: lookup("CLICKHOUSE_USER").unwrap_or(defaults.user),
            password: lookup("CLICKHOUSE_PASSWORD").unwrap_or(defaults.password),
        })
    }

    /// HTTP interface base URL
    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

/// Language model endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: None,
            model: default_model(),
        }
    }
}

fn default_api_base() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_model() -> String {
    "granite3.1-dense:8b".to_string()
}

/// Code sandbox limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxConfig {
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            timeout_secs: default_timeout_secs(),
            memory_mb: default_memory_mb(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_memory_mb() -> u64 {
    1024
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

/// Agent loop parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDefaults {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_conversation_messages")]
    pub max_conversation_messages: usize,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_conversation_messages: default_max_conversation_messages(),
        }
    }
}

fn default_max_iterations() -> u32 {
    5
}

fn default_max_conversation_messages() -> usize {
    64
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub agent: AgentDefaults,
}

impl Config {
    /// Build the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration through a lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model_defaults = ModelConfig::default();
        let model = ModelConfig {
            api_base: lookup("ANALYST_API_BASE").unwrap_or(model_defaults.api_base),
            api_key: lookup("ANALYST_API_KEY").filter(|k| !k.is_empty()),
            model: lookup("ANALYST_MODEL").unwrap_or(model_defaults.model),
        };

        let sandbox_defaults = SandboxConfig::default();
        let sandbox = SandboxConfig {
            python: lookup("ANALYST_PYTHON").unwrap_or(sandbox_defaults.python),
            timeout_secs: parse_or(
                "ANALYST_SANDBOX_TIMEOUT_SECS",
                &lookup,
                sandbox_defaults.timeout_secs,
            )?,
            memory_mb: parse_or(
                "ANALYST_SANDBOX_MEMORY_MB",
                &lookup,
                sandbox_defaults.memory_mb,
            )?,
            max_output_bytes: sandbox_defaults.max_output_bytes,
        };

        let agent_defaults = AgentDefaults::default();
        let agent = AgentDefaults {
            max_iterations: parse_or(
                "ANALYST_MAX_ITERATIONS",
                &lookup,
                agent_defaults.max_iterations,
            )?,
            max_conversation_messages: agent_defaults.max_conversation_messages,
        };

        Ok(Self {
            model,
            clickhouse: ClickHouseConfig::from_lookup(&lookup)?,
            sandbox,
            agent,
        })
    }
}

fn parse_or<T, F>(key: &str, lookup: &F, default: T) -> Result<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}
