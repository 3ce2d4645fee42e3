//! Data analyst agent core
//!
//! An [`AgentLoop`] asks the model what to do next, runs the requested tools
//! through a [`ToolRegistry`] and feeds the observations back until the model
//! answers or the iteration bound is hit.

use thiserror::Error;

pub mod context;
pub mod loop_agent;
pub mod sandbox;
mod seccomp;
pub mod tools;

pub use context::{ContextBuilder, Conversation};
pub use loop_agent::{AgentLoop, AgentRun, RunOutcome};
pub use sandbox::{CodeSandbox, SandboxError};
pub use tools::{ToolError, ToolRegistry, ToolResult, ToolTrait};

/// Loop-level errors. Tool failures never show up here.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("{0}")]
    Provider(String),

    #[error("conversation is full ({0} messages)")]
    ConversationFull(usize),

    #[error("run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AgentError>;
