//! Agent event bus
//!
//! The agent loop publishes [`AgentEvent`]s as it works. A dispatcher task
//! drains them in order and hands each one to an [`EventObserver`]. Observers
//! only display; nothing flows back into the loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub mod terminal;

pub use terminal::TerminalObserver;

/// Tags attached to streamed text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTag {
    /// The text is code about to run in the sandbox
    ToolCode,
}

/// Keys for state updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKey {
    /// Reasoning that accompanied a tool request
    Thought,
    /// The final answer
    Response,
    /// Run-level notices such as hitting the iteration bound
    Notice,
}

impl UpdateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKey::Thought => "thought",
            UpdateKey::Response => "response",
            UpdateKey::Notice => "notice",
        }
    }
}

/// Everything the loop reports while it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Token {
        text: String,
        #[serde(default)]
        tags: Vec<TokenTag>,
    },
    ToolCall {
        iteration: u32,
        name: String,
        arguments: Value,
    },
    Update {
        key: UpdateKey,
        value: String,
    },
    Error {
        message: String,
    },
}

impl AgentEvent {
    /// Code the sandbox is about to execute
    pub fn tool_code(code: impl Into<String>) -> Self {
        AgentEvent::Token {
            text: code.into(),
            tags: vec![TokenTag::ToolCode],
        }
    }

    pub fn tool_call(iteration: u32, name: impl Into<String>, arguments: Value) -> Self {
        AgentEvent::ToolCall {
            iteration,
            name: name.into(),
            arguments,
        }
    }

    pub fn update(key: UpdateKey, value: impl Into<String>) -> Self {
        AgentEvent::Update {
            key,
            value: value.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        AgentEvent::Error {
            message: message.into(),
        }
    }

    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Token { .. } => "token",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::Update { .. } => "update",
            AgentEvent::Error { .. } => "error",
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<AgentEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<AgentEvent>;

/// Publishing half of the event channel
#[derive(Debug, Clone)]
pub struct EventBus {
    events: EventSender,
}

impl EventBus {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    /// Create a bus and the receiver its events arrive on
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    #[allow(clippy::result_large_err)]
    pub fn publish(&self, event: AgentEvent) -> Result<(), mpsc::error::SendError<AgentEvent>> {
        trace!("◆ EVENT: {}", event.kind());
        self.events.send(event)
    }

    /// True once the receiving side has been dropped
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Receives events for display
pub trait EventObserver: Send {
    fn on_event(&mut self, event: &AgentEvent);
}

impl<F> EventObserver for F
where
    F: FnMut(&AgentEvent) + Send,
{
    fn on_event(&mut self, event: &AgentEvent) {
        self(event)
    }
}

/// Drains the event channel into an observer
pub struct EventDispatcher<O> {
    receiver: EventReceiver,
    observer: O,
}

impl<O: EventObserver> EventDispatcher<O> {
    pub fn new(receiver: EventReceiver, observer: O) -> Self {
        Self { receiver, observer }
    }

    /// Deliver events until every sender is gone, then hand the observer back
    pub async fn run(mut self) -> O {
        debug!("◆ EVENT DISPATCHER ONLINE");

        while let Some(event) = self.receiver.recv().await {
            self.observer.on_event(&event);
        }

        debug!("◆ EVENT DISPATCHER OFFLINE");
        self.observer
    }
}
