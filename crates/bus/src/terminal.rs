//! Terminal rendering of agent events

use crate::{AgentEvent, EventObserver, TokenTag, UpdateKey};
use std::io::{self, Stderr, Stdout, Write};
use tracing::{debug, warn};

const RESPONSE_HEADER: &str = "--- Agent Final Response ---";
const RESPONSE_FOOTER: &str = "--------------------------";
const CODE_HEADER: &str = "--- Code to be Executed ---";
const CODE_FOOTER: &str = "---------------------------";

/// Writes answers and code blocks to `out`, errors and notices to `err`
pub struct TerminalObserver<O, E> {
    out: O,
    err: E,
}

impl TerminalObserver<Stdout, Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> TerminalObserver<O, E> {
    pub fn new(out: O, err: E) -> Self {
        Self { out, err }
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }

    fn render(&mut self, event: &AgentEvent) -> io::Result<()> {
        match event {
            AgentEvent::Error { message } => {
                writeln!(self.err, "Agent Error 🤖: {}", message)?;
                self.err.flush()
            }
            AgentEvent::Update {
                key: UpdateKey::Response,
                value,
            } => {
                writeln!(self.out, "\n{}", RESPONSE_HEADER)?;
                writeln!(self.out, "{}", value)?;
                writeln!(self.out, "{}", RESPONSE_FOOTER)?;
                self.out.flush()
            }
            AgentEvent::Update {
                key: UpdateKey::Notice,
                value,
            } => {
                writeln!(self.err, "Agent Notice: {}", value)?;
                self.err.flush()
            }
            AgentEvent::Token { text, tags } if tags.contains(&TokenTag::ToolCode) => {
                writeln!(self.out, "\n{}", CODE_HEADER)?;
                writeln!(self.out, "{}", text)?;
                writeln!(self.out, "{}", CODE_FOOTER)?;
                self.out.flush()
            }
            other => {
                debug!("◆ {}: {:?}", other.kind(), other);
                Ok(())
            }
        }
    }
}

impl<O: Write + Send, E: Write + Send> EventObserver for TerminalObserver<O, E> {
    fn on_event(&mut self, event: &AgentEvent) {
        if let Err(e) = self.render(event) {
            warn!("◆ TERMINAL WRITE FAILED: {}", e);
        }
    }
}
