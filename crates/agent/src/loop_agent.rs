//! Agent loop - core processing engine

use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use analyst_bus::{AgentEvent, EventBus, UpdateKey};
use analyst_provider::{ChatParams, Message, Provider, ToolChoice};

use crate::context::{ContextBuilder, Conversation};
use crate::tools::ToolRegistry;
use crate::{AgentError, Result};

const DEFAULT_MAX_ITERATIONS: u32 = 5;
const DEFAULT_MAX_MESSAGES: usize = 64;
const INCOMPLETE_NOTICE: &str = "no final answer reached";

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The model replied without requesting a tool
    Answered { answer: String, iterations: u32 },
    /// The iteration bound was hit first
    Incomplete {
        iterations: u32,
        partial: Option<String>,
    },
}

impl RunOutcome {
    pub fn answer(&self) -> Option<&str> {
        match self {
            RunOutcome::Answered { answer, .. } => Some(answer),
            RunOutcome::Incomplete { .. } => None,
        }
    }

    pub fn iterations(&self) -> u32 {
        match self {
            RunOutcome::Answered { iterations, .. } | RunOutcome::Incomplete { iterations, .. } => {
                *iterations
            }
        }
    }
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub outcome: RunOutcome,
    pub conversation: Conversation,
}

/// Drives the model/tool dialogue for one question at a time
pub struct AgentLoop<P: Provider> {
    provider: Arc<P>,
    tools: ToolRegistry,
    model: String,
    max_iterations: u32,
    max_messages: usize,
    events: EventBus,
    context: ContextBuilder,
}

impl<P: Provider> AgentLoop<P> {
    pub fn new(provider: P, tools: ToolRegistry, events: EventBus) -> Self {
        let model = provider.default_model();
        Self {
            provider: Arc::new(provider),
            tools,
            model,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_messages: DEFAULT_MAX_MESSAGES,
            events,
            context: ContextBuilder::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_context(mut self, context: ContextBuilder) -> Self {
        self.context = context;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Answer `prompt`
    pub async fn run(&self, prompt: &str) -> Result<AgentRun> {
        self.run_with_cancel(prompt, CancellationToken::new()).await
    }

    /// Answer `prompt`, giving up as soon as `cancel` fires
    pub async fn run_with_cancel(&self, prompt: &str, cancel: CancellationToken) -> Result<AgentRun> {
        info!("◆ RUN START: {} tools, model {}", self.tools.len(), self.model);
        let definitions = self.tools.definitions();
        let mut conversation = self.context.start(&definitions, prompt, self.max_messages);
        let mut partial: Option<String> = None;
        let mut iteration = 0u32;

        while iteration < self.max_iterations {
            iteration += 1;
            debug!("◆ ITERATION {}/{}", iteration, self.max_iterations);

            let params = ChatParams {
                model: self.model.clone(),
                messages: conversation.to_messages(),
                tools: definitions.clone(),
                tool_choice: ToolChoice::Auto,
                ..Default::default()
            };

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.fail(AgentError::Cancelled)),
                result = self.provider.chat(params) => match result {
                    Ok(response) => response,
                    Err(e) => return Err(self.fail(AgentError::Provider(e.to_string()))),
                },
            };

            let text = response
                .content
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);

            if !response.has_tool_calls() {
                let answer = extract_final_answer(text.as_deref().unwrap_or_default());
                self.append(&mut conversation, Message::assistant(answer.clone()))?;
                self.emit(AgentEvent::update(UpdateKey::Response, answer.clone()));
                info!("◆ ANSWERED AFTER {} ITERATION(S)", iteration);
                return Ok(AgentRun {
                    outcome: RunOutcome::Answered {
                        answer,
                        iterations: iteration,
                    },
                    conversation,
                });
            }

            if let Some(thought) = &text {
                self.emit(AgentEvent::update(UpdateKey::Thought, thought.clone()));
                partial = Some(thought.clone());
            }
            self.append(
                &mut conversation,
                Message::assistant_tool_calls(text, response.tool_calls.clone()),
            )?;

            for call in &response.tool_calls {
                let observation = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(self.fail(AgentError::Cancelled)),
                    observation = self.invoke(iteration, &call.name, &call.arguments) => observation,
                };
                self.append(
                    &mut conversation,
                    Message::tool(&call.id, &call.name, observation),
                )?;
            }
        }

        warn!("◆ ITERATION LIMIT {} REACHED", self.max_iterations);
        self.emit(AgentEvent::update(UpdateKey::Notice, INCOMPLETE_NOTICE));
        Ok(AgentRun {
            outcome: RunOutcome::Incomplete {
                iterations: iteration,
                partial,
            },
            conversation,
        })
    }

    /// Run one tool call and turn the outcome into observation text
    async fn invoke(&self, iteration: u32, name: &str, arguments: &Value) -> String {
        if let Some(code) = self
            .tools
            .get(name)
            .and_then(|tool| tool.code_argument(arguments))
        {
            self.emit(AgentEvent::tool_code(code));
        }
        self.emit(AgentEvent::tool_call(iteration, name, arguments.clone()));

        debug!("◆ EXECUTING TOOL: {}", name);
        match self.tools.execute(name, arguments.clone()).await {
            Ok(output) => output,
            Err(e) => {
                warn!("◆ TOOL {} FAILED: {}", name, e);
                e.to_string()
            }
        }
    }

    fn append(&self, conversation: &mut Conversation, message: Message) -> Result<()> {
        conversation.push(message).map_err(|e| self.fail(e))
    }

    fn fail(&self, err: AgentError) -> AgentError {
        self.emit(AgentEvent::error(err.to_string()));
        err
    }

    fn emit(&self, event: AgentEvent) {
        if self.events.publish(event).is_err() {
            trace!("◆ EVENT DROPPED: NO OBSERVER");
        }
    }
}

fn final_answer_marker() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| Regex::new(r"(?is)final answer:\s*(.*)$").ok())
        .as_ref()
}

/// Text after a `Final Answer:` marker, or the whole reply without one
pub fn extract_final_answer(text: &str) -> String {
    final_answer_marker()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| text.trim().to_string())
}
