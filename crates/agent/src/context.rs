//! System instructions and conversation state

use analyst_provider::{Message, Role, Tool};
use chrono::{Local, NaiveDate};

use crate::tools::QUERY_TOOL_NAME;
use crate::{AgentError, Result};

/// Builds the fixed instructions for a run
pub struct ContextBuilder {
    today: NaiveDate,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            today: Local::now().date_naive(),
        }
    }

    /// Pin the date shown to the model
    pub fn with_date(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn system_prompt(&self, tools: &[Tool]) -> String {
        let mut tool_lines = Vec::new();
        for tool in tools {
            let line = match tool.name.as_str() {
                QUERY_TOOL_NAME => format!(
                    "- `{}`: runs a SQL query against the ClickHouse database. Use it for \
                     direct data retrieval, filtering and simple aggregations. The output is \
                     a JSON string.",
                    tool.name
                ),
                "python" => "- `python`: a Python interpreter with `pandas` and `numpy`. Use it \
                     for complex calculations, multi-step data transformations, or to combine \
                     data from several queries."
                    .to_string(),
                _ => format!("- `{}`: {}", tool.name, tool.description),
            };
            tool_lines.push(line);
        }

        let has_query = tools.iter().any(|t| t.name == QUERY_TOOL_NAME);
        let has_python = tools.iter().any(|t| t.name == "python");

        let mut prompt = format!(
            "You are an expert data analyst. Today is {}.\n\n\
             You have these tools at your disposal:\n{}\n\n\
             Workflow:\n\
             - First, understand the user's question.\n\
             - Decide whether it is best answered with a direct SQL query or with Python code. \
             Use SQL for direct retrieval and aggregation; use Python for multi-step \
             transformation or when combining multiple queries.\n",
            self.today.format("%Y-%m-%d (%A)"),
            tool_lines.join("\n")
        );

        if has_python {
            let inner = if has_query {
                "- Inside Python code you can call `execute_clickhouse_query(query='''...''')`; \
                 it returns the rows as a JSON string you can load with `json.loads` into a \
                 pandas DataFrame. Only the standard data libraries can be imported.\n"
            } else {
                "- The database is not reachable from Python in this session; work with the \
                 data you are given. Only the standard data libraries can be imported.\n"
            };
            prompt.push_str(inner);
        }

        prompt.push_str(
            "- Perform the necessary analysis, then reply without calling a tool. Start that \
             reply with \"Final Answer:\" followed by the answer.",
        );
        prompt
    }

    /// Seed a conversation for `prompt`
    pub fn start(&self, tools: &[Tool], prompt: &str, capacity: usize) -> Conversation {
        Conversation::new(self.system_prompt(tools), prompt, capacity)
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Append-only message history of one run
///
/// The first message is always the user's prompt. The instructions are kept
/// beside the history and only prepended when the model is called.
#[derive(Debug, Clone)]
pub struct Conversation {
    instructions: String,
    messages: Vec<Message>,
    capacity: usize,
}

impl Conversation {
    pub fn new(instructions: impl Into<String>, prompt: &str, capacity: usize) -> Self {
        Self {
            instructions: instructions.into(),
            messages: vec![Message::user(prompt)],
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, message: Message) -> Result<()> {
        if self.messages.len() >= self.capacity {
            return Err(AgentError::ConversationFull(self.capacity));
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn seed_prompt(&self) -> &str {
        self.messages[0].text()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// What the model sees: instructions followed by the history
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.push(Message::system(self.instructions.clone()));
        messages.extend(self.messages.iter().cloned());
        messages
    }

    /// Observations appended so far, oldest first
    pub fn observations(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::Tool)
    }
}
