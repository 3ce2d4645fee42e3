//! Agent loop behaviour with a scripted model

use analyst_agent::tools::{ClickHouseQueryTool, ToolError, ToolRegistry, ToolTrait};
use analyst_agent::{AgentError, AgentLoop, RunOutcome, ToolResult};
use analyst_bus::{AgentEvent, EventBus, EventDispatcher, TerminalObserver, TokenTag, UpdateKey};
use analyst_provider::{
    ChatParams, ChatResponse, Message, Provider, ProviderError, Role, ToolCall,
};
use analyst_query::{BackendError, QueryBackend, QueryResult};
use async_trait::async_trait;
use mockall::mock;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

mock! {
    pub Provider {}

    #[async_trait]
    impl Provider for Provider {
        async fn chat(&self, params: ChatParams) -> Result<ChatResponse, ProviderError>;
        fn default_model(&self) -> String;
        fn is_configured(&self) -> bool;
    }
}

mock! {
    pub Backend {}

    #[async_trait]
    impl QueryBackend for Backend {
        async fn ping(&self) -> Result<(), BackendError>;
        async fn query(&self, sql: &str) -> Result<QueryResult, BackendError>;
    }
}

/// Echoes its `code` argument back, like a sandbox that only prints
struct EchoCodeTool;

#[async_trait]
impl ToolTrait for EchoCodeTool {
    fn name(&self) -> &str {
        "python"
    }

    fn description(&self) -> &str {
        "Echo code"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, args: Value) -> ToolResult {
        Ok(format!("ran: {}", args["code"].as_str().unwrap_or_default()))
    }

    fn code_argument(&self, args: &Value) -> Option<String> {
        args["code"].as_str().map(str::to_string)
    }
}

/// A remote tool whose server went away
struct UnreachableTool;

#[async_trait]
impl ToolTrait for UnreachableTool {
    fn name(&self) -> &str {
        "execute_clickhouse_query"
    }

    fn description(&self) -> &str {
        "Unreachable"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        Err(ToolError::Connection("connection refused".to_string()))
    }
}

/// Never finishes, so only cancellation can end the call
struct StuckTool;

#[async_trait]
impl ToolTrait for StuckTool {
    fn name(&self) -> &str {
        "python"
    }

    fn description(&self) -> &str {
        "Hangs"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        std::future::pending::<()>().await;
        Ok(String::new())
    }
}

fn provider() -> MockProvider {
    let mut provider = MockProvider::new();
    provider
        .expect_default_model()
        .returning(|| "granite3.1-dense:8b".to_string());
    provider
}

fn tool_call(name: &str, arguments: Value) -> ChatResponse {
    ChatResponse::with_tool_calls(None, vec![ToolCall::new("call_1", name, arguments)])
}

fn registry_with<T: ToolTrait + 'static>(tool: T) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(tool).unwrap();
    registry
}

async fn drain(mut rx: tokio::sync::mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn responses(events: &[AgentEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Update {
                key: UpdateKey::Response,
                value,
            } => Some(value.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_answer_on_first_iteration() {
    let mut provider = provider();
    provider
        .expect_chat()
        .times(1)
        .withf(|params| {
            params.model == "granite3.1-dense:8b"
                && params.messages.len() == 2
                && params.messages[0].role == Role::System
                && params.messages[1].text() == "What tables exist?"
                && params.tools.len() == 1
        })
        .returning(|_| Ok(ChatResponse::text("Final Answer: events and users.")));

    let (bus, rx) = EventBus::channel();
    let agent = AgentLoop::new(provider, registry_with(EchoCodeTool), bus);
    let run = agent.run("What tables exist?").await.unwrap();
    drop(agent);

    assert_eq!(
        run.outcome,
        RunOutcome::Answered {
            answer: "events and users.".to_string(),
            iterations: 1
        }
    );
    assert_eq!(run.conversation.seed_prompt(), "What tables exist?");

    let events = drain(rx).await;
    assert_eq!(responses(&events), vec!["events and users."]);
}

#[tokio::test]
async fn test_always_calling_tools_hits_iteration_bound() {
    let mut provider = provider();
    provider
        .expect_chat()
        .times(3)
        .returning(|_| Ok(tool_call("python", json!({"code": "print(1)"}))));

    let (bus, rx) = EventBus::channel();
    let agent = AgentLoop::new(provider, registry_with(EchoCodeTool), bus).with_max_iterations(3);
    let run = agent.run("loop forever").await.unwrap();
    drop(agent);

    assert!(matches!(
        run.outcome,
        RunOutcome::Incomplete { iterations: 3, .. }
    ));
    assert_eq!(run.conversation.observations().count(), 3);

    let events = drain(rx).await;
    assert!(responses(&events).is_empty());
    assert!(events.contains(&AgentEvent::update(
        UpdateKey::Notice,
        "no final answer reached"
    )));
}

#[tokio::test]
async fn test_default_bound_is_five_model_calls() {
    let mut provider = provider();
    provider
        .expect_chat()
        .times(5)
        .returning(|_| Ok(tool_call("python", json!({"code": "1"}))));

    let (bus, _rx) = EventBus::channel();
    let agent = AgentLoop::new(provider, registry_with(EchoCodeTool), bus);
    let run = agent.run("question").await.unwrap();
    assert_eq!(run.outcome.iterations(), 5);
}

#[tokio::test]
async fn test_code_is_announced_before_execution() {
    let mut provider = provider();
    let mut calls = 0;
    provider.expect_chat().times(2).returning(move |_| {
        calls += 1;
        if calls == 1 {
            Ok(ChatResponse::with_tool_calls(
                Some("Let me compute it.".to_string()),
                vec![ToolCall::new("c1", "python", json!({"code": "print(6 * 7)"}))],
            ))
        } else {
            Ok(ChatResponse::text("42"))
        }
    });

    let (bus, rx) = EventBus::channel();
    let agent = AgentLoop::new(provider, registry_with(EchoCodeTool), bus);
    agent.run("six times seven?").await.unwrap();
    drop(agent);

    let events = drain(rx).await;
    assert_eq!(
        events,
        vec![
            AgentEvent::update(UpdateKey::Thought, "Let me compute it."),
            AgentEvent::Token {
                text: "print(6 * 7)".to_string(),
                tags: vec![TokenTag::ToolCode]
            },
            AgentEvent::tool_call(1, "python", json!({"code": "print(6 * 7)"})),
            AgentEvent::update(UpdateKey::Response, "42"),
        ]
    );
}

#[tokio::test]
async fn test_tool_connectivity_error_becomes_observation() {
    let mut provider = provider();
    let mut calls = 0;
    provider.expect_chat().times(2).returning(move |params| {
        calls += 1;
        if calls == 1 {
            return Ok(tool_call(
                "execute_clickhouse_query",
                json!({"query": "SELECT 1"}),
            ));
        }
        let last = params.messages.last().cloned().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert!(last.text().contains("connection refused"));
        Ok(ChatResponse::text("The database is unreachable."))
    });

    let (bus, _rx) = EventBus::channel();
    let agent = AgentLoop::new(provider, registry_with(UnreachableTool), bus);
    let run = agent.run("count rows").await.unwrap();

    assert_eq!(run.outcome.answer(), Some("The database is unreachable."));
    let observations: Vec<&Message> = run.conversation.observations().collect();
    assert_eq!(observations.len(), 1);
    assert_eq!(
        observations[0].text(),
        "Error: tool server unavailable: connection refused"
    );
}

#[tokio::test]
async fn test_unknown_tool_is_observation_not_crash() {
    let mut provider = provider();
    let mut calls = 0;
    provider.expect_chat().times(2).returning(move |_| {
        calls += 1;
        if calls == 1 {
            Ok(tool_call("rm_rf", json!({})))
        } else {
            Ok(ChatResponse::text("done"))
        }
    });

    let (bus, _rx) = EventBus::channel();
    let agent = AgentLoop::new(provider, registry_with(EchoCodeTool), bus);
    let run = agent.run("cleanup").await.unwrap();

    let observation = run.conversation.observations().next().unwrap();
    assert_eq!(observation.text(), "Error: tool 'rm_rf' not found");
}

#[tokio::test]
async fn test_model_error_is_fatal_and_reported() {
    let mut provider = provider();
    provider
        .expect_chat()
        .times(1)
        .returning(|_| Err(ProviderError::Api("model 'x' not found".to_string())));

    let (bus, rx) = EventBus::channel();
    let agent = AgentLoop::new(provider, registry_with(EchoCodeTool), bus);
    let err = agent.run("question").await.unwrap_err();
    drop(agent);

    assert!(matches!(err, AgentError::Provider(_)));
    let events = drain(rx).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        AgentEvent::Error { message } => assert!(message.contains("model 'x' not found")),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_conversation_capacity_is_fatal() {
    let mut provider = provider();
    provider
        .expect_chat()
        .times(1)
        .returning(|_| Ok(tool_call("python", json!({"code": "1"}))));

    let (bus, _rx) = EventBus::channel();
    let agent = AgentLoop::new(provider, registry_with(EchoCodeTool), bus).with_max_messages(2);
    let err = agent.run("question").await.unwrap_err();
    assert!(matches!(err, AgentError::ConversationFull(2)));
}

#[tokio::test]
async fn test_cancellation_interrupts_tool_call() {
    let mut provider = provider();
    provider
        .expect_chat()
        .times(1)
        .returning(|_| Ok(tool_call("python", json!({"code": "while True: pass"}))));

    let (bus, _rx) = EventBus::channel();
    let agent = AgentLoop::new(provider, registry_with(StuckTool), bus);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = agent.run_with_cancel("question", cancel).await.unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
}

#[tokio::test]
async fn test_end_to_end_events_yesterday() {
    let mut backend = MockBackend::new();
    backend.expect_ping().returning(|| Ok(()));
    backend
        .expect_query()
        .withf(|sql| sql.trim_start().to_uppercase().starts_with("SELECT"))
        .times(1)
        .returning(|_| {
            Ok(QueryResult {
                column_names: vec!["count".to_string()],
                rows: vec![vec![json!(42)]],
            })
        });

    let mut provider = provider();
    let mut calls = 0;
    provider.expect_chat().times(2).returning(move |params| {
        calls += 1;
        if calls == 1 {
            return Ok(tool_call(
                "execute_clickhouse_query",
                json!({"query": "SELECT count() AS count FROM events WHERE toDate(timestamp) = yesterday()"}),
            ));
        }
        let observation = params.messages.last().map(|m| m.text().to_string());
        let rows: Value = serde_json::from_str(&observation.unwrap_or_default()).unwrap();
        assert_eq!(rows, json!([{"count": 42}]));
        Ok(ChatResponse::text(
            "Final Answer: 42 events occurred yesterday.",
        ))
    });

    let (bus, rx) = EventBus::channel();
    let dispatcher = EventDispatcher::new(rx, TerminalObserver::new(Vec::new(), Vec::new()));
    let rendering = tokio::spawn(dispatcher.run());

    let agent = AgentLoop::new(
        provider,
        registry_with(ClickHouseQueryTool::new(backend)),
        bus,
    );
    let run = agent
        .run("How many events occurred yesterday?")
        .await
        .unwrap();
    drop(agent);

    assert_eq!(run.outcome.answer(), Some("42 events occurred yesterday."));

    let (out, err) = rendering.await.unwrap().into_inner();
    let out = String::from_utf8(out).unwrap();
    let err = String::from_utf8(err).unwrap();

    assert!(out.contains(
        "--- Agent Final Response ---\n42 events occurred yesterday.\n--------------------------"
    ));
    assert!(err.is_empty());
}
