//! Mock Provider Tests
//!
//! The agent loop only sees `dyn Provider`, so these check that the trait
//! mocks cleanly and that the message shapes the loop sends survive the trip.

use async_trait::async_trait;
use mockall::mock;
use analyst_provider::{
    ChatParams, ChatResponse, Message, Provider, ProviderError, Role, Tool, ToolCall, ToolChoice,
};
use serde_json::json;

mock! {
    pub Provider {}

    #[async_trait]
    impl Provider for Provider {
        async fn chat(&self, params: ChatParams) -> Result<ChatResponse, ProviderError>;
        fn default_model(&self) -> String;
        fn is_configured(&self) -> bool;
    }
}

#[tokio::test]
async fn test_mock_provider_final_answer() {
    let mut mock = MockProvider::new();

    mock.expect_chat()
        .times(1)
        .returning(|_| Ok(ChatResponse::text("Final Answer: 42 events occurred yesterday.")));

    let response = mock.chat(ChatParams::default()).await.unwrap();
    assert!(!response.has_tool_calls());
    assert!(response.content.unwrap().contains("42 events"));
}

#[tokio::test]
async fn test_mock_provider_requests_query_tool() {
    let mut mock = MockProvider::new();

    mock.expect_chat()
        .times(1)
        .withf(|params| {
            params.messages.len() == 2
                && params.messages[0].role == Role::System
                && params.tools.iter().any(|t| t.name == "execute_clickhouse_query")
        })
        .returning(|_| {
            Ok(ChatResponse::with_tool_calls(
                None,
                vec![ToolCall::new(
                    "call_1",
                    "execute_clickhouse_query",
                    json!({"query": "SELECT count() FROM events"}),
                )],
            ))
        });

    let params = ChatParams {
        model: "granite3.1-dense:8b".to_string(),
        messages: vec![
            Message::system("You are a data analyst"),
            Message::user("How many events occurred yesterday?"),
        ],
        tools: vec![Tool::new(
            "execute_clickhouse_query",
            "Run a read-only SQL query",
            json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        )],
        ..ChatParams::default()
    };

    let response = mock.chat(params).await.unwrap();
    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(
        response.tool_calls[0].arguments["query"],
        "SELECT count() FROM events"
    );
}

#[tokio::test]
async fn test_mock_provider_sees_tool_observation() {
    let mut mock = MockProvider::new();

    mock.expect_chat()
        .times(1)
        .withf(|params| {
            params
                .messages
                .last()
                .map(|m| m.role == Role::Tool && m.text() == "[]")
                .unwrap_or(false)
        })
        .returning(|_| Ok(ChatResponse::text("No rows matched.")));

    let params = ChatParams {
        messages: vec![
            Message::user("Any errors today?"),
            Message::assistant_tool_calls(
                None,
                vec![ToolCall::new("c1", "execute_clickhouse_query", json!({}))],
            ),
            Message::tool("c1", "execute_clickhouse_query", "[]"),
        ],
        ..ChatParams::default()
    };

    let response = mock.chat(params).await.unwrap();
    assert_eq!(response.content.as_deref(), Some("No rows matched."));
}

#[tokio::test]
async fn test_mock_provider_errors() {
    let mut mock = MockProvider::new();
    let mut calls = 0;

    mock.expect_chat().times(3).returning(move |_| {
        calls += 1;
        match calls {
            1 => Err(ProviderError::RateLimited),
            2 => Err(ProviderError::Api("model not found".to_string())),
            _ => Err(ProviderError::InvalidResponse),
        }
    });

    assert!(matches!(
        mock.chat(ChatParams::default()).await,
        Err(ProviderError::RateLimited)
    ));
    match mock.chat(ChatParams::default()).await {
        Err(ProviderError::Api(msg)) => assert_eq!(msg, "model not found"),
        other => panic!("expected Api error, got {:?}", other.map(|r| r.content)),
    }
    assert!(matches!(
        mock.chat(ChatParams::default()).await,
        Err(ProviderError::InvalidResponse)
    ));
}

#[test]
fn test_mock_provider_metadata() {
    let mut mock = MockProvider::new();

    mock.expect_default_model()
        .returning(|| "granite3.1-dense:8b".to_string());
    mock.expect_is_configured().returning(|| false);

    assert_eq!(mock.default_model(), "granite3.1-dense:8b");
    assert!(!mock.is_configured());
}

struct ProviderConsumer {
    provider: Box<dyn Provider>,
}

impl ProviderConsumer {
    async fn ask(&self, question: &str) -> Result<String, ProviderError> {
        let params = ChatParams {
            model: self.provider.default_model(),
            messages: vec![Message::user(question)],
            tool_choice: ToolChoice::None,
            ..ChatParams::default()
        };

        let response = self.provider.chat(params).await?;
        Ok(response.content.unwrap_or_default())
    }
}

#[tokio::test]
async fn test_mock_provider_behind_trait_object() {
    let mut mock = MockProvider::new();

    mock.expect_default_model().returning(|| "test".to_string());
    mock.expect_chat()
        .withf(|params| params.model == "test" && params.tool_choice == ToolChoice::None)
        .times(1)
        .returning(|_| Ok(ChatResponse::text("Processed!")));

    let consumer = ProviderConsumer {
        provider: Box::new(mock),
    };

    assert_eq!(consumer.ask("Hello").await.unwrap(), "Processed!");
}
