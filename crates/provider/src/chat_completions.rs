//! OpenAI-compatible chat-completions client
//!
//! Works against any `/chat/completions` endpoint, including the one a local
//! Ollama server exposes under `/v1`.

use crate::*;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, trace};

/// Chat-completions endpoint client
pub struct ChatCompletionsProvider {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    default_model: String,
}

impl ChatCompletionsProvider {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            default_model: default_model.into(),
        }
    }

    fn build_request(&self, params: &ChatParams) -> Value {
        let model = if params.model.is_empty() {
            self.default_model.clone()
        } else {
            params.model.clone()
        };

        let messages: Vec<Value> = params.messages.iter().map(encode_message).collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "stream": false,
        });

        if !params.tools.is_empty() {
            let tools: Vec<Value> = params
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": &t.name,
                            "description": &t.description,
                            "parameters": &t.parameters
                        }
                    })
                })
                .collect();

            body["tools"] = json!(tools);
            body["tool_choice"] = match &params.tool_choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::Required(name) => {
                    json!({"type": "function", "function": {"name": name}})
                }
                ToolChoice::None => json!("none"),
            };
        }

        body
    }

    fn parse_response(&self, json: Value) -> Result<ChatResponse> {
        let choice = json["choices"]
            .get(0)
            .ok_or(ProviderError::InvalidResponse)?;
        let message = &choice["message"];
        let content = message["content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        let finish_reason = choice["finish_reason"]
            .as_str()
            .unwrap_or("stop")
            .to_string();

        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let function = &call["function"];
                let Some(name) = function["name"].as_str().filter(|n| !n.is_empty()) else {
                    debug!("dropping tool call without a function name");
                    continue;
                };
                let id = call["id"]
                    .as_str()
                    .filter(|id| !id.is_empty())
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));

                tool_calls.push(ToolCall {
                    id,
                    name: name.to_string(),
                    arguments: decode_arguments(&function["arguments"]),
                });
            }
        }

        let usage = match json["usage"].as_object() {
            Some(usage) => Usage {
                prompt_tokens: token_count(usage.get("prompt_tokens")),
                completion_tokens: token_count(usage.get("completion_tokens")),
                total_tokens: token_count(usage.get("total_tokens")),
            },
            None => Usage::default(),
        };

        Ok(ChatResponse {
            content,
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

fn encode_message(message: &Message) -> Value {
    let mut obj = json!({ "role": message.role.as_str() });
    if let Some(content) = &message.content {
        obj["content"] = json!(content);
    }
    if !message.tool_calls.is_empty() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": &tc.id,
                    "type": "function",
                    "function": {
                        "name": &tc.name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        obj["tool_calls"] = json!(calls);
    }
    if let Some(tool_call_id) = &message.tool_call_id {
        obj["tool_call_id"] = json!(tool_call_id);
    }
    if let Some(name) = &message.name {
        obj["name"] = json!(name);
    }
    obj
}

/// Arguments arrive either as a JSON-encoded string or as an object
fn decode_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        Value::Null => json!({}),
        other => other.clone(),
    }
}

fn token_count(value: Option<&Value>) -> u32 {
    value.and_then(Value::as_u64).unwrap_or(0) as u32
}

#[async_trait::async_trait]
impl Provider for ChatCompletionsProvider {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured);
        }

        let url = format!("{}/chat/completions", self.api_base);
        trace!("◆ POST {}", url);
        let body = self.build_request(&params);

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited);
        }

        let text = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(|s| s.to_string()))
                .unwrap_or_else(|| format!("HTTP {}: {}", status.as_u16(), text.trim()));
            return Err(ProviderError::Api(message));
        }

        let json: Value = serde_json::from_str(&text)?;
        let response = self.parse_response(json)?;
        debug!(
            "◆ MODEL RESPONSE: {} TOOL CALLS, finish_reason={}",
            response.tool_calls.len(),
            response.finish_reason
        );
        Ok(response)
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.api_base.is_empty()
    }
}
