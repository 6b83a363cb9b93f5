use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use datapilot_core::config::LlmConfig;
use datapilot_core::{Message, Role, ToolCall};

/// A tool as advertised to the language model.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDeclaration>,
}

/// Either free text (final answer) or one or more tool calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), tool_calls: Vec::new() }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { content: String::new(), tool_calls }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Transport(String),
    #[error("model request timed out after {0}s")]
    Timeout(u64),
    #[error("model endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model response could not be decoded: {0}")]
    MalformedResponse(String),
    #[error("model client misconfigured: {0}")]
    Configuration(String),
}

impl LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::MalformedResponse(_) | Self::Configuration(_) => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError>;
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire
/// format, which covers both OpenAI and Ollama.
pub struct OpenAiCompatibleClient {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| LlmError::Configuration(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    async fn send_once(&self, body: &Value) -> Result<ModelResponse, LlmError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else {
                LlmError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|error| LlmError::MalformedResponse(error.to_string()))?;
        parse_completion(completion)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let body = request_body(&self.model, self.temperature, request);
        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        event_name = "agent.llm.retry",
                        attempt,
                        error = %error,
                        "retrying model request"
                    );
                    tokio::time::sleep(retry_delay(attempt)).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// 250ms doubled per attempt, saturating instead of overflowing.
fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(250).saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
}

fn request_body(model: &str, temperature: f32, request: &ModelRequest) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(json!({ "role": "system", "content": request.system_prompt }));
    messages.extend(request.messages.iter().map(wire_message));

    let mut body = json!({
        "model": model,
        "temperature": temperature,
        "messages": messages,
    });
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
    }
    body
}

fn wire_message(message: &Message) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
        Role::Assistant if message.has_tool_calls() => json!({
            "role": "assistant",
            "content": message.content,
            "tool_calls": message.tool_calls.iter().map(|call| json!({
                "id": call.id,
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": match &call.arguments {
                        Value::String(raw) => raw.clone(),
                        other => other.to_string(),
                    },
                },
            })).collect::<Vec<_>>(),
        }),
        role => json!({ "role": role, "content": message.content }),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn parse_completion(completion: ChatCompletion) -> Result<ModelResponse, LlmError> {
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::MalformedResponse("response has no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(index, call)| {
            let id = call.id.unwrap_or_else(|| format!("call_{index}"));
            ToolCall::new(id, call.function.name, decode_arguments(call.function.arguments))
        })
        .collect();

    Ok(ModelResponse { content: choice.message.content.unwrap_or_default(), tool_calls })
}

/// Arguments arrive as a JSON-encoded string (OpenAI) or an inline object
/// (Ollama). Strings that fail to parse are kept verbatim so the registry
/// can report them back to the model.
fn decode_arguments(raw: Value) -> Value {
    match raw {
        Value::String(text) if text.trim().is_empty() => json!({}),
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        Value::Null => json!({}),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use datapilot_core::{Message, ToolCall};
    use serde_json::{json, Value};

    use std::time::Duration;

    use super::{
        parse_completion, request_body, retry_delay, ChatCompletion, ModelRequest, ToolDeclaration,
    };

    fn completion(raw: Value) -> ChatCompletion {
        serde_json::from_value(raw).expect("completion fixture")
    }

    #[test]
    fn parses_string_encoded_tool_arguments() {
        let response = parse_completion(completion(json!({
            "choices": [{ "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_a",
                    "type": "function",
                    "function": { "name": "execute_sql", "arguments": "{\"query\":\"SELECT 1\"}" }
                }]
            }}]
        })))
        .expect("parse");

        assert_eq!(response.content, "");
        assert_eq!(
            response.tool_calls,
            vec![ToolCall::new("call_a", "execute_sql", json!({ "query": "SELECT 1" }))]
        );
    }

    #[test]
    fn malformed_arguments_pass_through_as_strings() {
        let response = parse_completion(completion(json!({
            "choices": [{ "message": {
                "tool_calls": [{ "function": { "name": "execute_sql", "arguments": "{query: oops" } }]
            }}]
        })))
        .expect("parse");

        assert_eq!(response.tool_calls[0].id, "call_0");
        assert_eq!(response.tool_calls[0].arguments, json!("{query: oops"));
    }

    #[test]
    fn inline_object_arguments_are_accepted() {
        let response = parse_completion(completion(json!({
            "choices": [{ "message": {
                "content": "",
                "tool_calls": [{ "function": { "name": "describe_schema", "arguments": {} } }]
            }}]
        })))
        .expect("parse");

        assert_eq!(response.tool_calls[0].arguments, json!({}));
    }

    #[test]
    fn empty_choices_are_malformed() {
        assert!(parse_completion(completion(json!({ "choices": [] }))).is_err());
    }

    #[test]
    fn request_body_carries_history_and_tools() {
        let call = ToolCall::new("call_1", "execute_sql", json!({ "query": "SELECT 1" }));
        let request = ModelRequest {
            system_prompt: "schema here".to_string(),
            messages: vec![
                Message::user("How many?"),
                Message::assistant("", vec![call.clone()]),
                Message::tool_result(&call, "{\"status\":\"success\"}"),
            ],
            tools: vec![ToolDeclaration {
                name: "execute_sql".to_string(),
                description: "Run SQL".to_string(),
                parameters: json!({ "type": "object" }),
            }],
        };

        let body = request_body("llama3.1", 0.0, &request);

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "How many?");
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["arguments"],
            "{\"query\":\"SELECT 1\"}"
        );
        assert_eq!(body["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["function"]["name"], "execute_sql");
    }

    #[test]
    fn retry_delay_doubles_and_saturates() {
        assert_eq!(retry_delay(1), Duration::from_millis(250));
        assert_eq!(retry_delay(3), Duration::from_millis(1000));
        assert_eq!(retry_delay(u32::MAX), Duration::from_millis(250).saturating_mul(u32::MAX));
    }
}
