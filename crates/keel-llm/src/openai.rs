//! OpenAI-compatible chat-completions provider.
//!
//! Also hosts the request/response wire handling shared with the Azure
//! provider, which speaks the same payload shape behind a different URL and
//! auth header.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use keel_core::{KeelError, KeelResult, Message, TokenUsage, ToolCallRequest};

use crate::{ChatCompletion, ChatModel, ChatRequest};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for any OpenAI-compatible endpoint
pub struct OpenAiModel {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    properties: HashMap<String, Value>,
}

impl OpenAiModel {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        properties: HashMap<String, Value>,
    ) -> KeelResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| KeelError::provider(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            properties,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiModel {
    async fn chat_completion(&self, request: ChatRequest) -> KeelResult<ChatCompletion> {
        let body = build_request_body(&self.model, &request, &self.properties)?;
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| KeelError::provider(format!("chat completion request failed: {}", e)))?;

        decode_response(response).await
    }

    async fn probe(&self) -> KeelResult<()> {
        let response = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| KeelError::retryable(format!("model probe failed: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(KeelError::provider(format!(
                "model probe returned {}",
                response.status()
            )))
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Build the chat-completions payload.
///
/// Defaults: temperature 1.0, n 1; model properties override both and may
/// add provider extras (max_tokens, top_p, ...). An output schema upgrades
/// the request to a strict json_schema response format.
pub(crate) fn build_request_body(
    model: &str,
    request: &ChatRequest,
    properties: &HashMap<String, Value>,
) -> KeelResult<Value> {
    let mut body = Map::new();
    body.insert("model".to_string(), json!(model));
    body.insert("messages".to_string(), serde_json::to_value(&request.messages)?);
    body.insert("temperature".to_string(), json!(1.0));
    body.insert("n".to_string(), json!(1));

    for (key, value) in properties {
        body.insert(key.clone(), value.clone());
    }

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body.insert("tools".to_string(), Value::Array(tools));
    }

    if let Some(schema) = &request.output_schema {
        body.insert(
            "response_format".to_string(),
            json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "response",
                    "schema": schema,
                    "strict": true,
                }
            }),
        );
    }

    Ok(Value::Object(body))
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireAssistantMessage,
}

#[derive(Debug, Deserialize)]
struct WireAssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallRequest>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Decode an OpenAI-shaped HTTP response into a completion.
pub(crate) async fn decode_response(response: reqwest::Response) -> KeelResult<ChatCompletion> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| KeelError::provider(format!("failed to read response body: {}", e)))?;

    if !status.is_success() {
        return Err(KeelError::provider(format!(
            "provider returned {}: {}",
            status, text
        )));
    }

    let wire: WireResponse = serde_json::from_str(&text)
        .map_err(|e| KeelError::provider(format!("malformed completion response: {}", e)))?;
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| KeelError::provider("completion response has no choices"))?;

    let usage = wire
        .usage
        .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();

    Ok(ChatCompletion {
        message: Message::Assistant {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice.message.tool_calls,
        },
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::ToolDefinition;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request_with_tools() -> ChatRequest {
        ChatRequest {
            messages: vec![Message::system("be brief"), Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "noop".to_string(),
                description: "does nothing".to_string(),
                parameters: json!({"type": "object"}),
            }],
            output_schema: None,
        }
    }

    #[test]
    fn test_request_defaults() {
        let body = build_request_body("gpt-4o", &ChatRequest::default(), &HashMap::new()).unwrap();
        assert_eq!(body["temperature"], 1.0);
        assert_eq!(body["n"], 1);
        assert!(body.get("tools").is_none());
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_properties_override_defaults() {
        let mut properties = HashMap::new();
        properties.insert("temperature".to_string(), json!(0.2));
        properties.insert("max_tokens".to_string(), json!(512));

        let body = build_request_body("gpt-4o", &ChatRequest::default(), &properties).unwrap();
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["max_tokens"], 512);
    }

    #[test]
    fn test_output_schema_upgrades_response_format() {
        let request = ChatRequest {
            output_schema: Some(json!({"type": "object"})),
            ..Default::default()
        };
        let body = build_request_body("gpt-4o", &request, &HashMap::new()).unwrap();
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
    }

    #[tokio::test]
    async fn test_chat_completion_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-4o"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "ok"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
            })))
            .mount(&server)
            .await;

        let model =
            OpenAiModel::new(server.uri(), "test-key", "gpt-4o", HashMap::new()).unwrap();
        let completion = model.chat_completion(request_with_tools()).await.unwrap();

        assert_eq!(completion.message.content(), "ok");
        assert_eq!(completion.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_tool_calls_decode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "weather", "arguments": "{\"city\":\"Paris\"}"}
                    }]
                }}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 7}
            })))
            .mount(&server)
            .await;

        let model =
            OpenAiModel::new(server.uri(), "test-key", "gpt-4o", HashMap::new()).unwrap();
        let completion = model.chat_completion(request_with_tools()).await.unwrap();

        let calls = completion.message.tool_calls().unwrap();
        assert_eq!(calls[0].function.name, "weather");
        assert_eq!(completion.usage.total_tokens, 12);
    }

    #[tokio::test]
    async fn test_provider_error_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let model =
            OpenAiModel::new(server.uri(), "test-key", "gpt-4o", HashMap::new()).unwrap();
        let err = model
            .chat_completion(ChatRequest::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_probe_lists_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let model =
            OpenAiModel::new(server.uri(), "test-key", "gpt-4o", HashMap::new()).unwrap();
        assert!(model.probe().await.is_ok());
    }
}
