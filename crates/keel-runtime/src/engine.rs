//! Execution-engine client.
//!
//! Agents whose executionEngine names anything other than `a2a` are run by
//! an external service: the agent config, current user message, prior
//! history, and tool definitions are POSTed to the engine's address; the
//! response carries the produced messages in {role, content} wire form plus
//! optional token usage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use keel_core::{
    KeelError, KeelResult, Message, TokenUsage, ToolDefinition, WireMessage,
};

#[derive(Serialize)]
struct EngineRequest<'a> {
    agent: &'a Value,
    #[serde(rename = "userMessage")]
    user_message: WireMessage,
    messages: Vec<WireMessage>,
    tools: &'a [ToolDefinition],
}

#[derive(Deserialize)]
struct EngineResponse {
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default, rename = "tokenUsage")]
    token_usage: Option<TokenUsage>,
}

pub struct EngineClient {
    http: reqwest::Client,
    address: String,
    headers: Vec<(String, String)>,
}

impl EngineClient {
    pub fn new(address: impl Into<String>, headers: Vec<(String, String)>) -> KeelResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| KeelError::runtime(format!("failed to build engine client: {}", e)))?;
        Ok(Self {
            http,
            address: address.into(),
            headers,
        })
    }

    /// Run one agent turn remotely; returns produced messages and usage.
    pub async fn execute(
        &self,
        agent_config: &Value,
        user_message: &Message,
        history: &[Message],
        tools: &[ToolDefinition],
    ) -> KeelResult<(Vec<Message>, TokenUsage)> {
        let request = EngineRequest {
            agent: agent_config,
            user_message: WireMessage::from(user_message),
            messages: history.iter().map(WireMessage::from).collect(),
            tools,
        };

        let mut builder = self.http.post(&self.address).json(&request);
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| KeelError::retryable(format!("engine request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(KeelError::runtime(format!(
                "execution engine returned {}",
                response.status()
            )));
        }

        let body: EngineResponse = response
            .json()
            .await
            .map_err(|e| KeelError::runtime(format!("malformed engine response: {}", e)))?;

        let messages = body.messages.into_iter().map(Message::from).collect();
        Ok((messages, body.token_usage.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_engine_roundtrip_converts_wire_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(
                json!({"userMessage": {"role": "user", "content": "go"}}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [
                    {"role": "assistant", "content": "done"},
                    {"role": "critic", "content": "unknown role"}
                ],
                "tokenUsage": {"promptTokens": 4, "completionTokens": 2, "totalTokens": 6}
            })))
            .mount(&server)
            .await;

        let client = EngineClient::new(server.uri(), vec![]).unwrap();
        let (messages, usage) = client
            .execute(&json!({"name": "a"}), &Message::user("go"), &[], &[])
            .await
            .unwrap();

        assert_eq!(messages[0].role(), "assistant");
        // Unknown wire roles map to user for forward compatibility.
        assert_eq!(messages[1].role(), "user");
        assert_eq!(usage.total_tokens, 6);
    }
}
