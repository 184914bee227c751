//! A2A (agent-to-agent) protocol client.
//!
//! JSON-RPC over HTTP: `message/send` carries one text part; discovery
//! fetches the server's AgentCard from `/.well-known/agent.json`.

use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use keel_core::{KeelError, KeelResult};

/// Card served by an A2A server describing its agents' skills
#[derive(Debug, Clone, Deserialize)]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSkill {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub struct A2AClient {
    http: reqwest::Client,
    endpoint: String,
    headers: Vec<(String, String)>,
}

impl A2AClient {
    pub fn new(endpoint: impl Into<String>, headers: Vec<(String, String)>) -> KeelResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| KeelError::runtime(format!("failed to build a2a client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            headers,
        })
    }

    /// Send one user message; returns the text of the peer's reply.
    pub async fn message_send(&self, text: &str) -> KeelResult<String> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": "message/send",
            "params": {
                "message": {
                    "messageId": uuid::Uuid::new_v4().to_string(),
                    "role": "user",
                    "parts": [{"kind": "text", "text": text}],
                }
            }
        });

        let mut request = self.http.post(&self.endpoint).json(&payload);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| KeelError::retryable(format!("a2a message/send failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(KeelError::runtime(format!(
                "a2a server returned {}",
                response.status()
            )));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| KeelError::runtime(format!("malformed a2a response: {}", e)))?;
        if let Some(error) = envelope.get("error") {
            return Err(KeelError::runtime(format!(
                "a2a message/send failed: {}",
                error["message"].as_str().unwrap_or("unknown error")
            )));
        }

        Ok(extract_text(envelope.get("result").unwrap_or(&Value::Null)))
    }

    /// GET `<addr>/.well-known/agent.json`
    pub async fn fetch_agent_card(&self) -> KeelResult<AgentCard> {
        let url = format!(
            "{}/.well-known/agent.json",
            self.endpoint.trim_end_matches('/')
        );
        let mut request = self.http.get(&url);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| KeelError::retryable(format!("agent card fetch failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(KeelError::runtime(format!(
                "agent card fetch returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| KeelError::runtime(format!("malformed agent card: {}", e)))
    }
}

/// Pull text out of a message/send result: either a message with parts or
/// a bare string; anything else is JSON-serialized.
fn extract_text(result: &Value) -> String {
    let parts = result
        .get("parts")
        .or_else(|| result.pointer("/message/parts"))
        .and_then(Value::as_array);
    if let Some(parts) = parts {
        return parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
    }
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_message_send_extracts_text_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "message/send"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": "1",
                "result": {"parts": [{"kind": "text", "text": "pong"}]}
            })))
            .mount(&server)
            .await;

        let client = A2AClient::new(server.uri(), vec![]).unwrap();
        assert_eq!(client.message_send("ping").await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn test_fetch_agent_card() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/agent.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "math-server",
                "description": "does math",
                "skills": [
                    {"id": "add", "name": "adder", "description": "adds numbers"},
                    {"name": "divider"}
                ]
            })))
            .mount(&server)
            .await;

        let client = A2AClient::new(server.uri(), vec![]).unwrap();
        let card = client.fetch_agent_card().await.unwrap();
        assert_eq!(card.name, "math-server");
        assert_eq!(card.skills.len(), 2);
        assert_eq!(card.skills[1].name, "divider");
    }

    #[tokio::test]
    async fn test_rpc_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": "1",
                "error": {"code": -32000, "message": "agent busy"}
            })))
            .mount(&server)
            .await;

        let client = A2AClient::new(server.uri(), vec![]).unwrap();
        let err = client.message_send("hi").await.unwrap_err();
        assert!(err.to_string().contains("agent busy"));
    }
}
