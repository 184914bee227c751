//! MCP client - JSON-RPC 2.0 over HTTP, with an SSE response mode for
//! servers that stream their replies.

use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use keel_core::{KeelError, KeelResult, McpTransport};

const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "keel";

/// Tool advertised by an MCP server
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

pub struct McpClient {
    http: reqwest::Client,
    endpoint: String,
    headers: Vec<(String, String)>,
    transport: McpTransport,
    next_id: AtomicI64,
}

impl McpClient {
    pub fn new(
        endpoint: impl Into<String>,
        headers: Vec<(String, String)>,
        transport: McpTransport,
    ) -> KeelResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| KeelError::tool(format!("failed to build mcp http client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            headers,
            transport,
            next_id: AtomicI64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `initialize` handshake
    pub async fn initialize(&self) -> KeelResult<()> {
        self.request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": CLIENT_NAME, "version": keel_core::VERSION},
            }),
        )
        .await?;
        Ok(())
    }

    /// `tools/list`
    pub async fn list_tools(&self) -> KeelResult<Vec<McpToolInfo>> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(tools)?)
    }

    /// `tools/call`; text parts are concatenated, anything else is
    /// JSON-serialized in place.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> KeelResult<String> {
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;

        if result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err(KeelError::tool(format!(
                "mcp tool {} reported an error: {}",
                name,
                flatten_content(&result)
            )));
        }

        Ok(flatten_content(&result))
    }

    async fn request(&self, method: &str, params: Value) -> KeelResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut request = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&payload);
        if self.transport == McpTransport::Sse {
            request = request.header("Accept", "text/event-stream");
        }
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| KeelError::retryable(format!("mcp request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeelError::tool(format!(
                "mcp server returned {} for {}",
                status, method
            )));
        }

        let envelope = match self.transport {
            McpTransport::Http => response
                .json::<Value>()
                .await
                .map_err(|e| KeelError::tool(format!("malformed mcp response: {}", e)))?,
            McpTransport::Sse => read_sse_response(response, id).await?,
        };

        if let Some(error) = envelope.get("error") {
            return Err(KeelError::tool(format!(
                "mcp {} failed: {}",
                method,
                error["message"].as_str().unwrap_or("unknown error")
            )));
        }
        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Pull the first JSON-RPC envelope with a matching id out of an SSE body.
async fn read_sse_response(response: reqwest::Response, id: i64) -> KeelResult<Value> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| KeelError::retryable(format!("mcp sse stream failed: {}", e)))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        for line in buffer.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            if let Ok(envelope) = serde_json::from_str::<Value>(data.trim()) {
                if envelope.get("id").and_then(Value::as_i64) == Some(id) {
                    return Ok(envelope);
                }
            }
        }
    }

    Err(KeelError::tool("mcp sse stream ended without a response"))
}

fn flatten_content(result: &Value) -> String {
    let Some(parts) = result.get("content").and_then(Value::as_array) else {
        return String::new();
    };
    parts
        .iter()
        .map(|part| {
            if part.get("type").and_then(Value::as_str) == Some("text") {
                part.get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("")
}
