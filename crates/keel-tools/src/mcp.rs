//! MCP tool executor - routes a call to a pooled MCP client.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use keel_core::{KeelResult, ToolCall, ToolResult};
use keel_mcp::McpPool;

use crate::registry::ToolExecutor;

pub struct McpExecutor {
    pool: Arc<McpPool>,
    namespace: String,
    server_name: String,
    /// Tool name on the upstream server, which may differ from the
    /// cluster Tool resource name
    upstream_tool: String,
}

impl McpExecutor {
    pub fn new(
        pool: Arc<McpPool>,
        namespace: impl Into<String>,
        server_name: impl Into<String>,
        upstream_tool: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
            server_name: server_name.into(),
            upstream_tool: upstream_tool.into(),
        }
    }
}

#[async_trait]
impl ToolExecutor for McpExecutor {
    async fn execute(&self, call: &ToolCall) -> KeelResult<ToolResult> {
        let client = match self.pool.client(&self.namespace, &self.server_name).await {
            Ok(client) => client,
            Err(e) => return Ok(ToolResult::failed(call, e.to_string())),
        };

        let arguments = Value::Object(call.parsed_arguments());
        match client.call_tool(&self.upstream_tool, arguments).await {
            Ok(content) => Ok(ToolResult::ok(call, content)),
            Err(e) => Ok(ToolResult::failed(call, e.to_string())),
        }
    }
}
