//! Built-in tools: `noop` and `terminate`.
//!
//! `terminate` returns the provided response; the agent loop watches for
//! calls to it by name and stops the enclosing execution (and team).

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use keel_core::{KeelResult, ToolCall, ToolDefinition, ToolResult};

use crate::registry::{ToolExecutor, ToolRegistry};

pub const NOOP_TOOL: &str = "noop";
pub const TERMINATE_TOOL: &str = "terminate";

/// Echoes its arguments back
pub struct NoopTool;

#[async_trait]
impl ToolExecutor for NoopTool {
    async fn execute(&self, call: &ToolCall) -> KeelResult<ToolResult> {
        Ok(ToolResult::ok(call, call.arguments.clone()))
    }
}

/// Returns the `response` argument and signals termination
pub struct TerminateTool;

#[async_trait]
impl ToolExecutor for TerminateTool {
    async fn execute(&self, call: &ToolCall) -> KeelResult<ToolResult> {
        let response = call
            .parsed_arguments()
            .get("response")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Ok(ToolResult::ok(call, response))
    }
}

/// Register a built-in by name; unknown names are ignored with a warning.
pub fn register_builtin(registry: &mut ToolRegistry, name: &str) {
    match name {
        NOOP_TOOL => registry.register(
            ToolDefinition {
                name: NOOP_TOOL.to_string(),
                description: "Does nothing and echoes its arguments".to_string(),
                parameters: json!({"type": "object"}),
            },
            Arc::new(NoopTool),
        ),
        TERMINATE_TOOL => registry.register(
            ToolDefinition {
                name: TERMINATE_TOOL.to_string(),
                description: "Finish the conversation and return the final response".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "response": {
                            "type": "string",
                            "description": "Final response to return"
                        }
                    },
                    "required": ["response"]
                }),
            },
            Arc::new(TerminateTool),
        ),
        other => tracing::warn!("unknown builtin tool \"{}\" ignored", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_echoes_arguments() {
        let tool = NoopTool;
        let call = ToolCall {
            id: "c".to_string(),
            function_name: NOOP_TOOL.to_string(),
            arguments: r#"{"x":1}"#.to_string(),
        };
        let result = tool.execute(&call).await.unwrap();
        assert_eq!(result.content, r#"{"x":1}"#);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_terminate_returns_response() {
        let tool = TerminateTool;
        let call = ToolCall {
            id: "c".to_string(),
            function_name: TERMINATE_TOOL.to_string(),
            arguments: r#"{"response":"stop here"}"#.to_string(),
        };
        let result = tool.execute(&call).await.unwrap();
        assert_eq!(result.content, "stop here");
    }

    #[test]
    fn test_register_builtins() {
        let mut registry = ToolRegistry::new();
        register_builtin(&mut registry, NOOP_TOOL);
        register_builtin(&mut registry, TERMINATE_TOOL);
        register_builtin(&mut registry, "shell");

        assert_eq!(registry.len(), 2);
        assert!(registry.get(TERMINATE_TOOL).is_some());
    }
}
