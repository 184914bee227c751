// Keel Core - Tool call surface
//
// The shapes shared between the model providers (which emit tool calls and
// accept tool definitions) and the tool executors (which produce results).

use serde::{Deserialize, Serialize};

use crate::message::ToolCallRequest;

/// Function definition advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: serde_json::Value,
}

/// One tool invocation to execute
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    /// JSON-encoded argument object as produced by the model
    pub arguments: String,
}

impl From<&ToolCallRequest> for ToolCall {
    fn from(request: &ToolCallRequest) -> Self {
        Self {
            id: request.id.clone(),
            function_name: request.function.name.clone(),
            arguments: request.function.arguments.clone(),
        }
    }
}

impl ToolCall {
    /// Arguments parsed as a JSON object; invalid JSON yields an empty map
    pub fn parsed_arguments(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str::<serde_json::Value>(&self.arguments)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default()
    }
}

/// Outcome of one tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub id: String,
    pub name: String,
    pub content: String,
    /// Failures are surfaced to the model, not raised
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.function_name.clone(),
            content: content.into(),
            error: None,
        }
    }

    pub fn failed(call: &ToolCall, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            id: call.id.clone(),
            name: call.function_name.clone(),
            content: format!("error: {}", error),
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCallRequest;

    #[test]
    fn test_call_from_request() {
        let request = ToolCallRequest::new("c1", "weather", r#"{"city":"Paris"}"#);
        let call = ToolCall::from(&request);
        assert_eq!(call.function_name, "weather");
        assert_eq!(call.parsed_arguments()["city"], "Paris");
    }

    #[test]
    fn test_invalid_arguments_parse_empty() {
        let call = ToolCall {
            id: "c".to_string(),
            function_name: "f".to_string(),
            arguments: "not json".to_string(),
        };
        assert!(call.parsed_arguments().is_empty());
    }

    #[test]
    fn test_failed_result_keeps_error_visible() {
        let call = ToolCall {
            id: "c".to_string(),
            function_name: "f".to_string(),
            arguments: "{}".to_string(),
        };
        let result = ToolResult::failed(&call, "upstream 503");
        assert_eq!(result.error.as_deref(), Some("upstream 503"));
        assert!(result.content.contains("upstream 503"));
    }
}
