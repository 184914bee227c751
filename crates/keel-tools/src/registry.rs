//! Tool registry - maps tool names to (definition, executor) pairs.
//!
//! One registry per agent instance, assembled at load time in the order the
//! agent's spec lists its tools. Unknown tool calls are surfaced to the
//! model as failed results rather than raised.

use async_trait::async_trait;
use std::sync::Arc;

use keel_core::{KeelResult, Tool, ToolCall, ToolDefinition, ToolResult};

/// Executes one tool call
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, call: &ToolCall) -> KeelResult<ToolResult>;
}

#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub executor: Arc<dyn ToolExecutor>,
}

/// Ordered name → tool map
#[derive(Clone, Default)]
pub struct ToolRegistry {
    entries: Vec<(String, RegisteredTool)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the definition's name; re-registration replaces.
    pub fn register(&mut self, definition: ToolDefinition, executor: Arc<dyn ToolExecutor>) {
        let name = definition.name.clone();
        let entry = RegisteredTool {
            definition,
            executor,
        };
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = entry,
            None => self.entries.push((name, entry)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, entry)| entry)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Definitions in registration order, for the model request
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries
            .iter()
            .map(|(_, entry)| entry.definition.clone())
            .collect()
    }

    /// Dispatch a call to its executor.
    pub async fn execute(&self, call: &ToolCall) -> KeelResult<ToolResult> {
        match self.get(&call.function_name) {
            Some(entry) => entry.executor.execute(call).await,
            None => Ok(ToolResult::failed(
                call,
                format!("unknown tool \"{}\"", call.function_name),
            )),
        }
    }
}

/// Function definition derived from a Tool resource
pub fn definition_for(tool: &Tool) -> ToolDefinition {
    ToolDefinition {
        name: tool.metadata.name.clone(),
        description: tool.description(),
        parameters: tool.input_schema(),
    }
}
