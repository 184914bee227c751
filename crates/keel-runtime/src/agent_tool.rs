//! Agent-as-tool executor.
//!
//! Tools can reference agents that reference tools; the cycle is broken by
//! resolving the target Agent at call time, not at registration.

use async_trait::async_trait;

use keel_core::{KeelResult, Message, ToolCall, ToolResult};
use keel_tools::ToolExecutor;

use crate::agent::AgentRuntime;
use crate::context::ExecContext;

pub struct AgentToolExecutor {
    ctx: ExecContext,
    agent_name: String,
}

impl AgentToolExecutor {
    pub fn new(ctx: ExecContext, agent_name: impl Into<String>) -> Self {
        Self {
            ctx,
            agent_name: agent_name.into(),
        }
    }
}

#[async_trait]
impl ToolExecutor for AgentToolExecutor {
    async fn execute(&self, call: &ToolCall) -> KeelResult<ToolResult> {
        let input = call
            .parsed_arguments()
            .get("input")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| call.arguments.clone());

        let runtime = match AgentRuntime::load(&self.ctx, &self.agent_name).await {
            Ok(runtime) => runtime,
            Err(e) => return Ok(ToolResult::failed(call, e.to_string())),
        };

        match runtime.execute(Message::user(input), &[]).await {
            Ok(outcome) => {
                let content = outcome
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.is_assistant())
                    .map(|m| m.content().to_string())
                    .unwrap_or_default();
                Ok(ToolResult::ok(call, content))
            }
            Err(e) => Ok(ToolResult::failed(call, e.to_string())),
        }
    }
}
