//! Registry assembly from an agent's tool list.

use std::sync::Arc;

use keel_core::{
    Agent, AgentToolType, KeelError, KeelResult, Tool, ToolType,
};
use keel_tools::{
    definition_for, register_builtin, FilteredExecutor, HttpExecutor, McpExecutor,
    PartialExecutor, ToolExecutor, ToolRegistry,
};

use crate::agent_tool::AgentToolExecutor;
use crate::context::ExecContext;

/// Build an agent's tool registry in spec order: built-ins by name, custom
/// tools by name or label selector, each narrowed by the optional per-entry
/// function filter.
pub(crate) async fn build_registry(ctx: &ExecContext, agent: &Agent) -> KeelResult<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    for tool_ref in &agent.spec.tools {
        match tool_ref.tool_type {
            AgentToolType::Builtin => {
                let name = tool_ref.name.as_deref().ok_or_else(|| {
                    KeelError::validation("builtin tool entry requires a name")
                })?;
                register_builtin(&mut registry, name);
            }
            AgentToolType::Custom => {
                let mut matched: Vec<Tool> = Vec::new();
                if let Some(name) = &tool_ref.name {
                    matched.push(ctx.cluster.get_required(&ctx.namespace, name).await?);
                } else if let Some(selector) = &tool_ref.label_selector {
                    let all: Vec<Tool> = ctx.cluster.list(&ctx.namespace).await?;
                    matched.extend(
                        all.into_iter()
                            .filter(|t| selector.matches(&t.metadata.labels)),
                    );
                } else {
                    return Err(KeelError::validation(
                        "tool entry requires a name or labelSelector",
                    ));
                }

                for tool in matched {
                    if !tool_ref.functions.is_empty()
                        && !tool_ref.functions.contains(&tool.metadata.name)
                    {
                        continue;
                    }
                    let executor = executor_for_tool(ctx, &tool)?;
                    registry.register(definition_for(&tool), executor);
                }
            }
        }
    }

    Ok(registry)
}

/// Executor for one Tool resource, with partial and filter wrappers applied.
pub(crate) fn executor_for_tool(
    ctx: &ExecContext,
    tool: &Tool,
) -> KeelResult<Arc<dyn ToolExecutor>> {
    tool.validate()?;

    let inner: Arc<dyn ToolExecutor> = match tool.spec.tool_type {
        ToolType::Http => {
            let spec = tool.spec.http.clone().unwrap();
            Arc::new(HttpExecutor::new(
                ctx.cluster.clone(),
                ctx.namespace.clone(),
                spec,
            )?)
        }
        ToolType::Mcp => {
            let spec = tool.spec.mcp.clone().unwrap();
            let server_namespace = spec
                .server_ref
                .namespace
                .unwrap_or_else(|| ctx.namespace.clone());
            Arc::new(McpExecutor::new(
                ctx.mcp_pool.clone(),
                server_namespace,
                spec.server_ref.name,
                spec.tool_name,
            ))
        }
        ToolType::Agent => {
            let spec = tool.spec.agent.clone().unwrap();
            Arc::new(AgentToolExecutor::new(ctx.clone(), spec.agent_ref.name))
        }
        ToolType::Builtin => {
            let mut scratch = ToolRegistry::new();
            register_builtin(&mut scratch, &tool.metadata.name);
            scratch
                .get(&tool.metadata.name)
                .map(|entry| entry.executor.clone())
                .ok_or_else(|| {
                    KeelError::validation(format!(
                        "unknown builtin tool \"{}\"",
                        tool.metadata.name
                    ))
                })?
        }
    };

    let mut executor = inner;
    if !tool.spec.partial.is_empty() {
        executor = Arc::new(PartialExecutor::new(
            executor,
            tool.spec.partial.clone(),
            ctx.query_parameters.clone(),
        ));
    }
    if !tool.spec.filters.is_empty() {
        executor = Arc::new(FilteredExecutor::new(executor, tool.spec.filters.clone()));
    }
    Ok(executor)
}
