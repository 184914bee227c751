//! Agent runtime.
//!
//! Loads an Agent resource, resolves its model and tools, compiles the
//! prompt template, and drives the chat-completion + tool loop. Agents with
//! an execution engine delegate instead: `a2a` goes over the A2A protocol,
//! any other name POSTs to the resolved engine address.

use std::collections::HashMap;
use std::sync::Arc;

use keel_core::{
    resolve_parameters, resolve_value, Agent, ExecutionEngine, KeelError, KeelResult, Message,
    Model, Operation, OperationTracker, ToolCall, A2A_SERVER_ADDRESS_ANNOTATION,
    A2A_SERVER_NAME_ANNOTATION,
};
use keel_llm::{create_model, ChatModel, ChatRequest};
use keel_tools::{ToolRegistry, TERMINATE_TOOL};

use crate::a2a::A2AClient;
use crate::context::ExecContext;
use crate::engine::EngineClient;
use crate::toolset::build_registry;

/// Iteration cap on the tool loop
pub const MAX_ITERATIONS: usize = 10;

const DEFAULT_MODEL_NAME: &str = "default";

/// Result of one agent run: the newly produced assistant/tool messages.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    pub messages: Vec<Message>,
    /// The agent called the `terminate` built-in
    pub terminated: bool,
    /// Cancellation interrupted the loop; messages hold partial progress
    pub interrupted: bool,
}

impl AgentOutcome {
    /// Content of the final assistant message (terminate responses land in
    /// the trailing tool message, which is the fallback).
    pub fn final_content(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_assistant() && !m.content().is_empty())
            .or_else(|| self.messages.last())
            .map(|m| m.content().to_string())
            .unwrap_or_default()
    }
}

pub struct AgentRuntime {
    pub(crate) agent: Agent,
    pub(crate) ctx: ExecContext,
    /// None when execution is delegated to an engine
    pub(crate) model: Option<Arc<dyn ChatModel>>,
    pub(crate) registry: ToolRegistry,
    pub(crate) system_prompt: String,
}

impl AgentRuntime {
    pub async fn load(ctx: &ExecContext, name: &str) -> KeelResult<Self> {
        let agent: Agent = ctx.cluster.get_required(&ctx.namespace, name).await?;
        Self::from_resource(ctx, agent).await
    }

    pub async fn from_resource(ctx: &ExecContext, agent: Agent) -> KeelResult<Self> {
        let parameters = resolve_parameters(
            &ctx.cluster,
            &ctx.namespace,
            &agent.spec.parameters,
            &ctx.query_parameters,
        )
        .await?;
        let system_prompt = render_prompt(&agent.spec.prompt, &parameters, &ctx.query_parameters)?;
        let registry = build_registry(ctx, &agent).await?;

        let model = if agent.spec.execution_engine.is_some() {
            None
        } else {
            let model_name = agent
                .spec
                .model_ref
                .as_ref()
                .map(|r| r.name.as_str())
                .unwrap_or(DEFAULT_MODEL_NAME);
            let resource: Model = ctx.cluster.get_required(&ctx.namespace, model_name).await?;
            Some(create_model(&ctx.cluster, &resource).await?)
        };

        Ok(Self {
            agent,
            ctx: ctx.clone(),
            model,
            registry,
            system_prompt,
        })
    }

    pub fn name(&self) -> &str {
        &self.agent.metadata.name
    }

    /// Run the agent against one user message plus prior history.
    pub async fn execute(
        &self,
        user_message: Message,
        history: &[Message],
    ) -> KeelResult<AgentOutcome> {
        if self.agent.uses_a2a() {
            return self.execute_a2a(&user_message).await;
        }
        if let Some(engine) = self.agent.spec.execution_engine.clone() {
            return self.execute_engine(&engine.name, &user_message, history).await;
        }

        let model = self
            .model
            .as_ref()
            .ok_or_else(|| KeelError::runtime("agent loaded without a model"))?;
        let object = format!("{}/{}", self.ctx.namespace, self.agent.metadata.name);

        let mut conversation = Vec::with_capacity(history.len() + 2);
        if !self.system_prompt.is_empty() {
            conversation.push(Message::system(self.system_prompt.clone()));
        }
        conversation.extend_from_slice(history);
        conversation.push(user_message);

        let definitions = self.registry.definitions();
        let mut produced = Vec::new();

        for _iteration in 0..MAX_ITERATIONS {
            if self.ctx.cancel.is_cancelled() {
                return Ok(AgentOutcome {
                    messages: produced,
                    terminated: false,
                    interrupted: true,
                });
            }

            let request = ChatRequest {
                messages: conversation.clone(),
                tools: definitions.clone(),
                output_schema: self.agent.spec.output_schema.clone(),
            };
            let tracker = OperationTracker::start(
                &self.ctx.recorder,
                Some(&self.ctx.collector),
                Operation::ModelCall,
                "Agent",
                &object,
            );

            let completion = tokio::select! {
                _ = self.ctx.cancel.cancelled() => {
                    tracker.fail(&KeelError::Canceled);
                    return Ok(AgentOutcome {
                        messages: produced,
                        terminated: false,
                        interrupted: true,
                    });
                }
                result = model.chat_completion(request) => match result {
                    Ok(completion) => {
                        tracker.complete(Some(completion.usage));
                        completion
                    }
                    Err(e) => {
                        tracker.fail(&e);
                        return Err(e);
                    }
                },
            };

            let assistant = completion.message;
            let calls: Vec<ToolCall> = assistant
                .tool_calls()
                .map(|calls| calls.iter().map(ToolCall::from).collect())
                .unwrap_or_default();

            conversation.push(assistant.clone());
            produced.push(assistant);

            if calls.is_empty() {
                return Ok(AgentOutcome {
                    messages: produced,
                    terminated: false,
                    interrupted: false,
                });
            }

            let mut terminated = false;
            for call in &calls {
                if self.ctx.cancel.is_cancelled() {
                    return Ok(AgentOutcome {
                        messages: produced,
                        terminated: false,
                        interrupted: true,
                    });
                }

                let tracker = OperationTracker::start(
                    &self.ctx.recorder,
                    Some(&self.ctx.collector),
                    Operation::ToolCall,
                    "Agent",
                    format!("{} {}", object, call.function_name),
                );
                let result = match self.registry.execute(call).await {
                    Ok(result) => {
                        tracker.complete(None);
                        result
                    }
                    Err(e) => {
                        tracker.fail(&e);
                        return Err(e);
                    }
                };

                let tool_message = Message::tool(result.content.clone(), call.id.clone());
                conversation.push(tool_message.clone());
                produced.push(tool_message);

                if call.function_name == TERMINATE_TOOL {
                    terminated = true;
                }
            }

            if terminated {
                return Ok(AgentOutcome {
                    messages: produced,
                    terminated: true,
                    interrupted: false,
                });
            }
        }

        Err(KeelError::runtime(format!(
            "agent {} exceeded {} iterations",
            self.agent.metadata.name, MAX_ITERATIONS
        )))
    }

    /// Delegate over the A2A protocol: the user message's text goes out as
    /// a single message/send call against the discovered server address.
    async fn execute_a2a(&self, user_message: &Message) -> KeelResult<AgentOutcome> {
        let address = self
            .agent
            .metadata
            .annotations
            .get(A2A_SERVER_ADDRESS_ANNOTATION)
            .cloned()
            .ok_or_else(|| {
                KeelError::validation(format!(
                    "agent {} has no {} annotation",
                    self.agent.metadata.name, A2A_SERVER_ADDRESS_ANNOTATION
                ))
            })?;
        let headers = self.a2a_headers().await;

        let object = format!("{}/{}", self.ctx.namespace, self.agent.metadata.name);
        let tracker = OperationTracker::start(
            &self.ctx.recorder,
            Some(&self.ctx.collector),
            Operation::A2ACall,
            "Agent",
            &object,
        );

        let client = A2AClient::new(address, headers)?;
        match client.message_send(user_message.content()).await {
            Ok(text) => {
                tracker.complete(None);
                Ok(AgentOutcome {
                    messages: vec![Message::assistant(text)],
                    terminated: false,
                    interrupted: false,
                })
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    /// Headers of the owning A2AServer, if it still exists.
    async fn a2a_headers(&self) -> Vec<(String, String)> {
        let Some(server_name) = self
            .agent
            .metadata
            .annotations
            .get(A2A_SERVER_NAME_ANNOTATION)
        else {
            return Vec::new();
        };
        let Ok(Some(server)) = self
            .ctx
            .cluster
            .get::<keel_core::A2AServer>(&self.ctx.namespace, server_name)
            .await
        else {
            return Vec::new();
        };

        let mut headers = Vec::new();
        for header in &server.spec.headers {
            if let Ok(value) =
                resolve_value(&self.ctx.cluster, &self.ctx.namespace, &header.value).await
            {
                headers.push((header.name.clone(), value));
            }
        }
        headers
    }

    /// Delegate to a named execution engine.
    async fn execute_engine(
        &self,
        engine_name: &str,
        user_message: &Message,
        history: &[Message],
    ) -> KeelResult<AgentOutcome> {
        let engine: ExecutionEngine = self
            .ctx
            .cluster
            .get_required(&self.ctx.namespace, engine_name)
            .await?;
        let address = resolve_value(&self.ctx.cluster, &self.ctx.namespace, &engine.spec.address)
            .await?;

        let mut headers = Vec::new();
        for header in &engine.spec.headers {
            let value =
                resolve_value(&self.ctx.cluster, &self.ctx.namespace, &header.value).await?;
            headers.push((header.name.clone(), value));
        }

        let agent_config = serde_json::json!({
            "name": self.agent.metadata.name,
            "namespace": self.agent.metadata.namespace,
            "spec": self.agent.spec,
        });

        let object = format!("{}/{}", self.ctx.namespace, self.agent.metadata.name);
        let tracker = OperationTracker::start(
            &self.ctx.recorder,
            Some(&self.ctx.collector),
            Operation::ModelCall,
            "Agent",
            &object,
        );

        let client = EngineClient::new(address, headers)?;
        match client
            .execute(
                &agent_config,
                user_message,
                history,
                &self.registry.definitions(),
            )
            .await
        {
            Ok((messages, usage)) => {
                tracker.complete(Some(usage));
                Ok(AgentOutcome {
                    messages,
                    terminated: false,
                    interrupted: false,
                })
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }
}

/// Render the prompt template against agent parameters merged over query
/// parameters (agent parameters win).
fn render_prompt(
    template: &str,
    parameters: &HashMap<String, String>,
    query_parameters: &HashMap<String, String>,
) -> KeelResult<String> {
    if template.is_empty() {
        return Ok(String::new());
    }

    let mut merged = query_parameters.clone();
    for (key, value) in parameters {
        merged.insert(key.clone(), value.clone());
    }

    let mut env = minijinja::Environment::new();
    env.add_template("prompt", template)
        .map_err(|e| KeelError::validation(format!("bad prompt template: {}", e)))?;
    env.get_template("prompt")
        .and_then(|t| t.render(&merged))
        .map_err(|e| KeelError::runtime(format!("failed to render prompt: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keel_core::{ClusterClient, InMemoryCluster, TokenUsage, ToolCallRequest};
    use keel_llm::ChatCompletion;
    use keel_tools::register_builtin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted model: returns its responses in order.
    struct StubModel {
        responses: Vec<Message>,
        calls: AtomicUsize,
    }

    impl StubModel {
        fn new(responses: Vec<Message>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatModel for StubModel {
        async fn chat_completion(&self, _request: ChatRequest) -> KeelResult<ChatCompletion> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            let message = self
                .responses
                .get(index)
                .cloned()
                .unwrap_or_else(|| Message::assistant("exhausted"));
            Ok(ChatCompletion {
                message,
                usage: TokenUsage::new(10, 5),
            })
        }

        async fn probe(&self) -> KeelResult<()> {
            Ok(())
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    fn runtime_with(responses: Vec<Message>, registry: ToolRegistry) -> AgentRuntime {
        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let ctx = ExecContext::new(cluster, "default");
        let agent: Agent =
            serde_yaml::from_str("metadata: {name: a}\nspec: {prompt: 'be useful'}").unwrap();
        AgentRuntime {
            agent,
            ctx,
            model: Some(Arc::new(StubModel::new(responses))),
            registry,
            system_prompt: "be useful".to_string(),
        }
    }

    #[tokio::test]
    async fn test_plain_completion() {
        let runtime = runtime_with(vec![Message::assistant("ok")], ToolRegistry::new());
        let outcome = runtime
            .execute(Message::user("go"), &[])
            .await
            .unwrap();

        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.final_content(), "ok");
        assert!(!outcome.terminated);
        assert_eq!(runtime.ctx.collector.total().total_tokens, 15);
    }

    #[tokio::test]
    async fn test_tool_loop_runs_tools_then_model_again() {
        let mut registry = ToolRegistry::new();
        register_builtin(&mut registry, "noop");

        let tool_call = Message::Assistant {
            content: String::new(),
            tool_calls: Some(vec![ToolCallRequest::new("c1", "noop", r#"{"x":1}"#)]),
        };
        let runtime = runtime_with(vec![tool_call, Message::assistant("sunny")], registry);

        let outcome = runtime.execute(Message::user("weather?"), &[]).await.unwrap();

        // assistant(tool_calls) + tool result + final assistant
        assert_eq!(outcome.messages.len(), 3);
        assert_eq!(outcome.messages[1].role(), "tool");
        assert_eq!(outcome.final_content(), "sunny");
        // Two model invocations accounted.
        assert_eq!(runtime.ctx.collector.total().total_tokens, 30);
    }

    #[tokio::test]
    async fn test_terminate_stops_the_loop() {
        let mut registry = ToolRegistry::new();
        register_builtin(&mut registry, TERMINATE_TOOL);

        let tool_call = Message::Assistant {
            content: String::new(),
            tool_calls: Some(vec![ToolCallRequest::new(
                "c1",
                TERMINATE_TOOL,
                r#"{"response":"stop"}"#,
            )]),
        };
        let runtime = runtime_with(
            vec![tool_call, Message::assistant("never reached")],
            registry,
        );

        let outcome = runtime.execute(Message::user("go"), &[]).await.unwrap();
        assert!(outcome.terminated);
        assert_eq!(outcome.final_content(), "stop");
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        let mut registry = ToolRegistry::new();
        register_builtin(&mut registry, "noop");

        let tool_call = Message::Assistant {
            content: String::new(),
            tool_calls: Some(vec![ToolCallRequest::new("c", "noop", "{}")]),
        };
        let runtime = runtime_with(vec![tool_call; MAX_ITERATIONS + 1], registry);

        let err = runtime.execute(Message::user("loop"), &[]).await.unwrap_err();
        assert!(err.to_string().contains("iterations"));
    }

    #[tokio::test]
    async fn test_cancellation_returns_partial_messages() {
        let runtime = runtime_with(vec![Message::assistant("x")], ToolRegistry::new());
        runtime.ctx.cancel.cancel();

        let outcome = runtime.execute(Message::user("go"), &[]).await.unwrap();
        assert!(outcome.interrupted);
        assert!(outcome.messages.is_empty());
    }

    #[test]
    fn test_prompt_rendering_agent_parameters_win() {
        let mut parameters = HashMap::new();
        parameters.insert("units".to_string(), "metric".to_string());
        let mut query_parameters = HashMap::new();
        query_parameters.insert("units".to_string(), "imperial".to_string());
        query_parameters.insert("city".to_string(), "Paris".to_string());

        let rendered = render_prompt(
            "Report {{city}} weather in {{units}}.",
            &parameters,
            &query_parameters,
        )
        .unwrap();
        assert_eq!(rendered, "Report Paris weather in metric.");
    }
}
