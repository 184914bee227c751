//! Query executor.
//!
//! Resolves the target union, fans one task out per target, aggregates
//! responses, and persists produced messages to memory. Tasks share nothing
//! but the token collector and the memory client; one failing target does
//! not short-circuit the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::Instrument;

use keel_core::{
    parse_duration, resolve_parameters, Agent, ClusterClient, Evaluator, KeelError, KeelResult,
    Message, Model, Operation, OperationTracker, Query, QueryResponse, QuerySpec, QueryTarget,
    TargetType, Team, Tool, ToolCall,
};
use keel_llm::{create_model, ChatRequest};
use keel_memory::{memory_for_query, Memory};

use crate::agent::AgentRuntime;
use crate::context::ExecContext;
use crate::team::TeamRuntime;
use crate::toolset::executor_for_tool;

/// Default per-query execution deadline
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(300);

/// Aggregated result of one query execution
#[derive(Debug, Default)]
pub struct QueryOutcome {
    pub responses: Vec<QueryResponse>,
    /// First target failure; later failures are demoted to events
    pub error: Option<String>,
}

pub struct QueryExecutor;

impl QueryExecutor {
    /// Union of the explicitly listed targets and selector matches across
    /// agents, teams, models, and tools; order preserved, duplicates removed.
    pub async fn resolve_targets(
        cluster: &ClusterClient,
        namespace: &str,
        spec: &QuerySpec,
    ) -> KeelResult<Vec<QueryTarget>> {
        let mut targets = spec.targets.clone();

        if let Some(selector) = &spec.selector {
            for agent in cluster.list::<Agent>(namespace).await? {
                if selector.matches(&agent.metadata.labels) {
                    targets.push(QueryTarget {
                        target_type: TargetType::Agent,
                        name: agent.metadata.name,
                    });
                }
            }
            for team in cluster.list::<Team>(namespace).await? {
                if selector.matches(&team.metadata.labels) {
                    targets.push(QueryTarget {
                        target_type: TargetType::Team,
                        name: team.metadata.name,
                    });
                }
            }
            for model in cluster.list::<Model>(namespace).await? {
                if selector.matches(&model.metadata.labels) {
                    targets.push(QueryTarget {
                        target_type: TargetType::Model,
                        name: model.metadata.name,
                    });
                }
            }
            for tool in cluster.list::<Tool>(namespace).await? {
                if selector.matches(&tool.metadata.labels) {
                    targets.push(QueryTarget {
                        target_type: TargetType::Tool,
                        name: tool.metadata.name,
                    });
                }
            }
        }

        let mut seen = Vec::new();
        targets.retain(|t| {
            let key = (t.target_type, t.name.clone());
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        });
        Ok(targets)
    }

    /// Union of explicit evaluator refs and evaluatorSelector matches.
    pub async fn resolve_evaluators(
        cluster: &ClusterClient,
        namespace: &str,
        spec: &QuerySpec,
    ) -> KeelResult<Vec<Evaluator>> {
        let mut evaluators: Vec<Evaluator> = Vec::new();
        for reference in &spec.evaluators {
            let ns = reference.namespace.as_deref().unwrap_or(namespace);
            evaluators.push(cluster.get_required(ns, &reference.name).await?);
        }
        if let Some(selector) = &spec.evaluator_selector {
            for evaluator in cluster.list::<Evaluator>(namespace).await? {
                if selector.matches(&evaluator.metadata.labels) {
                    evaluators.push(evaluator);
                }
            }
        }
        let mut seen = Vec::new();
        evaluators.retain(|e| {
            if seen.contains(&e.metadata.name) {
                false
            } else {
                seen.push(e.metadata.name.clone());
                true
            }
        });
        Ok(evaluators)
    }

    /// Run the fan-out; returns per-target responses plus the first error.
    pub async fn execute(ctx: &ExecContext, query: &Query) -> KeelResult<QueryOutcome> {
        let namespace = &query.metadata.namespace;
        let object = format!("{}/{}", namespace, query.metadata.name);

        let tracker = OperationTracker::start(
            &ctx.recorder,
            Some(&ctx.collector),
            Operation::QueryResolve,
            "Query",
            &object,
        );
        let targets = match Self::resolve_targets(&ctx.cluster, namespace, &query.spec).await {
            Ok(targets) if !targets.is_empty() => {
                tracker.complete(None);
                targets
            }
            Ok(_) => {
                let err = KeelError::validation("query resolves to no targets");
                tracker.fail(&err);
                return Err(err);
            }
            Err(e) => {
                tracker.fail(&e);
                return Err(e);
            }
        };

        let timeout = query
            .spec
            .timeout
            .as_deref()
            .map(parse_duration)
            .transpose()?
            .unwrap_or(DEFAULT_QUERY_TIMEOUT);

        let parameters = resolve_parameters(
            &ctx.cluster,
            namespace,
            &query.spec.parameters,
            &HashMap::new(),
        )
        .await?;
        let input = render_input(&query.spec.input, &parameters)?;

        let memory = memory_for_query(
            &ctx.cluster,
            namespace,
            query.spec.memory_ref.as_ref().map(|r| r.name.as_str()),
            query.session_id(),
        )
        .await?;
        let history = memory.get_messages().await?;

        let mut join_set: JoinSet<(usize, QueryTarget, KeelResult<String>)> = JoinSet::new();
        for (index, target) in targets.iter().cloned().enumerate() {
            let ctx = ctx.clone();
            let memory = memory.clone();
            let input = input.clone();
            let history = history.clone();
            let query_name = query.metadata.name.clone();

            join_set.spawn(async move {
                let result =
                    run_target(&ctx, &memory, &target, &input, &history, timeout, &query_name)
                        .await;
                (index, target, result)
            });
        }

        let mut indexed: Vec<(usize, QueryResponse)> = Vec::new();
        let mut first_error: Option<String> = None;
        let mut canceled = false;

        while let Some(joined) = join_set.join_next().await {
            let (index, target, result) = match joined {
                Ok(entry) => entry,
                Err(e) => {
                    first_error.get_or_insert(format!("target task panicked: {}", e));
                    continue;
                }
            };
            match result {
                Ok(content) => indexed.push((index, QueryResponse { target, content })),
                Err(KeelError::Canceled) => canceled = true,
                Err(e) => {
                    let message = format!("target {} failed: {}", target.name, e);
                    if first_error.is_none() {
                        first_error = Some(message);
                    } else {
                        ctx.recorder
                            .warning("Query", &object, "TargetFailed", message);
                    }
                }
            }
        }

        if canceled || ctx.cancel.is_cancelled() {
            return Err(KeelError::Canceled);
        }

        indexed.sort_by_key(|(index, _)| *index);
        Ok(QueryOutcome {
            responses: indexed.into_iter().map(|(_, r)| r).collect(),
            error: first_error,
        })
    }
}

async fn run_target(
    ctx: &ExecContext,
    memory: &Arc<dyn Memory>,
    target: &QueryTarget,
    input: &str,
    history: &[Message],
    timeout: Duration,
    query_name: &str,
) -> KeelResult<String> {
    let span = match target.target_type {
        TargetType::Agent => tracing::info_span!("query.agent", target = %target.name, input),
        TargetType::Team => tracing::info_span!("query.team", target = %target.name, input),
        TargetType::Model => tracing::info_span!("query.model", target = %target.name, input),
        TargetType::Tool => tracing::info_span!("query.tool", target = %target.name, input),
    };

    let dispatch = dispatch_target(ctx, target, input, history).instrument(span);
    let (content, produced) = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(KeelError::Canceled),
        result = tokio::time::timeout(timeout, dispatch) => match result {
            Ok(result) => result?,
            Err(_) => {
                return Err(KeelError::timeout(format!(
                    "target {} exceeded {:?}",
                    target.name, timeout
                )))
            }
        },
    };

    // Persist the turn; a memory failure downgrades to an event.
    let tracker = OperationTracker::start(
        &ctx.recorder,
        None,
        Operation::MemoryAddMessages,
        "Query",
        format!("{}/{}", ctx.namespace, query_name),
    );
    let mut turn = vec![Message::user(input)];
    turn.extend(produced);
    match memory.add_messages(query_name, &turn).await {
        Ok(()) => tracker.complete(None),
        Err(e) => tracker.fail(&e),
    }

    Ok(content)
}

/// Produce (final content, produced messages) for one target.
async fn dispatch_target(
    ctx: &ExecContext,
    target: &QueryTarget,
    input: &str,
    history: &[Message],
) -> KeelResult<(String, Vec<Message>)> {
    match target.target_type {
        TargetType::Agent => {
            let agent = AgentRuntime::load(ctx, &target.name).await?;
            let outcome = agent.execute(Message::user(input), history).await?;
            if outcome.interrupted {
                return Err(KeelError::Canceled);
            }
            Ok((outcome.final_content(), outcome.messages))
        }
        TargetType::Team => {
            let team = TeamRuntime::load(ctx, &target.name).await?;
            let outcome = team.execute(Message::user(input), history).await?;
            if outcome.interrupted {
                return Err(KeelError::Canceled);
            }
            Ok((outcome.final_content(), outcome.messages))
        }
        TargetType::Model => {
            let resource: Model = ctx.cluster.get_required(&ctx.namespace, &target.name).await?;
            let model = create_model(&ctx.cluster, &resource).await?;

            let mut messages = history.to_vec();
            messages.push(Message::user(input));

            let tracker = OperationTracker::start(
                &ctx.recorder,
                Some(&ctx.collector),
                Operation::ModelCall,
                "Model",
                format!("{}/{}", ctx.namespace, target.name),
            );
            match model.chat_completion(ChatRequest::from_messages(messages)).await {
                Ok(completion) => {
                    tracker.complete(Some(completion.usage));
                    let content = completion.message.content().to_string();
                    Ok((content, vec![completion.message]))
                }
                Err(e) => {
                    tracker.fail(&e);
                    Err(e)
                }
            }
        }
        TargetType::Tool => {
            let resource: Tool = ctx.cluster.get_required(&ctx.namespace, &target.name).await?;
            let executor = executor_for_tool(ctx, &resource)?;

            // The input is the argument object when it parses as JSON.
            let arguments = match serde_json::from_str::<serde_json::Value>(input) {
                Ok(value) if value.is_object() => value.to_string(),
                _ => serde_json::json!({"input": input}).to_string(),
            };
            let call = ToolCall {
                id: uuid::Uuid::new_v4().to_string(),
                function_name: resource.metadata.name.clone(),
                arguments,
            };

            let tracker = OperationTracker::start(
                &ctx.recorder,
                Some(&ctx.collector),
                Operation::ToolCall,
                "Tool",
                format!("{}/{}", ctx.namespace, target.name),
            );
            let result = match executor.execute(&call).await {
                Ok(result) => {
                    tracker.complete(None);
                    result
                }
                Err(e) => {
                    tracker.fail(&e);
                    return Err(e);
                }
            };

            if let Some(error) = result.error {
                return Err(KeelError::tool(error));
            }
            Ok((result.content.clone(), vec![Message::assistant(result.content)]))
        }
    }
}

/// Render `{{param}}` templates in the query input.
fn render_input(input: &str, parameters: &HashMap<String, String>) -> KeelResult<String> {
    if !input.contains("{{") {
        return Ok(input.to_string());
    }
    let mut env = minijinja::Environment::new();
    env.add_template("input", input)
        .map_err(|e| KeelError::validation(format!("bad input template: {}", e)))?;
    env.get_template("input")
        .and_then(|t| t.render(parameters))
        .map_err(|e| KeelError::runtime(format!("failed to render input: {}", e)))
}
