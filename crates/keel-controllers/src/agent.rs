//! Agent controller.
//!
//! Gates the Available condition on the agent's dependencies: referenced
//! tools, the direct or `default` model, the owning A2A server, or the
//! named execution engine. Dependency events re-enqueue the agents that
//! reference the changed object.

use async_trait::async_trait;

use keel_core::{
    is_condition_true, set_condition, Agent, AgentToolType, ClusterClient, Condition,
    ConditionStatus, EventRecorder, ExecutionEngine, KeelResult, Model, ResourcePhase, Tool,
    WatchEvent, A2AServer, A2A_SERVER_NAME_ANNOTATION, CONDITION_AVAILABLE,
    CONDITION_MODEL_AVAILABLE, CONDITION_READY,
};
use keel_tools::{NOOP_TOOL, TERMINATE_TOOL};

use crate::manager::{Action, Reconciler, Request};
use crate::status::update_status_with_retry;

const DEFAULT_MODEL_NAME: &str = "default";

pub struct AgentReconciler {
    cluster: ClusterClient,
    recorder: EventRecorder,
}

impl AgentReconciler {
    pub fn new(cluster: ClusterClient, recorder: EventRecorder) -> Self {
        Self { cluster, recorder }
    }

    /// Dependencies that are not in a ready-equivalent condition.
    async fn missing_dependencies(&self, agent: &Agent, namespace: &str) -> KeelResult<Vec<String>> {
        let mut missing = Vec::new();

        if agent.uses_a2a() {
            let server_ready = match agent
                .metadata
                .annotations
                .get(A2A_SERVER_NAME_ANNOTATION)
            {
                Some(server_name) => self
                    .cluster
                    .get::<A2AServer>(namespace, server_name)
                    .await?
                    .and_then(|s| s.status)
                    .map(|s| is_condition_true(&s.conditions, CONDITION_READY))
                    .unwrap_or(false),
                None => false,
            };
            if !server_ready {
                missing.push("a2a server not ready".to_string());
            }
            return Ok(missing);
        }

        if let Some(engine_ref) = &agent.spec.execution_engine {
            let engine_ready = self
                .cluster
                .get::<ExecutionEngine>(namespace, &engine_ref.name)
                .await?
                .and_then(|e| e.status)
                .map(|s| is_condition_true(&s.conditions, CONDITION_READY))
                .unwrap_or(false);
            if !engine_ready {
                missing.push(format!("execution engine {} not ready", engine_ref.name));
            }
        } else {
            let model_name = agent
                .spec
                .model_ref
                .as_ref()
                .map(|r| r.name.as_str())
                .unwrap_or(DEFAULT_MODEL_NAME);
            let model_available = self
                .cluster
                .get::<Model>(namespace, model_name)
                .await?
                .and_then(|m| m.status)
                .map(|s| is_condition_true(&s.conditions, CONDITION_MODEL_AVAILABLE))
                .unwrap_or(false);
            if !model_available {
                missing.push(format!("model {} not available", model_name));
            }
        }

        for tool_ref in &agent.spec.tools {
            match tool_ref.tool_type {
                AgentToolType::Builtin => {
                    let name = tool_ref.name.as_deref().unwrap_or_default();
                    if name != NOOP_TOOL && name != TERMINATE_TOOL {
                        missing.push(format!("unknown builtin tool {}", name));
                    }
                }
                AgentToolType::Custom => {
                    if let Some(name) = &tool_ref.name {
                        let ready = self
                            .cluster
                            .get::<Tool>(namespace, name)
                            .await?
                            .and_then(|t| t.status)
                            .map(|s| is_condition_true(&s.conditions, CONDITION_READY))
                            .unwrap_or(false);
                        if !ready {
                            missing.push(format!("tool {} not ready", name));
                        }
                    }
                    // Selector entries bind at execution time; an empty
                    // match set is not a missing dependency.
                }
            }
        }

        Ok(missing)
    }
}

#[async_trait]
impl Reconciler for AgentReconciler {
    fn kind(&self) -> &'static str {
        "Agent"
    }

    fn watched_kinds(&self) -> Vec<&'static str> {
        vec!["Tool", "Model", "A2AServer", "ExecutionEngine"]
    }

    async fn map_dependency(&self, event: &WatchEvent) -> Vec<Request> {
        let Ok(agents) = self.cluster.list::<Agent>(&event.namespace).await else {
            return Vec::new();
        };

        agents
            .into_iter()
            .filter(|agent| match event.kind.as_str() {
                "Model" => {
                    if agent.spec.execution_engine.is_some() {
                        return false;
                    }
                    match &agent.spec.model_ref {
                        Some(model_ref) => model_ref.name == event.name,
                        None => event.name == DEFAULT_MODEL_NAME,
                    }
                }
                "Tool" => agent.spec.tools.iter().any(|t| {
                    t.tool_type == AgentToolType::Custom
                        && (t.name.as_deref() == Some(event.name.as_str())
                            || t.label_selector.is_some())
                }),
                "A2AServer" => {
                    agent.metadata.is_owned_by("A2AServer", &event.name)
                        || agent
                            .metadata
                            .annotations
                            .get(A2A_SERVER_NAME_ANNOTATION)
                            .map(|n| n == &event.name)
                            .unwrap_or(false)
                }
                "ExecutionEngine" => agent
                    .spec
                    .execution_engine
                    .as_ref()
                    .map(|e| e.name == event.name)
                    .unwrap_or(false),
                _ => false,
            })
            .map(|agent| Request::new(&event.namespace, &agent.metadata.name))
            .collect()
    }

    async fn reconcile(&self, request: &Request) -> KeelResult<Action> {
        let Some(agent) = self
            .cluster
            .get::<Agent>(&request.namespace, &request.name)
            .await?
        else {
            return Ok(Action::done());
        };
        let generation = agent.metadata.generation;

        if agent.status().conditions.is_empty() {
            update_status_with_retry(&self.cluster, &request.namespace, &request.name, {
                |agent: &mut Agent| {
                    let mut status = agent.status();
                    status.phase = ResourcePhase::Pending;
                    set_condition(
                        &mut status.conditions,
                        Condition::new(
                            CONDITION_AVAILABLE,
                            ConditionStatus::Unknown,
                            "Initializing",
                            "",
                        ),
                        generation,
                    );
                    agent.status = Some(status);
                    true
                }
            })
            .await?;
            return Ok(Action::done());
        }

        let missing = self.missing_dependencies(&agent, &request.namespace).await?;
        let (phase, condition, message) = if missing.is_empty() {
            (
                ResourcePhase::Ready,
                Condition::new(
                    CONDITION_AVAILABLE,
                    ConditionStatus::True,
                    "DependenciesReady",
                    "",
                ),
                None,
            )
        } else {
            let message = missing.join("; ");
            self.recorder.warning(
                "Agent",
                format!("{}/{}", request.namespace, request.name),
                "DependenciesNotReady",
                message.clone(),
            );
            (
                ResourcePhase::Pending,
                Condition::new(
                    CONDITION_AVAILABLE,
                    ConditionStatus::False,
                    "DependenciesNotReady",
                    message.clone(),
                ),
                Some(message),
            )
        };

        update_status_with_retry(&self.cluster, &request.namespace, &request.name, {
            move |agent: &mut Agent| {
                let before = serde_json::to_value(agent.status()).unwrap_or_default();
                let mut status = agent.status();
                status.phase = phase;
                status.message = message.clone();
                set_condition(&mut status.conditions, condition.clone(), generation);

                let after = serde_json::to_value(&status).unwrap_or_default();
                agent.status = Some(status);
                before != after
            }
        })
        .await?;
        Ok(Action::done())
    }
}
