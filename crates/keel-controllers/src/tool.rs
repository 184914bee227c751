//! Tool controller - validates the type-specific spec and gates the Ready
//! condition on the backing MCP server or agent.

use async_trait::async_trait;

use keel_core::{
    is_condition_true, set_condition, Agent, ClusterClient, Condition, ConditionStatus,
    EventRecorder, KeelResult, MCPServer, ResourcePhase, Tool, ToolType, WatchEvent,
    CONDITION_AVAILABLE, CONDITION_READY,
};

use crate::manager::{Action, Reconciler, Request};
use crate::status::update_status_with_retry;

pub struct ToolReconciler {
    cluster: ClusterClient,
    recorder: EventRecorder,
}

impl ToolReconciler {
    pub fn new(cluster: ClusterClient, recorder: EventRecorder) -> Self {
        Self { cluster, recorder }
    }

    async fn dependency_problem(&self, tool: &Tool, namespace: &str) -> KeelResult<Option<String>> {
        match tool.spec.tool_type {
            ToolType::Mcp => {
                let spec = tool.spec.mcp.as_ref().unwrap();
                let server_namespace = spec.server_ref.namespace.as_deref().unwrap_or(namespace);
                let ready = self
                    .cluster
                    .get::<MCPServer>(server_namespace, &spec.server_ref.name)
                    .await?
                    .and_then(|s| s.status)
                    .map(|s| is_condition_true(&s.conditions, CONDITION_READY))
                    .unwrap_or(false);
                Ok((!ready)
                    .then(|| format!("mcp server {} not ready", spec.server_ref.name)))
            }
            ToolType::Agent => {
                let spec = tool.spec.agent.as_ref().unwrap();
                let available = self
                    .cluster
                    .get::<Agent>(namespace, &spec.agent_ref.name)
                    .await?
                    .and_then(|a| a.status)
                    .map(|s| is_condition_true(&s.conditions, CONDITION_AVAILABLE))
                    .unwrap_or(false);
                Ok((!available).then(|| format!("agent {} not available", spec.agent_ref.name)))
            }
            ToolType::Http | ToolType::Builtin => Ok(None),
        }
    }
}

#[async_trait]
impl Reconciler for ToolReconciler {
    fn kind(&self) -> &'static str {
        "Tool"
    }

    fn watched_kinds(&self) -> Vec<&'static str> {
        vec!["MCPServer", "Agent"]
    }

    async fn map_dependency(&self, event: &WatchEvent) -> Vec<Request> {
        let Ok(tools) = self.cluster.list::<Tool>(&event.namespace).await else {
            return Vec::new();
        };
        tools
            .into_iter()
            .filter(|tool| match event.kind.as_str() {
                "MCPServer" => tool
                    .spec
                    .mcp
                    .as_ref()
                    .map(|m| m.server_ref.name == event.name)
                    .unwrap_or(false),
                "Agent" => tool
                    .spec
                    .agent
                    .as_ref()
                    .map(|a| a.agent_ref.name == event.name)
                    .unwrap_or(false),
                _ => false,
            })
            .map(|tool| Request::new(&event.namespace, &tool.metadata.name))
            .collect()
    }

    async fn reconcile(&self, request: &Request) -> KeelResult<Action> {
        let Some(tool) = self
            .cluster
            .get::<Tool>(&request.namespace, &request.name)
            .await?
        else {
            return Ok(Action::done());
        };
        let generation = tool.metadata.generation;
        let object = format!("{}/{}", request.namespace, request.name);

        let (phase, condition, message) = if let Err(e) = tool.validate() {
            self.recorder
                .warning("Tool", &object, "ValidationFailed", e.to_string());
            (
                ResourcePhase::Error,
                Condition::new(
                    CONDITION_READY,
                    ConditionStatus::False,
                    "ValidationFailed",
                    e.to_string(),
                ),
                Some(e.to_string()),
            )
        } else {
            match self.dependency_problem(&tool, &request.namespace).await? {
                None => (
                    ResourcePhase::Ready,
                    Condition::new(CONDITION_READY, ConditionStatus::True, "Ready", ""),
                    None,
                ),
                Some(problem) => (
                    ResourcePhase::Pending,
                    Condition::new(
                        CONDITION_READY,
                        ConditionStatus::False,
                        "DependencyNotReady",
                        problem.clone(),
                    ),
                    Some(problem),
                ),
            }
        };

        update_status_with_retry(&self.cluster, &request.namespace, &request.name, {
            move |tool: &mut Tool| {
                let current = tool.status.clone().unwrap_or_default();
                let before = serde_json::to_value(&current).unwrap_or_default();

                let mut status = current;
                status.phase = phase;
                status.message = message.clone();
                set_condition(&mut status.conditions, condition.clone(), generation);

                let after = serde_json::to_value(&status).unwrap_or_default();
                tool.status = Some(status);
                before != after
            }
        })
        .await?;
        Ok(Action::done())
    }
}
