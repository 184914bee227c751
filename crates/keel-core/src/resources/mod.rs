// Keel Core - Resource kinds
//
// One file per kind. Every resource is a Kubernetes-style desired-state
// object: apiVersion/kind, an ObjectMeta block, a spec, and an optional
// status owned exclusively by that kind's controller.

mod agent;
mod config;
mod evaluation;
mod evaluator;
mod memory;
mod model;
mod query;
mod servers;
mod team;
mod tool;

pub use agent::{Agent, AgentPhase, AgentSpec, AgentStatus, AgentToolRef, AgentToolType, EXECUTION_ENGINE_A2A};
pub use config::{ConfigMap, Secret};
pub use evaluation::{
    BatchChild, Evaluation, EvaluationConfig, EvaluationPhase, EvaluationSpec, EvaluationStatus,
    EvaluationType, QueryRef, EVALUATION_METADATA_PREFIX, PARENT_EVALUATION_LABEL,
};
pub use evaluator::{Evaluator, EvaluatorSpec};
pub use memory::{Memory, MemorySpec};
pub use model::{
    AzureConfig, BedrockConfig, Model, ModelProviderConfig, ModelSpec, ModelStatus, ModelType,
    OpenAiConfig,
};
pub use query::{
    Query, QueryEvaluationResult, QueryPhase, QueryResponse, QuerySpec, QueryStatus, QueryTarget,
    TargetType,
};
pub use servers::{
    A2AServer, A2AServerSpec, ExecutionEngine, ExecutionEngineSpec, MCPServer, McpServerSpec,
    McpTransport, A2A_SERVER_ADDRESS_ANNOTATION, A2A_SERVER_NAME_ANNOTATION,
};
pub use team::{
    GraphConfig, GraphEdge, SelectorConfig, Team, TeamMember, TeamMemberType, TeamSpec, TeamStatus,
    TeamStrategy,
};
pub use tool::{
    HeaderValue, HttpToolSpec, TemplateParameter, Tool, ToolAgentSpec, ToolFilter, ToolFilterType,
    ToolMcpSpec, ToolSpec, ToolStatus, ToolType, DESCRIPTION_ANNOTATION,
};

use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// API group/version stamped on keel resources
pub const API_VERSION: &str = "keel.dev/v1";

pub(crate) fn default_api_version() -> String {
    API_VERSION.to_string()
}

/// Reference to an object by name, optionally in another namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl LocalRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }
}

/// Phase shared by the simple {pending, ready, error} state machines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourcePhase {
    #[default]
    Pending,
    Ready,
    Error,
}

/// Status shape shared by the address-backed kinds
/// (Memory, MCPServer, A2AServer, ExecutionEngine, Evaluator)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressableStatus {
    #[serde(default)]
    pub phase: ResourcePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_resolved_address: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
