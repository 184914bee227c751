// Agent resource - a configured LLM persona bundling prompt, model, tools,
// and parameters.

use serde::{Deserialize, Serialize};

use super::{default_api_version, LocalRef, ResourcePhase};
use crate::client::Resource;
use crate::condition::Condition;
use crate::meta::{LabelSelector, ObjectMeta};
use crate::value::Parameter;

/// Reserved execution-engine name meaning "delegate over the A2A protocol"
pub const EXECUTION_ENGINE_A2A: &str = "a2a";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "agent_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: AgentSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,
}

fn agent_kind() -> String {
    "Agent".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    /// System prompt template, rendered against the resolved parameter map
    #[serde(default)]
    pub prompt: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Model to use; absent means the `default` model of the namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_ref: Option<LocalRef>,

    /// Ordered tool list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<AgentToolRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,

    /// Delegate execution to an external engine; `a2a` is reserved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_engine: Option<LocalRef>,

    /// JSON schema forced onto the model response when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

/// One entry of an agent's tool list: a built-in by name, or custom tools
/// by name or label selector, optionally narrowed to specific functions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentToolRef {
    #[serde(rename = "type", default)]
    pub tool_type: AgentToolType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
    /// Restrict which functions of the matched tools are exposed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentToolType {
    #[default]
    Custom,
    Builtin,
}

pub type AgentPhase = ResourcePhase;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    #[serde(default)]
    pub phase: AgentPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Resource for Agent {
    const KIND: &'static str = "Agent";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Agent {
    pub fn status(&self) -> AgentStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Whether execution is delegated over the A2A protocol
    pub fn uses_a2a(&self) -> bool {
        self.spec
            .execution_engine
            .as_ref()
            .is_some_and(|e| e.name == EXECUTION_ENGINE_A2A)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_yaml_roundtrip() {
        let yaml = r#"
apiVersion: keel.dev/v1
kind: Agent
metadata:
  name: weather-bot
  namespace: default
spec:
  prompt: "You report weather. Units: {{units}}"
  modelRef:
    name: gpt4
  tools:
    - type: builtin
      name: noop
    - name: get-weather
    - labelSelector:
        matchLabels:
          group: forecasting
  parameters:
    - name: units
      value: metric
"#;
        let agent: Agent = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(agent.metadata.name, "weather-bot");
        assert_eq!(agent.spec.tools.len(), 3);
        assert_eq!(agent.spec.tools[0].tool_type, AgentToolType::Builtin);
        assert_eq!(agent.spec.tools[1].tool_type, AgentToolType::Custom);
        assert!(agent.spec.tools[2].label_selector.is_some());
        assert!(!agent.uses_a2a());
    }

    #[test]
    fn test_a2a_engine_detection() {
        let yaml = r#"
metadata:
  name: remote
spec:
  prompt: ""
  executionEngine:
    name: a2a
"#;
        let agent: Agent = serde_yaml::from_str(yaml).unwrap();
        assert!(agent.uses_a2a());
    }

    #[test]
    fn test_default_status_is_pending() {
        let agent: Agent =
            serde_yaml::from_str("metadata: {name: a}\nspec: {prompt: hi}").unwrap();
        assert_eq!(agent.status().phase, AgentPhase::Pending);
    }
}
