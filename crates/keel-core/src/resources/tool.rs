// Tool resource - a callable capability exposed to the LLM as a function:
// an HTTP endpoint, an MCP server tool, a sub-agent, or a built-in.

use serde::{Deserialize, Serialize};

use super::{default_api_version, LocalRef, ResourcePhase};
use crate::client::Resource;
use crate::condition::Condition;
use crate::error::{KeelError, KeelResult};
use crate::meta::ObjectMeta;
use crate::value::ValueSource;

/// Annotation consulted when a tool spec carries no description
pub const DESCRIPTION_ANNOTATION: &str = "keel.dev/description";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "tool_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ToolSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolStatus>,
}

fn tool_kind() -> String {
    "Tool".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    #[serde(rename = "type", default)]
    pub tool_type: ToolType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON schema of the function arguments; defaults to {"type":"object"}
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpToolSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp: Option<ToolMcpSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<ToolAgentSpec>,

    /// Post-filters applied to the executor's content output, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<ToolFilter>,

    /// Template parameters rendered against the enclosing query's
    /// parameters and merged under the model-supplied arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partial: Vec<TemplateParameter>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    #[default]
    Http,
    Mcp,
    Agent,
    Builtin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpToolSpec {
    /// URL with `{param}` placeholders substituted from call arguments
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderValue>,
    /// Body template, same placeholder substitution as the URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

/// Header with a literal or Secret-backed value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderValue {
    pub name: String,
    pub value: ValueSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMcpSpec {
    pub server_ref: LocalRef,
    /// Name of the tool on the upstream MCP server
    pub tool_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAgentSpec {
    pub agent_ref: LocalRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolFilter {
    #[serde(rename = "type", default)]
    pub filter_type: ToolFilterType,
    pub expression: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolFilterType {
    #[default]
    Jq,
}

/// Name/template pair for partial parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateParameter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStatus {
    #[serde(default)]
    pub phase: ResourcePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Resource for Tool {
    const KIND: &'static str = "Tool";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Tool {
    /// Description with the annotation and generated-string fallbacks
    pub fn description(&self) -> String {
        if let Some(description) = &self.spec.description {
            return description.clone();
        }
        if let Some(annotated) = self.metadata.annotations.get(DESCRIPTION_ANNOTATION) {
            return annotated.clone();
        }
        format!("{:?} tool {}", self.spec.tool_type, self.metadata.name).to_lowercase()
    }

    /// Function-argument schema, defaulting to an open object
    pub fn input_schema(&self) -> serde_json::Value {
        self.spec
            .input_schema
            .clone()
            .unwrap_or_else(|| serde_json::json!({"type": "object"}))
    }

    /// Type-specific structural checks.
    pub fn validate(&self) -> KeelResult<()> {
        match self.spec.tool_type {
            ToolType::Http if self.spec.http.is_none() => {
                Err(KeelError::validation("http tool requires spec.http"))
            }
            ToolType::Mcp if self.spec.mcp.is_none() => {
                Err(KeelError::validation("mcp tool requires spec.mcp"))
            }
            ToolType::Agent if self.spec.agent.is_none() => {
                Err(KeelError::validation("agent tool requires spec.agent"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_tool_yaml() {
        let tool: Tool = serde_yaml::from_str(
            r#"
metadata: {name: weather}
spec:
  type: http
  description: Get current weather
  inputSchema:
    type: object
    properties:
      city: {type: string}
  http:
    url: "https://wttr.in/{city}"
    method: GET
    headers:
      - name: Authorization
        value:
          valueFrom:
            secretKeyRef: {name: keys, key: wttr}
"#,
        )
        .unwrap();
        assert_eq!(tool.spec.tool_type, ToolType::Http);
        assert!(tool.validate().is_ok());
        assert_eq!(tool.description(), "Get current weather");
        assert_eq!(tool.spec.http.unwrap().timeout_seconds, 30);
    }

    #[test]
    fn test_description_fallbacks() {
        let mut tool: Tool =
            serde_yaml::from_str("metadata: {name: t}\nspec: {type: mcp}").unwrap();
        assert_eq!(tool.description(), "mcp tool t");

        tool.metadata
            .annotations
            .insert(DESCRIPTION_ANNOTATION.to_string(), "annotated".to_string());
        assert_eq!(tool.description(), "annotated");
    }

    #[test]
    fn test_missing_type_spec_fails_validation() {
        let tool: Tool = serde_yaml::from_str("metadata: {name: t}\nspec: {type: mcp}").unwrap();
        assert!(tool.validate().is_err());
    }

    #[test]
    fn test_default_input_schema() {
        let tool: Tool =
            serde_yaml::from_str("metadata: {name: t}\nspec: {type: builtin}").unwrap();
        assert_eq!(tool.input_schema(), serde_json::json!({"type": "object"}));
    }
}
