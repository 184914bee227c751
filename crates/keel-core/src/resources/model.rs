// Model resource - a chat-completion backend (openai, azure, bedrock) plus
// the probe interval its controller uses for periodic re-probing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{default_api_version, ResourcePhase};
use crate::client::Resource;
use crate::condition::Condition;
use crate::meta::ObjectMeta;
use crate::value::ValueSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "model_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ModelSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ModelStatus>,
}

fn model_kind() -> String {
    "Model".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    #[serde(rename = "type")]
    pub model_type: ModelType,

    /// Provider-side model name
    pub model: ValueSource,

    #[serde(default)]
    pub config: ModelProviderConfig,

    /// Seconds between availability re-probes
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,
}

fn default_poll_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Openai,
    Azure,
    Bedrock,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<OpenAiConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bedrock: Option<BedrockConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<ValueSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ValueSource>,
    /// Merged into request parameters (temperature, max_tokens, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureConfig {
    pub base_url: ValueSource,
    pub api_key: ValueSource,
    #[serde(default = "default_azure_api_version")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
}

fn default_azure_api_version() -> String {
    "2024-06-01".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BedrockConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_arn: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    #[serde(default)]
    pub phase: ResourcePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Base address the last successful probe used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_resolved_address: Option<String>,
    /// Echo of spec.pollSeconds at last reconcile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Resource for Model {
    const KIND: &'static str = "Model";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Model {
    pub fn status(&self) -> ModelStatus {
        self.status.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_model_yaml() {
        let model: Model = serde_yaml::from_str(
            r#"
apiVersion: keel.dev/v1
kind: Model
metadata:
  name: default
spec:
  type: openai
  model:
    value: gpt-4o
  config:
    openai:
      baseUrl:
        value: https://api.openai.com/v1
      apiKey:
        valueFrom:
          secretKeyRef: {name: llm-keys, key: openai}
      properties:
        temperature: 0.2
"#,
        )
        .unwrap();
        assert_eq!(model.spec.model_type, ModelType::Openai);
        assert_eq!(model.spec.poll_seconds, 300);
        let openai = model.spec.config.openai.unwrap();
        assert_eq!(openai.properties["temperature"], 0.2);
    }

    #[test]
    fn test_azure_defaults_api_version() {
        let model: Model = serde_yaml::from_str(
            r#"
metadata: {name: az}
spec:
  type: azure
  model: {value: gpt-4}
  config:
    azure:
      baseUrl: {value: "https://example.openai.azure.com"}
      apiKey: {value: k}
"#,
        )
        .unwrap();
        assert_eq!(
            model.spec.config.azure.unwrap().api_version,
            "2024-06-01"
        );
    }
}
