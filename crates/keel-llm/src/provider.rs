//! Provider selection from a Model resource.

use std::sync::Arc;

use keel_core::{resolve_value, ClusterClient, KeelError, KeelResult, Model, ModelType};

use crate::openai::{OpenAiModel, DEFAULT_OPENAI_BASE_URL};
use crate::ChatModel;

/// Instantiate the provider a Model resource describes, resolving every
/// value source in its config.
pub async fn create_model(cluster: &ClusterClient, model: &Model) -> KeelResult<Arc<dyn ChatModel>> {
    let namespace = &model.metadata.namespace;
    let model_name = resolve_value(cluster, namespace, &model.spec.model).await?;

    match model.spec.model_type {
        ModelType::Openai => {
            let config = model.spec.config.openai.clone().unwrap_or_default();
            let base_url = resolve_optional(cluster, namespace, config.base_url.as_ref())
                .await?
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
            let api_key = resolve_optional(cluster, namespace, config.api_key.as_ref())
                .await?
                .unwrap_or_default();
            Ok(Arc::new(OpenAiModel::new(
                base_url,
                api_key,
                model_name,
                config.properties,
            )?))
        }
        ModelType::Azure => {
            #[cfg(feature = "azure")]
            {
                let config = model.spec.config.azure.clone().ok_or_else(|| {
                    KeelError::validation("azure model requires spec.config.azure")
                })?;
                let base_url = resolve_value(cluster, namespace, &config.base_url).await?;
                let api_key = resolve_value(cluster, namespace, &config.api_key).await?;
                Ok(Arc::new(crate::azure::AzureModel::new(
                    base_url,
                    api_key,
                    config.api_version,
                    model_name,
                    config.properties,
                )?))
            }
            #[cfg(not(feature = "azure"))]
            {
                Err(KeelError::provider("azure provider not compiled in"))
            }
        }
        ModelType::Bedrock => {
            #[cfg(feature = "bedrock")]
            {
                let config = model.spec.config.bedrock.clone().unwrap_or_default();
                Ok(Arc::new(
                    crate::bedrock::BedrockModel::new(config, model_name).await?,
                ))
            }
            #[cfg(not(feature = "bedrock"))]
            {
                Err(KeelError::provider(
                    "bedrock provider not compiled in (enable the `bedrock` feature)",
                ))
            }
        }
    }
}

/// Base address recorded in Model status as lastResolvedAddress.
pub async fn resolve_model_address(cluster: &ClusterClient, model: &Model) -> KeelResult<String> {
    let namespace = &model.metadata.namespace;
    match model.spec.model_type {
        ModelType::Openai => {
            let config = model.spec.config.openai.clone().unwrap_or_default();
            Ok(resolve_optional(cluster, namespace, config.base_url.as_ref())
                .await?
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()))
        }
        ModelType::Azure => {
            let config = model
                .spec
                .config
                .azure
                .as_ref()
                .ok_or_else(|| KeelError::validation("azure model requires spec.config.azure"))?;
            resolve_value(cluster, namespace, &config.base_url).await
        }
        ModelType::Bedrock => {
            let region = model
                .spec
                .config
                .bedrock
                .as_ref()
                .and_then(|c| c.region.clone())
                .unwrap_or_else(|| "us-east-1".to_string());
            Ok(format!("https://bedrock-runtime.{}.amazonaws.com", region))
        }
    }
}

async fn resolve_optional(
    cluster: &ClusterClient,
    namespace: &str,
    source: Option<&keel_core::ValueSource>,
) -> KeelResult<Option<String>> {
    match source {
        Some(source) => Ok(Some(resolve_value(cluster, namespace, source).await?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::InMemoryCluster;
    use std::sync::Arc;

    fn model_yaml(yaml: &str) -> Model {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_openai_defaults_address() {
        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let model = model_yaml("metadata: {name: m}\nspec:\n  type: openai\n  model: {value: gpt-4o}\n");

        let address = resolve_model_address(&cluster, &model).await.unwrap();
        assert_eq!(address, DEFAULT_OPENAI_BASE_URL);

        let provider = create_model(&cluster, &model).await.unwrap();
        assert_eq!(provider.model_name(), "gpt-4o");
    }

    #[tokio::test]
    async fn test_azure_requires_config() {
        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let model = model_yaml("metadata: {name: m}\nspec:\n  type: azure\n  model: {value: gpt-4}\n");
        assert!(create_model(&cluster, &model).await.is_err());
    }

    #[tokio::test]
    async fn test_bedrock_address_from_region() {
        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let model = model_yaml(
            "metadata: {name: m}\nspec:\n  type: bedrock\n  model: {value: claude}\n  config:\n    bedrock: {region: eu-west-1}\n",
        );
        let address = resolve_model_address(&cluster, &model).await.unwrap();
        assert_eq!(address, "https://bedrock-runtime.eu-west-1.amazonaws.com");
    }
}
