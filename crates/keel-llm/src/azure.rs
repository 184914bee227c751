//! Azure OpenAI provider.
//!
//! Same payload shape as the OpenAI provider behind deployment URLs
//! (`<base>/openai/deployments/<model>/chat/completions?api-version=...`)
//! authenticated with an `api-key` header.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use keel_core::{KeelError, KeelResult, Message};

use crate::openai::{build_request_body, decode_response};
use crate::{ChatCompletion, ChatModel, ChatRequest};

pub struct AzureModel {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_version: String,
    /// Deployment name
    model: String,
    properties: HashMap<String, Value>,
}

impl AzureModel {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
        model: impl Into<String>,
        properties: HashMap<String, Value>,
    ) -> KeelResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| KeelError::provider(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_version: api_version.into(),
            model: model.into(),
            properties,
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.base_url, self.model, self.api_version
        )
    }
}

#[async_trait]
impl ChatModel for AzureModel {
    async fn chat_completion(&self, request: ChatRequest) -> KeelResult<ChatCompletion> {
        let body = build_request_body(&self.model, &request, &self.properties)?;
        let response = self
            .http
            .post(self.completions_url())
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| KeelError::provider(format!("chat completion request failed: {}", e)))?;

        decode_response(response).await
    }

    /// Azure has no deployment-scoped list endpoint; probe with a one-token
    /// completion against the deployment itself.
    async fn probe(&self) -> KeelResult<()> {
        let mut properties = self.properties.clone();
        properties.insert("max_tokens".to_string(), Value::from(1));

        let request = ChatRequest::from_messages(vec![Message::user("ping")]);
        let body = build_request_body(&self.model, &request, &properties)?;
        let response = self
            .http
            .post(self.completions_url())
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| KeelError::retryable(format!("model probe failed: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(KeelError::provider(format!(
                "model probe returned {}",
                response.status()
            )))
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
