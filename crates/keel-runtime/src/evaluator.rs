//! Evaluator client.
//!
//! All evaluation types go to the evaluator service through one request
//! envelope; `baseline` evaluations (multi-LLM) get a 120 s timeout floor.
//! Parameter merging gives evaluation-level entries precedence over
//! evaluator-level defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use keel_core::{
    ClusterClient, EventRecorder, KeelError, KeelResult, Model, Parameter, TokenUsage,
};

/// Floor applied to baseline evaluations
pub const BASELINE_TIMEOUT_FLOOR: Duration = Duration::from_secs(120);

/// Default evaluation deadline
pub const DEFAULT_EVALUATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Unified request envelope
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRequest {
    #[serde(rename = "type")]
    pub eval_type: String,
    pub config: Value,
    pub parameters: HashMap<String, String>,
    #[serde(rename = "evaluatorName")]
    pub evaluator_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationResponse {
    #[serde(default)]
    pub score: Option<String>,
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, rename = "tokenUsage")]
    pub token_usage: Option<TokenUsage>,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct EvaluatorClient {
    http: reqwest::Client,
}

impl EvaluatorClient {
    pub fn new() -> KeelResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| KeelError::runtime(format!("failed to build evaluator client: {}", e)))?;
        Ok(Self { http })
    }

    /// POST the envelope to the evaluator address. A non-2xx status or a
    /// non-empty `error` field is a failure.
    pub async fn evaluate(
        &self,
        address: &str,
        request: &EvaluationRequest,
        timeout: Duration,
    ) -> KeelResult<EvaluationResponse> {
        let timeout = if request.eval_type == "baseline" {
            timeout.max(BASELINE_TIMEOUT_FLOOR)
        } else {
            timeout
        };

        let response = self
            .http
            .post(address)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    KeelError::timeout(format!("evaluation timed out after {:?}", timeout))
                } else {
                    KeelError::retryable(format!("evaluator request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeelError::runtime(format!(
                "evaluator returned {}",
                status
            )));
        }

        let decoded: EvaluationResponse = response
            .json()
            .await
            .map_err(|e| KeelError::runtime(format!("malformed evaluator response: {}", e)))?;

        if let Some(error) = decoded.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(KeelError::runtime(format!("evaluator error: {}", error)));
        }
        Ok(decoded)
    }
}

/// Merge evaluator defaults with evaluation-level parameters: one entry per
/// name, evaluation wins on conflict.
pub fn merge_parameters(evaluator: &[Parameter], evaluation: &[Parameter]) -> Vec<Parameter> {
    let mut merged: Vec<Parameter> = Vec::new();
    for parameter in evaluator.iter().chain(evaluation.iter()) {
        match merged.iter_mut().find(|p| p.name == parameter.name) {
            Some(existing) => *existing = parameter.clone(),
            None => merged.push(parameter.clone()),
        }
    }
    merged
}

/// If the parameters reference a model in a namespace where it does not
/// exist, substitute the evaluation's own namespace and warn.
pub async fn validate_model_namespace(
    cluster: &ClusterClient,
    recorder: &EventRecorder,
    evaluation_object: &str,
    evaluation_namespace: &str,
    parameters: &mut HashMap<String, String>,
) -> KeelResult<()> {
    let Some(model_name) = parameters.get("model.name").cloned() else {
        return Ok(());
    };
    let supplied = parameters
        .get("model.namespace")
        .cloned()
        .unwrap_or_else(|| evaluation_namespace.to_string());

    let model: Option<Model> = cluster.get(&supplied, &model_name).await?;
    if model.is_none() && supplied != evaluation_namespace {
        recorder.warning(
            "Evaluation",
            evaluation_object,
            "ModelNamespaceFallback",
            format!(
                "model {} not found in namespace {}, using {}",
                model_name, supplied, evaluation_namespace
            ),
        );
        parameters.insert(
            "model.namespace".to_string(),
            evaluation_namespace.to_string(),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_merge_parameters_evaluation_wins() {
        let evaluator = vec![
            Parameter::literal("threshold", "0.5"),
            Parameter::literal("mode", "strict"),
        ];
        let evaluation = vec![
            Parameter::literal("threshold", "0.9"),
            Parameter::literal("extra", "x"),
        ];

        let merged = merge_parameters(&evaluator, &evaluation);
        assert_eq!(merged.len(), 3);
        let threshold = merged.iter().find(|p| p.name == "threshold").unwrap();
        assert_eq!(threshold.value.as_deref(), Some("0.9"));
    }

    #[tokio::test]
    async fn test_evaluate_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "direct", "evaluatorName": "judge"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "score": "0.85",
                "passed": true,
                "metadata": {"criteria": "relevance"},
                "tokenUsage": {"promptTokens": 100, "completionTokens": 20, "totalTokens": 120}
            })))
            .mount(&server)
            .await;

        let client = EvaluatorClient::new().unwrap();
        let request = EvaluationRequest {
            eval_type: "direct".to_string(),
            config: json!({"input": "2+2", "output": "4"}),
            parameters: HashMap::new(),
            evaluator_name: "judge".to_string(),
        };

        let response = client
            .evaluate(&server.uri(), &request, DEFAULT_EVALUATION_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(response.score.as_deref(), Some("0.85"));
        assert_eq!(response.passed, Some(true));
        assert_eq!(response.token_usage.unwrap().total_tokens, 120);
    }

    #[tokio::test]
    async fn test_error_field_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": "evaluator exploded"
            })))
            .mount(&server)
            .await;

        let client = EvaluatorClient::new().unwrap();
        let request = EvaluationRequest {
            eval_type: "direct".to_string(),
            config: json!({}),
            parameters: HashMap::new(),
            evaluator_name: "judge".to_string(),
        };
        let err = client
            .evaluate(&server.uri(), &request, DEFAULT_EVALUATION_TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("evaluator exploded"));
    }

    #[tokio::test]
    async fn test_model_namespace_fallback() {
        use keel_core::{ClusterClient, EventRecorder, InMemoryCluster};
        use std::sync::Arc;

        let cluster = ClusterClient::new(Arc::new(InMemoryCluster::new()));
        let recorder = EventRecorder::new();

        let mut parameters = HashMap::new();
        parameters.insert("model.name".to_string(), "gpt4".to_string());
        parameters.insert("model.namespace".to_string(), "elsewhere".to_string());

        validate_model_namespace(&cluster, &recorder, "default/e", "default", &mut parameters)
            .await
            .unwrap();

        assert_eq!(parameters["model.namespace"], "default");
        assert_eq!(
            recorder.events_with_reason("ModelNamespaceFallback").len(),
            1
        );
    }
}
