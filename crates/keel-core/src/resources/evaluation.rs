// Evaluation resource - one scoring run. Types: direct (input/output pair),
// query (scores a finished Query), batch (aggregates child evaluations),
// baseline (multi-LLM comparison), event (rule-driven).

use serde::{Deserialize, Serialize};

use super::{default_api_version, LocalRef};
use crate::client::Resource;
use crate::error::{KeelError, KeelResult};
use crate::meta::ObjectMeta;
use crate::usage::TokenUsage;
use crate::value::Parameter;

/// Label stamped on children created by a batch parent
pub const PARENT_EVALUATION_LABEL: &str = "parent-evaluation";

/// Annotation prefix under which evaluator result metadata is persisted
pub const EVALUATION_METADATA_PREFIX: &str = "evaluation.metadata/";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "evaluation_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: EvaluationSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EvaluationStatus>,
}

fn evaluation_kind() -> String {
    "Evaluation".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSpec {
    /// Raw type string; empty normalizes to "direct" at ingress
    #[serde(rename = "type", default)]
    pub eval_type: String,

    #[serde(default)]
    pub config: EvaluationConfig,

    /// Required for every type except batch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<LocalRef>,

    /// Override the evaluator's default parameters on conflict
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,

    /// Deadline, e.g. "5m"; defaults to 5 minutes, floored at 120s for
    /// baseline evaluations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationType {
    Direct,
    Query,
    Batch,
    Baseline,
    Event,
}

impl EvaluationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Query => "query",
            Self::Batch => "batch",
            Self::Baseline => "baseline",
            Self::Event => "event",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationConfig {
    /// Direct: the input half of the scored pair
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Direct: the output half of the scored pair
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Query: the query whose responses are scored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_ref: Option<QueryRef>,

    /// Event: rule documents forwarded to the evaluator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<serde_json::Value>,

    /// Batch: templates the controller instantiates as child evaluations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evaluations: Vec<BatchChild>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Restrict scoring to one response target, `<type>:<name>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_target: Option<String>,
}

/// Child template inside a batch evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchChild {
    pub name: String,
    #[serde(rename = "type", default)]
    pub eval_type: String,
    #[serde(default)]
    pub config: EvaluationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<LocalRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationPhase {
    Running,
    Done,
    Error,
}

impl EvaluationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationStatus {
    /// Absent until the controller picks the evaluation up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<EvaluationPhase>,
    /// String-encoded score as returned by the evaluator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Resource for Evaluation {
    const KIND: &'static str = "Evaluation";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Evaluation {
    pub fn status(&self) -> EvaluationStatus {
        self.status.clone().unwrap_or_default()
    }

    pub fn phase(&self) -> Option<EvaluationPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Normalize the raw type string; empty means direct, anything else
    /// unknown is a validation failure.
    pub fn normalized_type(&self) -> KeelResult<EvaluationType> {
        normalize_type(&self.spec.eval_type)
    }
}

pub(crate) fn normalize_type(raw: &str) -> KeelResult<EvaluationType> {
    match raw {
        "" | "direct" => Ok(EvaluationType::Direct),
        "query" => Ok(EvaluationType::Query),
        "batch" => Ok(EvaluationType::Batch),
        "baseline" => Ok(EvaluationType::Baseline),
        "event" => Ok(EvaluationType::Event),
        other => Err(KeelError::validation(format!(
            "unknown evaluation type \"{}\"",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_type_normalizes_to_direct() {
        let evaluation: Evaluation = serde_yaml::from_str(
            "metadata: {name: e}\nspec:\n  config: {input: q, output: a}\n  evaluator: {name: ev}\n",
        )
        .unwrap();
        assert_eq!(
            evaluation.normalized_type().unwrap(),
            EvaluationType::Direct
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let evaluation: Evaluation =
            serde_yaml::from_str("metadata: {name: e}\nspec: {type: golden}").unwrap();
        assert!(evaluation.normalized_type().is_err());
    }

    #[test]
    fn test_batch_children_parse() {
        let evaluation: Evaluation = serde_yaml::from_str(
            r#"
metadata: {name: suite}
spec:
  type: batch
  config:
    evaluations:
      - name: one
        type: direct
        config: {input: "2+2", output: "4"}
        evaluator: {name: math}
      - name: two
        type: query
        config:
          queryRef: {name: q1}
        evaluator: {name: general}
"#,
        )
        .unwrap();
        assert_eq!(evaluation.spec.config.evaluations.len(), 2);
        assert_eq!(evaluation.normalized_type().unwrap(), EvaluationType::Batch);
    }
}
