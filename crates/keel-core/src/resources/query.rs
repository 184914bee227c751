// Query resource - a unit of user work fanned out to one or more targets.
//
// Phase machine: absent -> running -> (evaluating ->) done | error, with
// canceled reachable from running via spec.cancel. Terminal phases never
// transition again.

use serde::{Deserialize, Serialize};

use super::{default_api_version, LocalRef};
use crate::client::Resource;
use crate::condition::Condition;
use crate::meta::{LabelSelector, ObjectMeta};
use crate::usage::TokenUsage;
use crate::value::Parameter;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "query_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: QuerySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<QueryStatus>,
}

fn query_kind() -> String {
    "Query".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    /// User input forwarded to every resolved target
    #[serde(default)]
    pub input: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<QueryTarget>,

    /// Additional targets matched by label across agents, teams, models,
    /// and tools in the query's namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_ref: Option<LocalRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evaluators: Vec<LocalRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluator_selector: Option<LabelSelector>,

    /// Conversation session; defaults to the query name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Lifetime after creation, e.g. "720h"; expired queries are deleted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,

    /// Per-execution deadline, e.g. "5m"; defaults to 5 minutes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Cooperative cancellation flag
    #[serde(default)]
    pub cancel: bool,

    /// Cluster reads during execution impersonate this service account
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryTarget {
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Agent,
    Team,
    Model,
    Tool,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Team => "team",
            Self::Model => "model",
            Self::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryPhase {
    Running,
    Evaluating,
    Done,
    Error,
    Canceled,
}

impl QueryPhase {
    /// Terminal phases never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Canceled)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatus {
    /// Absent until the controller starts execution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<QueryPhase>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<QueryResponse>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evaluations: Vec<QueryEvaluationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    /// Wall-clock execution time, e.g. "1.274s"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Final content produced by one target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub target: QueryTarget,
    pub content: String,
}

/// Outcome of one evaluator run against the query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEvaluationResult {
    pub evaluator_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
}

impl Resource for Query {
    const KIND: &'static str = "Query";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Query {
    pub fn status(&self) -> QueryStatus {
        self.status.clone().unwrap_or_default()
    }

    pub fn phase(&self) -> Option<QueryPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_some_and(|p| p.is_terminal())
    }

    pub fn session_id(&self) -> &str {
        self.spec
            .session_id
            .as_deref()
            .unwrap_or(&self.metadata.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_yaml() {
        let query: Query = serde_yaml::from_str(
            r#"
metadata: {name: q1, namespace: default}
spec:
  input: "summarize the incident"
  targets:
    - {type: agent, name: writer}
    - {type: team, name: reviewers}
  ttl: 720h
  timeout: 2m
"#,
        )
        .unwrap();
        assert_eq!(query.spec.targets.len(), 2);
        assert_eq!(query.spec.targets[0].target_type, TargetType::Agent);
        assert_eq!(query.phase(), None);
        assert_eq!(query.session_id(), "q1");
    }

    #[test]
    fn test_terminal_phases() {
        assert!(QueryPhase::Done.is_terminal());
        assert!(QueryPhase::Error.is_terminal());
        assert!(QueryPhase::Canceled.is_terminal());
        assert!(!QueryPhase::Running.is_terminal());
        assert!(!QueryPhase::Evaluating.is_terminal());
    }

    #[test]
    fn test_phase_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&QueryPhase::Evaluating).unwrap(),
            "\"evaluating\""
        );
    }
}
