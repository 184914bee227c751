// Team resource - a named group of agents (or nested teams) coordinated by
// a strategy.

use serde::{Deserialize, Serialize};

use super::{default_api_version, ResourcePhase};
use crate::client::Resource;
use crate::condition::Condition;
use crate::error::{KeelError, KeelResult};
use crate::meta::ObjectMeta;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "team_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: TeamSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TeamStatus>,
}

fn team_kind() -> String {
    "Team".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSpec {
    #[serde(default)]
    pub strategy: TeamStrategy,

    #[serde(default)]
    pub members: Vec<TeamMember>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Turn budget for round-robin and selector strategies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,

    /// Required by the selector strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<SelectorConfig>,

    /// Required by the graph strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TeamStrategy {
    #[default]
    Sequential,
    RoundRobin,
    Selector,
    Graph,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    #[serde(rename = "type", default)]
    pub member_type: TeamMemberType,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamMemberType {
    #[default]
    Agent,
    Team,
}

/// Selector-strategy config: the agent that picks each turn's participant
/// plus the participant list it may pick from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorConfig {
    pub agent: String,
    #[serde(default)]
    pub participants: Vec<String>,
}

/// Graph-strategy config: nodes are member names, edges allowed transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphConfig {
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    /// Defaults to the first node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    /// Substring matched against the preceding member's final assistant
    /// content; an edge without a condition is the fallback transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStatus {
    #[serde(default)]
    pub phase: ResourcePhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Resource for Team {
    const KIND: &'static str = "Team";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl TeamSpec {
    /// Strategy-specific structural checks.
    pub fn validate(&self) -> KeelResult<()> {
        if self.members.is_empty() {
            return Err(KeelError::validation("team has no members"));
        }
        match self.strategy {
            TeamStrategy::Selector => {
                if self.selector.is_none() {
                    return Err(KeelError::validation(
                        "selector strategy requires spec.selector",
                    ));
                }
            }
            TeamStrategy::Graph => {
                let graph = self
                    .graph
                    .as_ref()
                    .ok_or_else(|| KeelError::validation("graph strategy requires spec.graph"))?;
                if graph.nodes.is_empty() {
                    return Err(KeelError::validation("graph has no nodes"));
                }
                for node in &graph.nodes {
                    if !self.members.iter().any(|m| &m.name == node) {
                        return Err(KeelError::validation(format!(
                            "graph node {} is not a team member",
                            node
                        )));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kebab_case() {
        let team: Team = serde_yaml::from_str(
            "metadata: {name: t}\nspec:\n  strategy: round-robin\n  members:\n    - name: a\n",
        )
        .unwrap();
        assert_eq!(team.spec.strategy, TeamStrategy::RoundRobin);
        assert_eq!(team.spec.members[0].member_type, TeamMemberType::Agent);
    }

    #[test]
    fn test_graph_validation_requires_member_nodes() {
        let team: Team = serde_yaml::from_str(
            r#"
metadata: {name: t}
spec:
  strategy: graph
  members:
    - name: a
  graph:
    nodes: [a, ghost]
    edges:
      - {from: a, to: ghost}
"#,
        )
        .unwrap();
        assert!(team.spec.validate().is_err());
    }

    #[test]
    fn test_selector_requires_config() {
        let team: Team = serde_yaml::from_str(
            "metadata: {name: t}\nspec:\n  strategy: selector\n  members:\n    - name: a\n",
        )
        .unwrap();
        assert!(team.spec.validate().is_err());
    }

    #[test]
    fn test_nested_team_member() {
        let team: Team = serde_yaml::from_str(
            "metadata: {name: t}\nspec:\n  members:\n    - {type: team, name: inner}\n",
        )
        .unwrap();
        assert_eq!(team.spec.members[0].member_type, TeamMemberType::Team);
        assert!(team.spec.validate().is_ok());
    }
}
