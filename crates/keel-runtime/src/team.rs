//! Team runtime.
//!
//! Coordinates members (agents or nested teams) under one of four
//! strategies. Members see all previously produced messages as history;
//! termination via the `terminate` built-in stops the team; token deltas
//! are attributed per member through collector snapshots.

use futures::future::BoxFuture;

use keel_core::{
    Agent, GraphConfig, GraphEdge, KeelError, KeelResult, Message, Operation, OperationTracker,
    Team, TeamMember, TeamMemberType, TeamStrategy,
};

use crate::agent::{AgentOutcome, AgentRuntime};
use crate::context::ExecContext;

/// Turn budget applied when a strategy needs one and the spec is silent
pub const DEFAULT_MAX_TURNS: u32 = 10;

pub struct TeamRuntime {
    team: Team,
    ctx: ExecContext,
}

impl TeamRuntime {
    pub async fn load(ctx: &ExecContext, name: &str) -> KeelResult<Self> {
        let team: Team = ctx.cluster.get_required(&ctx.namespace, name).await?;
        Self::from_resource(ctx, team)
    }

    pub fn from_resource(ctx: &ExecContext, team: Team) -> KeelResult<Self> {
        team.spec.validate()?;
        Ok(Self {
            team,
            ctx: ctx.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.team.metadata.name
    }

    fn object(&self) -> String {
        format!("{}/{}", self.ctx.namespace, self.team.metadata.name)
    }

    fn max_turns(&self) -> u32 {
        self.team.spec.max_turns.unwrap_or(DEFAULT_MAX_TURNS)
    }

    pub async fn execute(
        &self,
        user_message: Message,
        history: &[Message],
    ) -> KeelResult<AgentOutcome> {
        let tracker = OperationTracker::start(
            &self.ctx.recorder,
            Some(&self.ctx.collector),
            Operation::TeamExecution,
            "Team",
            self.object(),
        );

        let result = match self.team.spec.strategy {
            TeamStrategy::Sequential => self.run_sequential(&user_message, history).await,
            TeamStrategy::RoundRobin => self.run_round_robin(&user_message, history).await,
            TeamStrategy::Selector => self.run_selector(&user_message, history).await,
            TeamStrategy::Graph => self.run_graph(&user_message, history).await,
        };

        match &result {
            Ok(_) => tracker.complete(None),
            Err(e) => tracker.fail(e),
        }
        result
    }

    /// Owned, type-erased execute for nested-team recursion.
    fn execute_boxed(
        self,
        user_message: Message,
        history: Vec<Message>,
    ) -> BoxFuture<'static, KeelResult<AgentOutcome>> {
        Box::pin(async move { self.execute(user_message, &history).await })
    }

    async fn run_sequential(
        &self,
        user_message: &Message,
        history: &[Message],
    ) -> KeelResult<AgentOutcome> {
        let mut produced = Vec::new();
        for member in &self.team.spec.members {
            let outcome = self
                .run_member(member, user_message, history, &mut produced)
                .await?;
            if outcome.terminated || outcome.interrupted {
                return Ok(AgentOutcome {
                    messages: produced,
                    terminated: outcome.terminated,
                    interrupted: outcome.interrupted,
                });
            }
        }
        Ok(AgentOutcome {
            messages: produced,
            terminated: false,
            interrupted: false,
        })
    }

    async fn run_round_robin(
        &self,
        user_message: &Message,
        history: &[Message],
    ) -> KeelResult<AgentOutcome> {
        let max_turns = self.max_turns();
        let mut produced = Vec::new();

        for turn in 0..max_turns {
            self.ctx.recorder.normal(
                "Team",
                self.object(),
                "TeamTurn",
                format!("turn {} of {}", turn + 1, max_turns),
            );
            for member in &self.team.spec.members {
                let outcome = self
                    .run_member(member, user_message, history, &mut produced)
                    .await?;
                if outcome.terminated || outcome.interrupted {
                    return Ok(AgentOutcome {
                        messages: produced,
                        terminated: outcome.terminated,
                        interrupted: outcome.interrupted,
                    });
                }
            }
        }

        Err(KeelError::runtime(format!(
            "team {} reached maxTurns ({}) without terminating",
            self.team.metadata.name, max_turns
        )))
    }

    async fn run_selector(
        &self,
        user_message: &Message,
        history: &[Message],
    ) -> KeelResult<AgentOutcome> {
        let config = self.team.spec.selector.as_ref().ok_or_else(|| {
            KeelError::validation("selector strategy requires spec.selector")
        })?;
        let participants: Vec<String> = if config.participants.is_empty() {
            self.team
                .spec
                .members
                .iter()
                .map(|m| m.name.clone())
                .collect()
        } else {
            config.participants.clone()
        };

        let max_turns = self.max_turns();
        let mut produced = Vec::new();

        for _turn in 0..max_turns {
            self.ctx.check_canceled()?;

            let prompt = self.selector_prompt(&participants, user_message).await?;
            let selector = AgentRuntime::load(&self.ctx, &config.agent).await?;
            let mut selector_history = history.to_vec();
            selector_history.extend(produced.iter().cloned());
            let choice_outcome = selector
                .execute(Message::user(prompt), &selector_history)
                .await?;
            if choice_outcome.interrupted {
                return Ok(AgentOutcome {
                    messages: produced,
                    terminated: false,
                    interrupted: true,
                });
            }
            let chosen = parse_participant(&choice_outcome.final_content());

            let Some(member) = self
                .team
                .spec
                .members
                .iter()
                .find(|m| m.name == chosen && participants.contains(&m.name))
            else {
                self.ctx.recorder.warning(
                    "Team",
                    self.object(),
                    "UnknownParticipant",
                    format!("selector picked unknown participant \"{}\"", chosen),
                );
                continue;
            };

            let outcome = self
                .run_member(member, user_message, history, &mut produced)
                .await?;
            if outcome.terminated || outcome.interrupted {
                return Ok(AgentOutcome {
                    messages: produced,
                    terminated: outcome.terminated,
                    interrupted: outcome.interrupted,
                });
            }
        }

        Err(KeelError::runtime(format!(
            "team {} reached maxTurns ({}) without terminating",
            self.team.metadata.name, max_turns
        )))
    }

    async fn run_graph(
        &self,
        user_message: &Message,
        history: &[Message],
    ) -> KeelResult<AgentOutcome> {
        let graph = self
            .team
            .spec
            .graph
            .as_ref()
            .ok_or_else(|| KeelError::validation("graph strategy requires spec.graph"))?;
        let mut current = graph
            .start
            .clone()
            .or_else(|| graph.nodes.first().cloned())
            .ok_or_else(|| KeelError::validation("graph has no start node"))?;

        let mut produced = Vec::new();
        for _step in 0..self.max_turns() {
            let member = self
                .team
                .spec
                .members
                .iter()
                .find(|m| m.name == current)
                .ok_or_else(|| {
                    KeelError::validation(format!("graph node {} is not a member", current))
                })?;

            let outcome = self
                .run_member(member, user_message, history, &mut produced)
                .await?;
            if outcome.terminated || outcome.interrupted {
                return Ok(AgentOutcome {
                    messages: produced,
                    terminated: outcome.terminated,
                    interrupted: outcome.interrupted,
                });
            }

            match next_node(graph, &current, &outcome.final_content()) {
                Some(next) => current = next,
                // Sink node: the walk is complete.
                None => {
                    return Ok(AgentOutcome {
                        messages: produced,
                        terminated: false,
                        interrupted: false,
                    })
                }
            }
        }

        Err(KeelError::runtime(format!(
            "team {} graph walk exceeded maxTurns ({})",
            self.team.metadata.name,
            self.max_turns()
        )))
    }

    /// Invoke one member with the accumulated conversation, emitting events
    /// and attributing its token delta.
    async fn run_member(
        &self,
        member: &TeamMember,
        user_message: &Message,
        history: &[Message],
        produced: &mut Vec<Message>,
    ) -> KeelResult<AgentOutcome> {
        self.ctx.check_canceled()?;

        let mut member_history = history.to_vec();
        member_history.extend(produced.iter().cloned());

        self.ctx.recorder.normal(
            "Team",
            self.object(),
            "TeamMemberStart",
            format!("running member {}", member.name),
        );
        let before = self.ctx.collector.snapshot();

        let outcome = match member.member_type {
            TeamMemberType::Agent => {
                let agent = AgentRuntime::load(&self.ctx, &member.name).await?;
                agent
                    .execute(user_message.clone(), &member_history)
                    .await?
            }
            TeamMemberType::Team => {
                let team: Team = self
                    .ctx
                    .cluster
                    .get_required(&self.ctx.namespace, &member.name)
                    .await?;
                let runtime = TeamRuntime::from_resource(&self.ctx, team)?;
                runtime
                    .execute_boxed(user_message.clone(), member_history)
                    .await?
            }
        };

        let delta = self.ctx.collector.delta_since(before);
        self.ctx.recorder.normal(
            "Team",
            self.object(),
            "TeamMemberComplete",
            format!("member {} used {} tokens", member.name, delta.total_tokens),
        );

        produced.extend(outcome.messages.iter().cloned());
        Ok(outcome)
    }

    /// Structured prompt listing participant names and descriptions.
    async fn selector_prompt(
        &self,
        participants: &[String],
        user_message: &Message,
    ) -> KeelResult<String> {
        let mut listing = String::new();
        for name in participants {
            let description = match self
                .ctx
                .cluster
                .get::<Agent>(&self.ctx.namespace, name)
                .await?
            {
                Some(agent) => agent.spec.description.unwrap_or_default(),
                None => self
                    .ctx
                    .cluster
                    .get::<Team>(&self.ctx.namespace, name)
                    .await?
                    .and_then(|t| t.spec.description)
                    .unwrap_or_default(),
            };
            listing.push_str(&format!("- {}: {}\n", name, description));
        }

        Ok(format!(
            "You are coordinating a team working on this task:\n{}\n\n\
             Participants:\n{}\n\
             Select the participant that should act next. \
             Respond with only the participant name.",
            user_message.content(),
            listing
        ))
    }
}

/// First line of the selector's reply, trimmed.
pub(crate) fn parse_participant(reply: &str) -> String {
    reply.lines().next().unwrap_or_default().trim().to_string()
}

/// The matching outgoing edge: a conditional edge whose condition occurs in
/// the member's final content wins; an unconditional edge is the fallback;
/// no edge means the node is a sink.
pub(crate) fn next_node(graph: &GraphConfig, current: &str, content: &str) -> Option<String> {
    let outgoing: Vec<&GraphEdge> = graph.edges.iter().filter(|e| e.from == current).collect();

    outgoing
        .iter()
        .find(|e| {
            e.condition
                .as_ref()
                .is_some_and(|condition| content.contains(condition))
        })
        .or_else(|| outgoing.iter().find(|e| e.condition.is_none()))
        .map(|e| e.to.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(yaml: &str) -> GraphConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_participant_takes_first_line() {
        assert_eq!(parse_participant("writer\nbecause…"), "writer");
        assert_eq!(parse_participant("  editor  "), "editor");
        assert_eq!(parse_participant(""), "");
    }

    #[test]
    fn test_next_node_prefers_matching_condition() {
        let graph = graph(
            r#"
nodes: [draft, review, publish]
edges:
  - {from: draft, to: publish, condition: "LGTM"}
  - {from: draft, to: review}
"#,
        );
        assert_eq!(
            next_node(&graph, "draft", "all good, LGTM").as_deref(),
            Some("publish")
        );
        assert_eq!(
            next_node(&graph, "draft", "needs work").as_deref(),
            Some("review")
        );
    }

    #[test]
    fn test_next_node_sink() {
        let graph = graph("nodes: [a]\nedges: []\n");
        assert_eq!(next_node(&graph, "a", "anything"), None);
    }

    #[test]
    fn test_conditional_only_edges_without_match_are_a_sink() {
        let graph = graph(
            "nodes: [a, b]\nedges:\n  - {from: a, to: b, condition: \"retry\"}\n",
        );
        assert_eq!(next_node(&graph, "a", "done"), None);
    }
}
