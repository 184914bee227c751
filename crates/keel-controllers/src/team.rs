//! Team controller - validates the strategy config and gates readiness on
//! every member being available.

use async_trait::async_trait;

use keel_core::{
    is_condition_true, set_condition, Agent, ClusterClient, Condition, ConditionStatus,
    EventRecorder, KeelResult, ResourcePhase, Team, TeamMemberType, WatchEvent,
    CONDITION_AVAILABLE,
};

use crate::manager::{Action, Reconciler, Request};
use crate::status::update_status_with_retry;

pub struct TeamReconciler {
    cluster: ClusterClient,
    recorder: EventRecorder,
}

impl TeamReconciler {
    pub fn new(cluster: ClusterClient, recorder: EventRecorder) -> Self {
        Self { cluster, recorder }
    }

    async fn missing_members(&self, team: &Team, namespace: &str) -> KeelResult<Vec<String>> {
        let mut missing = Vec::new();
        for member in &team.spec.members {
            let ready = match member.member_type {
                TeamMemberType::Agent => self
                    .cluster
                    .get::<Agent>(namespace, &member.name)
                    .await?
                    .and_then(|a| a.status)
                    .map(|s| is_condition_true(&s.conditions, CONDITION_AVAILABLE))
                    .unwrap_or(false),
                TeamMemberType::Team => self
                    .cluster
                    .get::<Team>(namespace, &member.name)
                    .await?
                    .and_then(|t| t.status)
                    .map(|s| s.phase == ResourcePhase::Ready)
                    .unwrap_or(false),
            };
            if !ready {
                missing.push(format!("member {} not ready", member.name));
            }
        }
        Ok(missing)
    }
}

#[async_trait]
impl Reconciler for TeamReconciler {
    fn kind(&self) -> &'static str {
        "Team"
    }

    fn watched_kinds(&self) -> Vec<&'static str> {
        vec!["Agent", "Team"]
    }

    async fn map_dependency(&self, event: &WatchEvent) -> Vec<Request> {
        let Ok(teams) = self.cluster.list::<Team>(&event.namespace).await else {
            return Vec::new();
        };
        teams
            .into_iter()
            .filter(|team| {
                team.metadata.name != event.name
                    && team.spec.members.iter().any(|m| {
                        m.name == event.name
                            && match m.member_type {
                                TeamMemberType::Agent => event.kind == "Agent",
                                TeamMemberType::Team => event.kind == "Team",
                            }
                    })
            })
            .map(|team| Request::new(&event.namespace, &team.metadata.name))
            .collect()
    }

    async fn reconcile(&self, request: &Request) -> KeelResult<Action> {
        let Some(team) = self
            .cluster
            .get::<Team>(&request.namespace, &request.name)
            .await?
        else {
            return Ok(Action::done());
        };
        let generation = team.metadata.generation;
        let object = format!("{}/{}", request.namespace, request.name);

        let (phase, condition, message) = if let Err(e) = team.spec.validate() {
            self.recorder
                .warning("Team", &object, "ValidationFailed", e.to_string());
            (
                ResourcePhase::Error,
                Condition::new(
                    CONDITION_AVAILABLE,
                    ConditionStatus::False,
                    "ValidationFailed",
                    e.to_string(),
                ),
                Some(e.to_string()),
            )
        } else {
            let missing = self.missing_members(&team, &request.namespace).await?;
            if missing.is_empty() {
                (
                    ResourcePhase::Ready,
                    Condition::new(
                        CONDITION_AVAILABLE,
                        ConditionStatus::True,
                        "MembersReady",
                        "",
                    ),
                    None,
                )
            } else {
                let message = missing.join("; ");
                (
                    ResourcePhase::Pending,
                    Condition::new(
                        CONDITION_AVAILABLE,
                        ConditionStatus::False,
                        "MembersNotReady",
                        message.clone(),
                    ),
                    Some(message),
                )
            }
        };

        update_status_with_retry(&self.cluster, &request.namespace, &request.name, {
            move |team: &mut Team| {
                let current = team.status.clone().unwrap_or_default();
                let before = serde_json::to_value(&current).unwrap_or_default();

                let mut status = current;
                status.phase = phase;
                status.message = message.clone();
                set_condition(&mut status.conditions, condition.clone(), generation);

                let after = serde_json::to_value(&status).unwrap_or_default();
                team.status = Some(status);
                before != after
            }
        })
        .await?;
        Ok(Action::done())
    }
}
