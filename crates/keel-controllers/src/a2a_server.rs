//! A2AServer controller.
//!
//! Resolves the server address, discovers its AgentCard, and materializes
//! one owned child Agent per advertised skill. Deleting the server cascades
//! to the children through their owner references.

use async_trait::async_trait;
use std::time::Duration;

use keel_core::{
    resolve_value, Agent, AgentSpec, ClusterClient, EventRecorder, KeelResult, LocalRef,
    ObjectMeta, OwnerReference, A2AServer, A2A_SERVER_ADDRESS_ANNOTATION,
    A2A_SERVER_NAME_ANNOTATION, CONDITION_READY, EXECUTION_ENGINE_A2A,
};
use keel_runtime::{A2AClient, AgentCard};

use crate::addressable::{seed_conditions, write_address_status};
use crate::manager::{Action, Reconciler, Request};

pub struct A2AServerReconciler {
    cluster: ClusterClient,
    recorder: EventRecorder,
}

impl A2AServerReconciler {
    pub fn new(cluster: ClusterClient, recorder: EventRecorder) -> Self {
        Self { cluster, recorder }
    }

    async fn discover(&self, server: &A2AServer, namespace: &str) -> KeelResult<(String, AgentCard)> {
        let address = resolve_value(&self.cluster, namespace, &server.spec.address).await?;

        let mut headers = Vec::with_capacity(server.spec.headers.len());
        for header in &server.spec.headers {
            let value = resolve_value(&self.cluster, namespace, &header.value).await?;
            headers.push((header.name.clone(), value));
        }

        let client = A2AClient::new(&address, headers)?;
        let card = client.fetch_agent_card().await?;
        Ok((address, card))
    }

    /// Create or refresh the child Agent for one skill.
    async fn sync_child(
        &self,
        server: &A2AServer,
        namespace: &str,
        address: &str,
        skill_name: &str,
        description: Option<String>,
    ) -> KeelResult<()> {
        let child_name = child_agent_name(&server.metadata.name, skill_name);

        let mut metadata = ObjectMeta::named(&child_name, namespace);
        metadata
            .owner_references
            .push(OwnerReference::controller_of("A2AServer", &server.metadata));
        metadata.annotations.insert(
            A2A_SERVER_NAME_ANNOTATION.to_string(),
            server.metadata.name.clone(),
        );
        metadata.annotations.insert(
            A2A_SERVER_ADDRESS_ANNOTATION.to_string(),
            address.to_string(),
        );

        let desired = Agent {
            api_version: keel_core::resources::API_VERSION.to_string(),
            kind: "Agent".to_string(),
            metadata,
            spec: AgentSpec {
                description,
                execution_engine: Some(LocalRef::named(EXECUTION_ENGINE_A2A)),
                ..Default::default()
            },
            status: None,
        };

        match self.cluster.get::<Agent>(namespace, &child_name).await? {
            None => {
                self.cluster.create(&desired).await?;
                self.recorder.normal(
                    "A2AServer",
                    format!("{}/{}", namespace, server.metadata.name),
                    "AgentDiscovered",
                    format!("created agent {}", child_name),
                );
            }
            Some(existing) => {
                let address_stale = existing
                    .metadata
                    .annotations
                    .get(A2A_SERVER_ADDRESS_ANNOTATION)
                    .map(|a| a != address)
                    .unwrap_or(true);
                if address_stale {
                    let mut updated = existing;
                    updated.metadata.annotations.insert(
                        A2A_SERVER_ADDRESS_ANNOTATION.to_string(),
                        address.to_string(),
                    );
                    self.cluster.update(&updated).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for A2AServerReconciler {
    fn kind(&self) -> &'static str {
        "A2AServer"
    }

    async fn reconcile(&self, request: &Request) -> KeelResult<Action> {
        let Some(server) = self
            .cluster
            .get::<A2AServer>(&request.namespace, &request.name)
            .await?
        else {
            return Ok(Action::done());
        };
        let generation = server.metadata.generation;
        let poll = Duration::from_secs(server.spec.poll_seconds);

        let empty = server
            .status
            .as_ref()
            .map_or(true, |s| s.conditions.is_empty());
        if seed_conditions::<A2AServer>(
            &self.cluster,
            &request.namespace,
            &request.name,
            generation,
            CONDITION_READY,
            |s| &mut s.status,
            empty,
        )
        .await?
        {
            return Ok(Action::done());
        }

        let outcome = match self.discover(&server, &request.namespace).await {
            Ok((address, card)) => {
                for skill in &card.skills {
                    self.sync_child(
                        &server,
                        &request.namespace,
                        &address,
                        &skill.name,
                        skill.description.clone().or_else(|| card.description.clone()),
                    )
                    .await?;
                }
                Ok(address)
            }
            Err(e) => {
                self.recorder.warning(
                    "A2AServer",
                    format!("{}/{}", request.namespace, request.name),
                    "DiscoveryFailed",
                    e.to_string(),
                );
                Err(e)
            }
        };

        write_address_status::<A2AServer>(
            &self.cluster,
            &request.namespace,
            &request.name,
            generation,
            CONDITION_READY,
            &outcome,
            |s| &mut s.status,
        )
        .await?;
        Ok(Action::requeue_after(poll))
    }
}

/// `<server>-<skill>` with the skill name slugified.
pub fn child_agent_name(server: &str, skill: &str) -> String {
    let slug: String = skill
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    format!("{}-{}", server, slug.trim_matches('-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_agent_name_slugifies() {
        assert_eq!(child_agent_name("peer", "Code Review"), "peer-code-review");
        assert_eq!(child_agent_name("peer", "adder"), "peer-adder");
    }
}
