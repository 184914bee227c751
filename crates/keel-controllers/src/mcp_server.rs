//! MCPServer controller - resolves the address and probes the server with
//! an `initialize` handshake; re-probes periodically.

use async_trait::async_trait;
use std::time::Duration;

use keel_core::{
    resolve_value, ClusterClient, EventRecorder, KeelResult, MCPServer, CONDITION_READY,
};
use keel_mcp::McpClient;

use crate::addressable::{seed_conditions, write_address_status};
use crate::manager::{Action, Reconciler, Request};

const PROBE_INTERVAL: Duration = Duration::from_secs(300);

pub struct McpServerReconciler {
    cluster: ClusterClient,
    recorder: EventRecorder,
}

impl McpServerReconciler {
    pub fn new(cluster: ClusterClient, recorder: EventRecorder) -> Self {
        Self { cluster, recorder }
    }

    async fn probe(&self, server: &MCPServer, namespace: &str) -> KeelResult<String> {
        let address = resolve_value(&self.cluster, namespace, &server.spec.address).await?;

        let mut headers = Vec::with_capacity(server.spec.headers.len());
        for header in &server.spec.headers {
            let value = resolve_value(&self.cluster, namespace, &header.value).await?;
            headers.push((header.name.clone(), value));
        }

        let client = McpClient::new(&address, headers, server.spec.transport)?;
        client.initialize().await?;
        Ok(address)
    }
}

#[async_trait]
impl Reconciler for McpServerReconciler {
    fn kind(&self) -> &'static str {
        "MCPServer"
    }

    async fn reconcile(&self, request: &Request) -> KeelResult<Action> {
        let Some(server) = self
            .cluster
            .get::<MCPServer>(&request.namespace, &request.name)
            .await?
        else {
            return Ok(Action::done());
        };
        let generation = server.metadata.generation;

        let empty = server
            .status
            .as_ref()
            .map_or(true, |s| s.conditions.is_empty());
        if seed_conditions::<MCPServer>(
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

        let outcome = self.probe(&server, &request.namespace).await;
        if let Err(e) = &outcome {
            self.recorder.warning(
                "MCPServer",
                format!("{}/{}", request.namespace, request.name),
                "ProbeFailed",
                e.to_string(),
            );
        }

        write_address_status::<MCPServer>(
            &self.cluster,
            &request.namespace,
            &request.name,
            generation,
            CONDITION_READY,
            &outcome,
            |s| &mut s.status,
        )
        .await?;
        Ok(Action::requeue_after(PROBE_INTERVAL))
    }
}
