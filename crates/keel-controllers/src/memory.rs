//! Memory controller - resolves the store address into status.

use async_trait::async_trait;

use keel_core::resources::Memory;
use keel_core::{resolve_value, ClusterClient, EventRecorder, KeelResult, CONDITION_READY};

use crate::addressable::{seed_conditions, write_address_status};
use crate::manager::{Action, Reconciler, Request};

pub struct MemoryReconciler {
    cluster: ClusterClient,
    recorder: EventRecorder,
}

impl MemoryReconciler {
    pub fn new(cluster: ClusterClient, recorder: EventRecorder) -> Self {
        Self { cluster, recorder }
    }
}

#[async_trait]
impl Reconciler for MemoryReconciler {
    fn kind(&self) -> &'static str {
        "Memory"
    }

    async fn reconcile(&self, request: &Request) -> KeelResult<Action> {
        let Some(memory) = self
            .cluster
            .get::<Memory>(&request.namespace, &request.name)
            .await?
        else {
            return Ok(Action::done());
        };
        let generation = memory.metadata.generation;

        let empty = memory
            .status
            .as_ref()
            .map_or(true, |s| s.conditions.is_empty());
        if seed_conditions::<Memory>(
            &self.cluster,
            &request.namespace,
            &request.name,
            generation,
            CONDITION_READY,
            |m| &mut m.status,
            empty,
        )
        .await?
        {
            return Ok(Action::done());
        }

        let outcome =
            resolve_value(&self.cluster, &request.namespace, &memory.spec.address).await;
        if let Err(e) = &outcome {
            self.recorder.warning(
                "Memory",
                format!("{}/{}", request.namespace, request.name),
                "ResolutionFailed",
                e.to_string(),
            );
        }

        write_address_status::<Memory>(
            &self.cluster,
            &request.namespace,
            &request.name,
            generation,
            CONDITION_READY,
            &outcome,
            |m| &mut m.status,
        )
        .await?;
        Ok(Action::done())
    }
}
