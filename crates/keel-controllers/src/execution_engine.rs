//! ExecutionEngine controller - resolves the engine address into status.

use async_trait::async_trait;

use keel_core::{
    resolve_value, ClusterClient, EventRecorder, ExecutionEngine, KeelResult, CONDITION_READY,
};

use crate::addressable::{seed_conditions, write_address_status};
use crate::manager::{Action, Reconciler, Request};

pub struct ExecutionEngineReconciler {
    cluster: ClusterClient,
    recorder: EventRecorder,
}

impl ExecutionEngineReconciler {
    pub fn new(cluster: ClusterClient, recorder: EventRecorder) -> Self {
        Self { cluster, recorder }
    }
}

#[async_trait]
impl Reconciler for ExecutionEngineReconciler {
    fn kind(&self) -> &'static str {
        "ExecutionEngine"
    }

    async fn reconcile(&self, request: &Request) -> KeelResult<Action> {
        let Some(engine) = self
            .cluster
            .get::<ExecutionEngine>(&request.namespace, &request.name)
            .await?
        else {
            return Ok(Action::done());
        };
        let generation = engine.metadata.generation;

        let empty = engine
            .status
            .as_ref()
            .map_or(true, |s| s.conditions.is_empty());
        if seed_conditions::<ExecutionEngine>(
            &self.cluster,
            &request.namespace,
            &request.name,
            generation,
            CONDITION_READY,
            |e| &mut e.status,
            empty,
        )
        .await?
        {
            return Ok(Action::done());
        }

        let outcome =
            resolve_value(&self.cluster, &request.namespace, &engine.spec.address).await;
        if let Err(e) = &outcome {
            self.recorder.warning(
                "ExecutionEngine",
                format!("{}/{}", request.namespace, request.name),
                "ResolutionFailed",
                e.to_string(),
            );
        }

        write_address_status::<ExecutionEngine>(
            &self.cluster,
            &request.namespace,
            &request.name,
            generation,
            CONDITION_READY,
            &outcome,
            |e| &mut e.status,
        )
        .await?;
        Ok(Action::done())
    }
}
