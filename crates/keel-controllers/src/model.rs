//! Model controller.
//!
//! Resolves the provider address, probes availability, and maintains the
//! ModelAvailable condition. Requeues on the spec's poll interval for
//! periodic re-probing.

use async_trait::async_trait;
use std::time::Duration;

use keel_core::{
    set_condition, ClusterClient, Condition, ConditionStatus, EventRecorder, KeelResult, Model,
    Operation, OperationTracker, ResourcePhase, CONDITION_MODEL_AVAILABLE,
};
use keel_llm::{create_model, resolve_model_address};

use crate::manager::{Action, Reconciler, Request};
use crate::status::update_status_with_retry;

pub struct ModelReconciler {
    cluster: ClusterClient,
    recorder: EventRecorder,
}

impl ModelReconciler {
    pub fn new(cluster: ClusterClient, recorder: EventRecorder) -> Self {
        Self { cluster, recorder }
    }
}

#[async_trait]
impl Reconciler for ModelReconciler {
    fn kind(&self) -> &'static str {
        "Model"
    }

    async fn reconcile(&self, request: &Request) -> KeelResult<Action> {
        let Some(model) = self
            .cluster
            .get::<Model>(&request.namespace, &request.name)
            .await?
        else {
            return Ok(Action::done());
        };
        let object = format!("{}/{}", request.namespace, request.name);
        let generation = model.metadata.generation;

        if model.status().conditions.is_empty() {
            update_status_with_retry(&self.cluster, &request.namespace, &request.name, {
                |model: &mut Model| {
                    let mut status = model.status();
                    status.phase = ResourcePhase::Pending;
                    set_condition(
                        &mut status.conditions,
                        Condition::new(
                            CONDITION_MODEL_AVAILABLE,
                            ConditionStatus::Unknown,
                            "Initializing",
                            "",
                        ),
                        generation,
                    );
                    model.status = Some(status);
                    true
                }
            })
            .await?;
            return Ok(Action::done());
        }

        let probe = self.probe(&model, &object).await;
        let poll = Duration::from_secs(model.spec.poll_seconds);

        let (phase, condition, address, message) = match probe {
            Ok(address) => (
                ResourcePhase::Ready,
                Condition::new(
                    CONDITION_MODEL_AVAILABLE,
                    ConditionStatus::True,
                    "ProbeSucceeded",
                    "model responded",
                ),
                Some(address),
                None,
            ),
            Err(e) => {
                self.recorder
                    .warning("Model", &object, "ProbeFailed", e.to_string());
                (
                    ResourcePhase::Error,
                    Condition::new(
                        CONDITION_MODEL_AVAILABLE,
                        ConditionStatus::False,
                        "ProbeFailed",
                        e.to_string(),
                    ),
                    None,
                    Some(e.to_string()),
                )
            }
        };

        update_status_with_retry(&self.cluster, &request.namespace, &request.name, {
            let condition = condition.clone();
            let address = address.clone();
            let message = message.clone();
            move |model: &mut Model| {
                let before = serde_json::to_value(model.status()).unwrap_or_default();
                let mut status = model.status();
                status.phase = phase;
                status.message = message.clone();
                if address.is_some() {
                    status.last_resolved_address = address.clone();
                }
                status.poll_seconds = Some(model.spec.poll_seconds);
                set_condition(&mut status.conditions, condition.clone(), generation);

                let after = serde_json::to_value(&status).unwrap_or_default();
                model.status = Some(status);
                before != after
            }
        })
        .await?;

        Ok(Action::requeue_after(poll))
    }
}

impl ModelReconciler {
    /// Resolve the address and issue the provider probe.
    async fn probe(&self, model: &Model, object: &str) -> KeelResult<String> {
        let address = resolve_model_address(&self.cluster, model).await?;

        let tracker = OperationTracker::start(
            &self.recorder,
            None,
            Operation::ModelProbe,
            "Model",
            object,
        );
        let provider = match create_model(&self.cluster, model).await {
            Ok(provider) => provider,
            Err(e) => {
                tracker.fail(&e);
                return Err(e);
            }
        };
        match provider.probe().await {
            Ok(()) => {
                tracker.complete(None);
                Ok(address)
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }
}
