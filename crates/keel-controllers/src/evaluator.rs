//! Evaluator controller.
//!
//! Resolves the evaluator address, and auto-creates query Evaluations for
//! finished queries matched by the evaluator's selector.

use async_trait::async_trait;

use keel_core::{
    resolve_value, ClusterClient, Evaluation, EvaluationConfig, EvaluationSpec, EventRecorder,
    Evaluator, KeelResult, LocalRef, ObjectMeta, OwnerReference, Query, QueryPhase, QueryRef,
    WatchEvent, CONDITION_READY,
};

use crate::addressable::{seed_conditions, write_address_status};
use crate::manager::{Action, Reconciler, Request};

pub struct EvaluatorReconciler {
    cluster: ClusterClient,
    recorder: EventRecorder,
}

impl EvaluatorReconciler {
    pub fn new(cluster: ClusterClient, recorder: EventRecorder) -> Self {
        Self { cluster, recorder }
    }

    /// Create Evaluations for selector-matched queries that reached done.
    async fn auto_evaluate(&self, evaluator: &Evaluator, namespace: &str) -> KeelResult<()> {
        let Some(selector) = &evaluator.spec.selector else {
            return Ok(());
        };

        let queries: Vec<Query> = self.cluster.list(namespace).await?;
        for query in queries {
            if !selector.matches(&query.metadata.labels)
                || query.phase() != Some(QueryPhase::Done)
            {
                continue;
            }

            let evaluation_name =
                format!("{}-{}", query.metadata.name, evaluator.metadata.name);
            if self
                .cluster
                .get::<Evaluation>(namespace, &evaluation_name)
                .await?
                .is_some()
            {
                continue;
            }

            let mut metadata = ObjectMeta::named(&evaluation_name, namespace);
            metadata
                .owner_references
                .push(OwnerReference::controller_of("Query", &query.metadata));

            let evaluation = Evaluation {
                api_version: keel_core::resources::API_VERSION.to_string(),
                kind: "Evaluation".to_string(),
                metadata,
                spec: EvaluationSpec {
                    eval_type: "query".to_string(),
                    config: EvaluationConfig {
                        query_ref: Some(QueryRef {
                            name: query.metadata.name.clone(),
                            namespace: Some(namespace.to_string()),
                            response_target: None,
                        }),
                        ..Default::default()
                    },
                    evaluator: Some(LocalRef::named(&evaluator.metadata.name)),
                    parameters: Vec::new(),
                    timeout: None,
                },
                status: None,
            };
            self.cluster.create(&evaluation).await?;
            self.recorder.normal(
                "Evaluator",
                format!("{}/{}", namespace, evaluator.metadata.name),
                "AutoEvaluation",
                format!("created evaluation {}", evaluation_name),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for EvaluatorReconciler {
    fn kind(&self) -> &'static str {
        "Evaluator"
    }

    fn watched_kinds(&self) -> Vec<&'static str> {
        vec!["Query"]
    }

    async fn map_dependency(&self, event: &WatchEvent) -> Vec<Request> {
        let Ok(evaluators) = self.cluster.list::<Evaluator>(&event.namespace).await else {
            return Vec::new();
        };
        evaluators
            .into_iter()
            .filter(|e| e.spec.selector.is_some())
            .map(|e| Request::new(&event.namespace, &e.metadata.name))
            .collect()
    }

    async fn reconcile(&self, request: &Request) -> KeelResult<Action> {
        let Some(evaluator) = self
            .cluster
            .get::<Evaluator>(&request.namespace, &request.name)
            .await?
        else {
            return Ok(Action::done());
        };
        let generation = evaluator.metadata.generation;

        let empty = evaluator
            .status
            .as_ref()
            .map_or(true, |s| s.conditions.is_empty());
        if seed_conditions::<Evaluator>(
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
            resolve_value(&self.cluster, &request.namespace, &evaluator.spec.address).await;
        write_address_status::<Evaluator>(
            &self.cluster,
            &request.namespace,
            &request.name,
            generation,
            CONDITION_READY,
            &outcome,
            |e| &mut e.status,
        )
        .await?;

        if outcome.is_ok() {
            self.auto_evaluate(&evaluator, &request.namespace).await?;
        }
        Ok(Action::done())
    }
}
