//! Evaluation controller.
//!
//! Leaf evaluations (direct, query, baseline, event) call the evaluator
//! service once and persist score/passed/usage, with result metadata stored
//! as `evaluation.metadata/<key>` annotations. Batch evaluations create
//! owned children and aggregate them once all are terminal.

use async_trait::async_trait;
use std::time::Duration;

use keel_core::{
    parse_duration, resolve_parameters, resolve_value, ClusterClient, Evaluation,
    EvaluationPhase, EvaluationSpec, EvaluationStatus, EvaluationType, EventRecorder, Evaluator,
    KeelError, KeelResult, ObjectMeta, Operation, OperationTracker, OwnerReference, Query,
    QueryPhase, EVALUATION_METADATA_PREFIX, PARENT_EVALUATION_LABEL,
};
use keel_runtime::{
    merge_parameters, validate_model_namespace, EvaluationRequest, EvaluatorClient,
};

use crate::manager::{Action, Reconciler, Request};
use crate::status::update_status_with_retry;

const BATCH_POLL: Duration = Duration::from_secs(2);
const QUERY_WAIT: Duration = Duration::from_secs(2);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

pub struct EvaluationReconciler {
    cluster: ClusterClient,
    recorder: EventRecorder,
    client: EvaluatorClient,
}

impl EvaluationReconciler {
    pub fn new(cluster: ClusterClient, recorder: EventRecorder) -> KeelResult<Self> {
        Ok(Self {
            cluster,
            recorder,
            client: EvaluatorClient::new()?,
        })
    }

    async fn write_phase(
        &self,
        request: &Request,
        phase: EvaluationPhase,
        message: Option<String>,
    ) -> KeelResult<()> {
        update_status_with_retry(&self.cluster, &request.namespace, &request.name, {
            move |evaluation: &mut Evaluation| {
                let mut status = evaluation.status();
                if status.phase.is_some_and(|p| p.is_terminal()) {
                    return false;
                }
                let changed = status.phase != Some(phase) || status.message != message;
                status.phase = Some(phase);
                status.message = message.clone();
                evaluation.status = Some(status);
                changed
            }
        })
        .await?;
        Ok(())
    }

    async fn fail(&self, request: &Request, error: &KeelError) -> KeelResult<Action> {
        self.recorder.warning(
            "Evaluation",
            format!("{}/{}", request.namespace, request.name),
            "EvaluationFailed",
            error.to_string(),
        );
        self.write_phase(request, EvaluationPhase::Error, Some(error.to_string()))
            .await?;
        Ok(Action::done())
    }

    async fn reconcile_batch(
        &self,
        request: &Request,
        evaluation: &Evaluation,
    ) -> KeelResult<Action> {
        if evaluation.spec.config.evaluations.is_empty() {
            return self
                .fail(
                    request,
                    &KeelError::validation("batch evaluation has no children"),
                )
                .await;
        }

        self.write_phase(request, EvaluationPhase::Running, None).await?;

        // Materialize missing children.
        for child in &evaluation.spec.config.evaluations {
            let child_name = format!("{}-{}", evaluation.metadata.name, child.name);
            if self
                .cluster
                .get::<Evaluation>(&request.namespace, &child_name)
                .await?
                .is_some()
            {
                continue;
            }

            let mut metadata = ObjectMeta::named(&child_name, &request.namespace);
            metadata.owner_references.push(OwnerReference::controller_of(
                "Evaluation",
                &evaluation.metadata,
            ));
            metadata.labels.insert(
                PARENT_EVALUATION_LABEL.to_string(),
                evaluation.metadata.name.clone(),
            );

            let resource = Evaluation {
                api_version: keel_core::resources::API_VERSION.to_string(),
                kind: "Evaluation".to_string(),
                metadata,
                spec: EvaluationSpec {
                    eval_type: child.eval_type.clone(),
                    config: child.config.clone(),
                    evaluator: child
                        .evaluator
                        .clone()
                        .or_else(|| evaluation.spec.evaluator.clone()),
                    parameters: evaluation.spec.parameters.clone(),
                    timeout: evaluation.spec.timeout.clone(),
                },
                status: None,
            };
            self.cluster.create(&resource).await?;
        }

        // Aggregate once every child is terminal.
        let children: Vec<Evaluation> = self
            .cluster
            .list::<Evaluation>(&request.namespace)
            .await?
            .into_iter()
            .filter(|e| {
                e.metadata.labels.get(PARENT_EVALUATION_LABEL)
                    == Some(&evaluation.metadata.name)
            })
            .collect();

        if children.is_empty()
            || !children
                .iter()
                .all(|c| c.phase().is_some_and(|p| p.is_terminal()))
        {
            return Ok(Action::requeue_after(BATCH_POLL));
        }

        let (score, passed) = aggregate_children(&children);
        update_status_with_retry(&self.cluster, &request.namespace, &request.name, {
            let score = score.clone();
            move |evaluation: &mut Evaluation| {
                let mut status = evaluation.status();
                if status.phase.is_some_and(|p| p.is_terminal()) {
                    return false;
                }
                status.phase = Some(EvaluationPhase::Done);
                status.score = score.clone();
                status.passed = Some(passed);
                status.message = None;
                evaluation.status = Some(status);
                true
            }
        })
        .await?;
        Ok(Action::done())
    }

    async fn reconcile_leaf(
        &self,
        request: &Request,
        evaluation: &Evaluation,
        eval_type: EvaluationType,
    ) -> KeelResult<Action> {
        let object = format!("{}/{}", request.namespace, request.name);

        let Some(evaluator_ref) = evaluation.spec.evaluator.clone() else {
            return self
                .fail(request, &KeelError::validation("evaluation has no evaluator"))
                .await;
        };

        // Type-specific config checks.
        let config = match eval_type {
            EvaluationType::Direct => {
                let (Some(input), Some(output)) = (
                    evaluation.spec.config.input.clone(),
                    evaluation.spec.config.output.clone(),
                ) else {
                    return self
                        .fail(
                            request,
                            &KeelError::validation(
                                "direct evaluation requires config.input and config.output",
                            ),
                        )
                        .await;
                };
                serde_json::json!({"input": input, "output": output})
            }
            EvaluationType::Query => {
                let Some(query_ref) = evaluation.spec.config.query_ref.clone() else {
                    return self
                        .fail(
                            request,
                            &KeelError::validation("query evaluation requires config.queryRef"),
                        )
                        .await;
                };
                let query_namespace = query_ref
                    .namespace
                    .clone()
                    .unwrap_or_else(|| request.namespace.clone());
                let query: Query = self
                    .cluster
                    .get_required(&query_namespace, &query_ref.name)
                    .await?;
                if query.phase() != Some(QueryPhase::Done) {
                    self.write_phase(request, EvaluationPhase::Running, None).await?;
                    return Ok(Action::requeue_after(QUERY_WAIT));
                }

                let mut responses = query.status().responses;
                if let Some(target) = &query_ref.response_target {
                    responses.retain(|r| {
                        format!("{}:{}", r.target.target_type.as_str(), r.target.name) == *target
                    });
                }
                serde_json::json!({
                    "queryRef": {"name": query_ref.name, "namespace": query_namespace},
                    "input": query.spec.input,
                    "responses": responses,
                })
            }
            EvaluationType::Event => serde_json::json!({"rules": evaluation.spec.config.rules}),
            EvaluationType::Baseline => serde_json::to_value(&evaluation.spec.config)?,
            EvaluationType::Batch => unreachable!("batch handled separately"),
        };

        let evaluator_namespace = evaluator_ref
            .namespace
            .clone()
            .unwrap_or_else(|| request.namespace.clone());
        let evaluator: Evaluator = self
            .cluster
            .get_required(&evaluator_namespace, &evaluator_ref.name)
            .await?;
        let address =
            resolve_value(&self.cluster, &evaluator_namespace, &evaluator.spec.address).await?;

        let merged = merge_parameters(&evaluator.spec.parameters, &evaluation.spec.parameters);
        let mut parameters = resolve_parameters(
            &self.cluster,
            &request.namespace,
            &merged,
            &Default::default(),
        )
        .await?;
        validate_model_namespace(
            &self.cluster,
            &self.recorder,
            &object,
            &request.namespace,
            &mut parameters,
        )
        .await?;

        let timeout = evaluation
            .spec
            .timeout
            .as_deref()
            .map(parse_duration)
            .transpose()?
            .unwrap_or(DEFAULT_TIMEOUT);

        self.write_phase(request, EvaluationPhase::Running, None).await?;

        let envelope = EvaluationRequest {
            eval_type: eval_type.as_str().to_string(),
            config,
            parameters,
            evaluator_name: evaluator.metadata.name.clone(),
        };

        let tracker = OperationTracker::start(
            &self.recorder,
            None,
            Operation::Evaluation,
            "Evaluation",
            &object,
        );
        let response = match self.client.evaluate(&address, &envelope, timeout).await {
            Ok(response) => {
                tracker.complete(response.token_usage);
                response
            }
            Err(e) => {
                tracker.fail(&e);
                return self.fail(request, &e).await;
            }
        };

        // Metadata lands in annotations; a two-step write (object, then
        // status) because annotations are not part of the status
        // sub-resource.
        if !response.metadata.is_empty() {
            let mut fresh: Evaluation = self
                .cluster
                .get_required(&request.namespace, &request.name)
                .await?;
            for (key, value) in &response.metadata {
                fresh.metadata.annotations.insert(
                    format!("{}{}", EVALUATION_METADATA_PREFIX, key),
                    value.clone(),
                );
            }
            self.cluster.update(&fresh).await?;
        }

        update_status_with_retry(&self.cluster, &request.namespace, &request.name, {
            let response = response.clone();
            move |evaluation: &mut Evaluation| {
                let mut status = evaluation.status();
                if status.phase.is_some_and(|p| p.is_terminal()) {
                    return false;
                }
                status.phase = Some(EvaluationPhase::Done);
                status.score = response.score.clone();
                status.passed = response.passed;
                status.token_usage = response.token_usage;
                status.message = None;
                evaluation.status = Some(status);
                true
            }
        })
        .await?;
        Ok(Action::done())
    }
}

#[async_trait]
impl Reconciler for EvaluationReconciler {
    fn kind(&self) -> &'static str {
        "Evaluation"
    }

    async fn reconcile(&self, request: &Request) -> KeelResult<Action> {
        let Some(evaluation) = self
            .cluster
            .get::<Evaluation>(&request.namespace, &request.name)
            .await?
        else {
            return Ok(Action::done());
        };

        if evaluation.phase().is_some_and(|p| p.is_terminal()) {
            return Ok(Action::done());
        }

        let eval_type = match evaluation.normalized_type() {
            Ok(eval_type) => eval_type,
            Err(e) => return self.fail(request, &e).await,
        };

        match eval_type {
            EvaluationType::Batch => self.reconcile_batch(request, &evaluation).await,
            other => self.reconcile_leaf(request, &evaluation, other).await,
        }
    }
}

/// Batch aggregation: passed iff every child passed; score is the mean of
/// the float-parsable child scores, three decimals.
fn aggregate_children(children: &[Evaluation]) -> (Option<String>, bool) {
    let passed = children
        .iter()
        .all(|c| c.status().passed == Some(true));

    let scores: Vec<f64> = children
        .iter()
        .filter_map(|c| c.status().score)
        .filter_map(|s| s.parse::<f64>().ok())
        .collect();
    let score = if scores.is_empty() {
        None
    } else {
        Some(format!(
            "{:.3}",
            scores.iter().sum::<f64>() / scores.len() as f64
        ))
    };

    (score, passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(score: Option<&str>, passed: Option<bool>) -> Evaluation {
        let mut evaluation: Evaluation =
            serde_yaml::from_str("metadata: {name: c}\nspec: {}").unwrap();
        evaluation.status = Some(EvaluationStatus {
            phase: Some(EvaluationPhase::Done),
            score: score.map(str::to_string),
            passed,
            ..Default::default()
        });
        evaluation
    }

    #[test]
    fn test_aggregate_mean_and_all_passed() {
        let children = vec![
            child(Some("0.9"), Some(true)),
            child(Some("1.0"), Some(true)),
            child(Some("0.2"), Some(false)),
        ];
        let (score, passed) = aggregate_children(&children);
        assert_eq!(score.as_deref(), Some("0.700"));
        assert!(!passed);
    }

    #[test]
    fn test_aggregate_skips_unparsable_scores() {
        let children = vec![
            child(Some("0.5"), Some(true)),
            child(Some("excellent"), Some(true)),
        ];
        let (score, passed) = aggregate_children(&children);
        assert_eq!(score.as_deref(), Some("0.500"));
        assert!(passed);
    }

    #[test]
    fn test_aggregate_without_scores() {
        let children = vec![child(None, Some(true))];
        let (score, passed) = aggregate_children(&children);
        assert!(score.is_none());
        assert!(passed);
    }
}
